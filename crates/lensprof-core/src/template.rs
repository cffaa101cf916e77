//! Simulator configuration templates.
//!
//! A template is an ordinary glafic input file with placeholder tokens:
//!
//! ```text
//! prefix out
//! zl     **ZLENS**
//! startup 2 0 1
//! **SIE**
//! **SHEAR**
//! end_startup
//! start_setopt
//! end_setopt
//! start_command
//! **POINT**
//! findimg
//! quit
//! ```
//!
//! Block tokens (`**SIE**`, `**SHEAR**`, `**POINT**`) occupy a line of their
//! own and are replaced by a full lens or source line. `**ZLENS**` is replaced
//! in place by the lens redshift. The `prefix` directive is rewritten to the
//! per-galaxy output prefix. All tokens are checked once when the template is
//! parsed, so a bad template fails before any simulator run.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::domain::{GalaxyRecord, LensError, Result};

/// Decimal places used for substituted values.
pub const DEFAULT_PRECISION: usize = 6;

const PREFIX_DIRECTIVE: &str = "prefix";

/// Placeholder tokens recognized in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Sie,
    Shear,
    Point,
    LensRedshift,
}

impl Placeholder {
    pub const ALL: [Placeholder; 4] = [
        Placeholder::Sie,
        Placeholder::Shear,
        Placeholder::Point,
        Placeholder::LensRedshift,
    ];

    /// Token name between the `**` markers.
    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::Sie => "SIE",
            Placeholder::Shear => "SHEAR",
            Placeholder::Point => "POINT",
            Placeholder::LensRedshift => "ZLENS",
        }
    }

    pub fn token(&self) -> String {
        format!("**{}**", self.name())
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn is_block(&self) -> bool {
        !matches!(self, Placeholder::LensRedshift)
    }
}

#[derive(Debug, Clone)]
enum Line {
    Text(String),
    Block(Placeholder),
    Prefix { indent: String },
    LensRedshift { before: String, after: String },
}

/// A validated, read-only configuration template.
#[derive(Debug, Clone)]
pub struct ConfigTemplate {
    lines: Vec<Line>,
    precision: usize,
    digest: String,
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\*\*([A-Za-z0-9_]+)\*\*").expect("valid token regex"))
}

impl ConfigTemplate {
    /// Parse and validate template text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        let mut seen: Vec<Placeholder> = Vec::new();
        let mut prefix_lines = 0usize;

        for (lineno, raw) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let tokens: Vec<_> = token_regex().find_iter(raw).collect();

            if tokens.is_empty() {
                if raw.split_whitespace().next() == Some(PREFIX_DIRECTIVE) {
                    prefix_lines += 1;
                    let indent: String = raw.chars().take_while(|c| c.is_whitespace()).collect();
                    lines.push(Line::Prefix { indent });
                } else {
                    lines.push(Line::Text(raw.to_string()));
                }
                continue;
            }

            if tokens.len() > 1 {
                return Err(LensError::TemplateError(format!(
                    "line {lineno}: more than one placeholder on a line"
                )));
            }

            let whole = tokens[0];
            let name = whole.as_str().trim_matches('*');
            let placeholder = Placeholder::from_name(name).ok_or_else(|| {
                LensError::TemplateError(format!("line {lineno}: unknown placeholder **{name}**"))
            })?;

            if seen.contains(&placeholder) {
                return Err(LensError::TemplateError(format!(
                    "line {lineno}: duplicate placeholder {}",
                    placeholder.token()
                )));
            }
            seen.push(placeholder);

            if placeholder.is_block() {
                if raw.trim() != placeholder.token() {
                    return Err(LensError::TemplateError(format!(
                        "line {lineno}: {} must be alone on its line",
                        placeholder.token()
                    )));
                }
                lines.push(Line::Block(placeholder));
            } else {
                lines.push(Line::LensRedshift {
                    before: raw[..whole.start()].to_string(),
                    after: raw[whole.end()..].to_string(),
                });
            }
        }

        for placeholder in Placeholder::ALL {
            if !seen.contains(&placeholder) {
                return Err(LensError::TemplateError(format!(
                    "missing {} placeholder",
                    placeholder.token()
                )));
            }
        }
        match prefix_lines {
            0 => {
                return Err(LensError::TemplateError(
                    "missing `prefix` directive".to_string(),
                ))
            }
            1 => {}
            n => {
                return Err(LensError::TemplateError(format!(
                    "`prefix` directive appears {n} times"
                )))
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());

        Ok(Self {
            lines,
            precision: DEFAULT_PRECISION,
            digest: hex::encode(hasher.finalize()),
        })
    }

    /// Load and validate a template file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LensError::TemplateError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Override the number of decimal places used for substituted values.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    /// SHA-256 of the template source text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Render the concrete configuration for one galaxy.
    pub fn instantiate(&self, galaxy: &GalaxyRecord, output_prefix: &str) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Text(text) => out.push_str(text),
                Line::Prefix { indent } => {
                    let _ = write!(out, "{indent}{PREFIX_DIRECTIVE} {output_prefix}");
                }
                Line::Block(placeholder) => out.push_str(&self.render_block(*placeholder, galaxy)),
                Line::LensRedshift { before, after } => {
                    out.push_str(before);
                    out.push_str(&self.num(galaxy.lens_redshift));
                    out.push_str(after);
                }
            }
            out.push('\n');
        }
        out
    }

    fn num(&self, value: f64) -> String {
        format!("{:.*}", self.precision, value)
    }

    fn render_block(&self, placeholder: Placeholder, g: &GalaxyRecord) -> String {
        let fields: Vec<f64> = match placeholder {
            Placeholder::Sie => vec![
                g.velocity_dispersion,
                g.x,
                g.y,
                g.ellipticity,
                g.position_angle,
                g.core_radius,
                0.0,
            ],
            Placeholder::Shear => vec![
                g.source_redshift,
                0.0,
                0.0,
                g.shear,
                g.shear_angle,
                0.0,
                g.convergence,
            ],
            Placeholder::Point => vec![g.source_redshift, g.source_x, g.source_y],
            Placeholder::LensRedshift => vec![g.lens_redshift],
        };
        let head = match placeholder {
            Placeholder::Sie => "lens sie",
            Placeholder::Shear => "lens pert",
            Placeholder::Point => "point",
            Placeholder::LensRedshift => "zl",
        };
        let values: Vec<String> = fields.into_iter().map(|v| self.num(v)).collect();
        format!("{head} {}", values.join(" "))
    }
}

#[cfg(test)]
pub(crate) const TEST_TEMPLATE: &str = "\
omega 0.3
lambda 0.7
hubble 0.7
prefix out
xmin -5.0
ymin -5.0
xmax 5.0
ymax 5.0
pix_ext 0.2
pix_poi 0.2
maxlev 5
zl **ZLENS**

startup 2 0 1
**SIE**
**SHEAR**
end_startup

start_setopt
end_setopt

start_command
**POINT**
findimg
quit
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::galaxy::test_galaxy;

    #[test]
    fn test_instantiate_substitutes_all_blocks() {
        let template = ConfigTemplate::parse(TEST_TEMPLATE).unwrap();
        let text = template.instantiate(&test_galaxy(3), "gal3");

        assert!(text.contains(
            "lens sie 210.500000 0.000000 0.000000 0.310000 42.000000 0.000000 0.000000\n"
        ));
        assert!(text.contains(
            "lens pert 3.000000 0.000000 0.000000 0.050000 120.000000 0.000000 0.000000\n"
        ));
        assert!(text.contains("point 3.000000 0.100000 -0.200000\n"));
        assert!(text.contains("zl 0.500000\n"));
        assert!(text.contains("prefix gal3\n"));
        assert!(!text.contains("**"));
        assert!(!text.contains("prefix out"));
    }

    #[test]
    fn test_literals_preserved_in_order() {
        let template = ConfigTemplate::parse(TEST_TEMPLATE).unwrap();
        let text = template.instantiate(&test_galaxy(0), "out");
        let omega = text.find("omega 0.3").unwrap();
        let startup = text.find("startup 2 0 1").unwrap();
        let findimg = text.find("findimg").unwrap();
        assert!(omega < startup && startup < findimg);
        assert_eq!(text.lines().count(), TEST_TEMPLATE.lines().count());
    }

    #[test]
    fn test_missing_shear_rejected() {
        let text = TEST_TEMPLATE.replace("**SHEAR**\n", "");
        let err = ConfigTemplate::parse(&text).unwrap_err();
        assert!(matches!(err, LensError::TemplateError(_)));
        assert!(err.to_string().contains("**SHEAR**"));
    }

    #[test]
    fn test_duplicate_placeholder_rejected() {
        let text = TEST_TEMPLATE.replace("**SIE**", "**SIE**\n**SIE**");
        let err = ConfigTemplate::parse(&text).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_block_token_must_stand_alone() {
        let text = TEST_TEMPLATE.replace("**POINT**", "point **POINT**");
        let err = ConfigTemplate::parse(&text).unwrap_err();
        assert!(err.to_string().contains("alone"));
    }

    #[test]
    fn test_unknown_token_rejected() {
        let text = format!("{TEST_TEMPLATE}**NFW**\n");
        let err = ConfigTemplate::parse(&text).unwrap_err();
        assert!(err.to_string().contains("unknown placeholder **NFW**"));
    }

    #[test]
    fn test_missing_prefix_rejected() {
        let text = TEST_TEMPLATE.replace("prefix out\n", "");
        let err = ConfigTemplate::parse(&text).unwrap_err();
        assert!(err.to_string().contains("prefix"));
    }

    #[test]
    fn test_custom_precision() {
        let template = ConfigTemplate::parse(TEST_TEMPLATE)
            .unwrap()
            .with_precision(2);
        let text = template.instantiate(&test_galaxy(0), "out");
        assert!(text.contains("point 3.00 0.10 -0.20\n"));
    }

    #[test]
    fn test_instantiate_does_not_mutate_template() {
        let template = ConfigTemplate::parse(TEST_TEMPLATE).unwrap();
        let a = template.instantiate(&test_galaxy(0), "a");
        let mut other = test_galaxy(1);
        other.shear = 0.2;
        let _ = template.instantiate(&other, "b");
        assert_eq!(template.instantiate(&test_galaxy(0), "a"), a);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigTemplate::load(&dir.path().join("nope.input")).unwrap_err();
        assert!(matches!(err, LensError::TemplateError(_)));
    }
}
