//! lensprof batch orchestration
//!
//! Drives the external simulator over a galaxy population:
//! - instantiates one configuration per galaxy in its own working directory
//! - invokes the simulator through [`SimulatorInvoker`]
//! - parses outputs into a [`lensprof_core::ResultArchive`] plus an error log

pub mod config;
#[cfg(any(test, feature = "test-support"))]
pub mod fakes;
pub mod invoker;
pub mod pipeline;
pub mod workspace;

pub use config::BatchConfig;
pub use invoker::{Invocation, ProcessInvoker, SimulatorInvoker};
pub use pipeline::{BatchOutcome, RunSummary, TrialPipeline};
pub use workspace::TrialWorkspace;
