//! Sprays HTTP probes over targets, path suffixes, virtual hosts and proxies.
//!
//! The heart of the crate is [`SprayPool`], a Tokio-based pool that runs an
//! open-ended stream of independent tasks under a fixed concurrency ceiling
//! and hands their results back in completion order.

pub mod cli;
mod channel;
mod diagnostics;
mod error;
mod handle;
pub mod logging;
mod plan;
mod pool;
mod probe;
mod response;
mod slots;
mod task;
pub mod targets;

pub use channel::Drain;
pub use diagnostics::{DiagnosticsSink, TaskEvent, TaskEventStatus, TracingSink};
pub use error::PoolError;
pub use handle::TaskHandle;
pub use plan::{ProbeRequest, SprayPlan};
pub use pool::SprayPool;
pub use probe::{ProbeError, ProbeOptions, Prober};
pub use response::{extract_title, response_file_name, save_response, SprayResponse};
pub use slots::SlotSnapshot;
pub use task::{BlockingTask, TaskError, TaskLabel, TaskOutput, TaskToExecute};
