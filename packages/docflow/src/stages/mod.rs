//! Analysis stage implementations.

pub mod remote;

pub use remote::{RemoteStage, RemoteStageConfig};
