pub mod sampler;
pub mod shutdown;
pub mod smart;

pub use sampler::{CounterSource, InterfaceCounters};
pub use shutdown::{ShutdownHost, SystemShutdown};
pub use smart::{SmartReport, SmartSource, Smartctl};

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Interface not found: {0}")]
    InterfaceMissing(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("Shutdown command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SmartError {
    #[error("smartctl returned no data ({status}): {stderr}")]
    NoOutput { status: String, stderr: String },
    #[error("smartctl timed out after {0}s")]
    Timeout(u64),
    #[error("Invalid smartctl JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
