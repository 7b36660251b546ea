use crate::ShutdownError;
use std::future::Future;

/// Powers the host off.
pub trait ShutdownHost: Send + Sync {
    fn shutdown_host(&self) -> impl Future<Output = Result<(), ShutdownError>> + Send;
}

/// Runs the system shutdown command (`shutdown -h now` by default).
#[derive(Debug, Clone)]
pub struct SystemShutdown {
    program: String,
    args: Vec<String>,
}

impl Default for SystemShutdown {
    fn default() -> Self {
        Self::with_command("shutdown", ["-h", "now"])
    }
}

impl SystemShutdown {
    pub fn with_command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl ShutdownHost for SystemShutdown {
    async fn shutdown_host(&self) -> Result<(), ShutdownError> {
        tracing::warn!(
            command = %self.program,
            args = ?self.args,
            "Executing shutdown command"
        );
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ShutdownError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
