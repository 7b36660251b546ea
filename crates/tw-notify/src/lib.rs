pub mod channel;
pub mod dingtalk;
pub mod dispatcher;
pub mod email;
pub mod message;
pub mod retry;
pub mod wecom;
mod webhook;

pub use channel::Channel;
pub use dispatcher::{DeliveryOutcome, DispatchResult, Dispatcher};
pub use message::{AlertContext, AlertMessage};
pub use retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("Rejected by service (errcode {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("SMTP error: {message}")]
    Smtp { message: String, transient: bool },
    #[error("Invalid email address: {0}")]
    Address(String),
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// WeCom "API freq out of limit".
const WECOM_RATE_LIMITED: i64 = 45009;
/// DingTalk "send too fast".
const DINGTALK_RATE_LIMITED: i64 = 130101;

impl NotifyError {
    /// Whether another attempt could succeed. Bad credentials, malformed
    /// addresses and permanent SMTP replies never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Http(_) => true,
            NotifyError::Status(code) => *code == 429 || *code >= 500,
            NotifyError::Rejected { code, .. } => {
                *code == WECOM_RATE_LIMITED || *code == DINGTALK_RATE_LIMITED
            }
            NotifyError::Smtp { transient, .. } => *transient,
            NotifyError::Address(_) | NotifyError::Signing(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(NotifyError::Status(503).is_retryable());
        assert!(NotifyError::Status(429).is_retryable());
        assert!(!NotifyError::Status(404).is_retryable());
        assert!(!NotifyError::Rejected {
            code: 93000,
            message: "invalid webhook url".into()
        }
        .is_retryable());
        assert!(NotifyError::Rejected {
            code: 45009,
            message: "api freq out of limit".into()
        }
        .is_retryable());
        assert!(!NotifyError::Address("nobody".into()).is_retryable());
        assert!(NotifyError::Smtp {
            message: "421".into(),
            transient: true
        }
        .is_retryable());
    }
}
