use crate::NotifyError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tw_config::EmailConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

fn parse_mailbox(addr: &str) -> Result<Mailbox, NotifyError> {
    addr.trim()
        .parse::<Mailbox>()
        .map_err(|e| NotifyError::Address(format!("{addr}: {e}")))
}

fn smtp_error(err: lettre::transport::smtp::Error) -> NotifyError {
    NotifyError::Smtp {
        transient: !err.is_permanent(),
        message: err.to_string(),
    }
}

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    subject: String,
}

impl EmailChannel {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
                .map_err(smtp_error)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.smtp_server.as_str())
        };
        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(SMTP_TIMEOUT));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let to = config
            .to_addrs
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            transport: builder.build(),
            from: parse_mailbox(&config.from_addr)?,
            to,
            subject: config.subject.clone(),
        })
    }

    pub async fn send(&self, content: &str) -> Result<(), NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let email = builder
            .body(content.to_string())
            .map_err(|e| NotifyError::Address(e.to_string()))?;

        self.transport.send(email).await.map_err(smtp_error)?;
        Ok(())
    }
}
