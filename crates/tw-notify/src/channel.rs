use crate::dingtalk::DingTalkChannel;
use crate::email::EmailChannel;
use crate::message::AlertMessage;
use crate::wecom::WeComChannel;
use crate::NotifyError;
use tw_config::ChannelConfig;

enum Transport {
    WeCom(WeComChannel),
    DingTalk(DingTalkChannel),
    Email(EmailChannel),
}

/// One configured notification destination.
pub struct Channel {
    name: String,
    template: Option<String>,
    transport: Transport,
}

impl Channel {
    pub fn from_config(config: &ChannelConfig, http: &reqwest::Client) -> Result<Self, NotifyError> {
        let (template, transport) = match config {
            ChannelConfig::Wecom(c) => (
                c.message.clone(),
                Transport::WeCom(WeComChannel::new(c, http.clone())),
            ),
            ChannelConfig::Dingtalk(c) => (
                c.message.clone(),
                Transport::DingTalk(DingTalkChannel::new(c, http.clone())),
            ),
            ChannelConfig::Email(c) => (c.message.clone(), Transport::Email(EmailChannel::new(c)?)),
        };
        Ok(Self {
            name: config.name().to_string(),
            template,
            transport,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        match self.transport {
            Transport::WeCom(_) => "wecom",
            Transport::DingTalk(_) => "dingtalk",
            Transport::Email(_) => "email",
        }
    }

    /// Single delivery attempt; retries are the dispatcher's concern.
    pub async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let content = message.render(self.template.as_deref());
        match &self.transport {
            Transport::WeCom(ch) => ch.send(&content).await,
            Transport::DingTalk(ch) => ch.send(&content).await,
            Transport::Email(ch) => ch.send(&content).await,
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}
