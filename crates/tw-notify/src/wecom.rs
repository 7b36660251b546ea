//! Enterprise WeChat (WeCom) group robot, webhook flavour.

use crate::webhook::{check_reply, text_payload};
use crate::NotifyError;
use tw_config::WeComConfig;

pub struct WeComChannel {
    http: reqwest::Client,
    endpoint: String,
    webhook_key: String,
}

impl WeComChannel {
    pub fn new(config: &WeComConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            webhook_key: config.webhook_key.clone(),
        }
    }

    pub async fn send(&self, content: &str) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.webhook_key.as_str())])
            .json(&text_payload(content))
            .send()
            .await?;
        check_reply(resp).await
    }
}
