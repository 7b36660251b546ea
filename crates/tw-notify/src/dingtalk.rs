//! DingTalk group robot with optional request signing.
//!
//! Signed requests carry `timestamp` (milliseconds) and
//! `sign = base64(HMAC-SHA256(secret, "{timestamp}\n{secret}"))` as query
//! parameters next to `access_token`.

use crate::webhook::{check_reply, text_payload};
use crate::NotifyError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tw_config::DingTalkConfig;

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, timestamp_ms: i64) -> Result<String, NotifyError> {
    let string_to_sign = format!("{timestamp_ms}\n{secret}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotifyError::Signing(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub struct DingTalkChannel {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    secret: Option<String>,
}

impl DingTalkChannel {
    pub fn new(config: &DingTalkConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            access_token: config.access_token.clone(),
            secret: config.secret.clone().filter(|s| !s.is_empty()),
        }
    }

    pub async fn send(&self, content: &str) -> Result<(), NotifyError> {
        let mut query = vec![("access_token", self.access_token.clone())];
        if let Some(secret) = &self.secret {
            let timestamp = chrono::Utc::now().timestamp_millis();
            query.push(("timestamp", timestamp.to_string()));
            query.push(("sign", sign(secret, timestamp)?));
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .query(&query)
            .json(&text_payload(content))
            .send()
            .await?;
        check_reply(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_base64_hmac_of_timestamp_and_secret() {
        let secret = "SECtest-secret";
        let timestamp = 1_700_000_000_000;
        let signature = sign(secret, timestamp).unwrap();

        let raw = STANDARD.decode(&signature).unwrap();
        assert_eq!(raw.len(), 32);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"1700000000000\nSECtest-secret");
        mac.verify_slice(&raw).unwrap();
    }

    #[test]
    fn sign_changes_with_timestamp() {
        let a = sign("SEC1", 1).unwrap();
        let b = sign("SEC1", 2).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, sign("SEC1", 1).unwrap());
    }
}
