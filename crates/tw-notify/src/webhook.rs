use crate::NotifyError;
use serde::Deserialize;

/// Reply body shared by the WeCom and DingTalk robot APIs.
#[derive(Debug, Deserialize)]
struct WebhookReply {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

pub(crate) fn text_payload(content: &str) -> serde_json::Value {
    serde_json::json!({
        "msgtype": "text",
        "text": { "content": content }
    })
}

/// Maps a robot API response to success only when `errcode == 0`.
pub(crate) async fn check_reply(resp: reqwest::Response) -> Result<(), NotifyError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(NotifyError::Status(status.as_u16()));
    }
    let reply: WebhookReply = resp.json().await?;
    if reply.errcode == 0 {
        Ok(())
    } else {
        Err(NotifyError::Rejected {
            code: reply.errcode,
            message: reply.errmsg,
        })
    }
}
