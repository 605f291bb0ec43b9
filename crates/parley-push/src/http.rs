use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use parley_core::ids::UserId;
use parley_core::push::{PushError, PushGateway, PushPayload};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Push gateway speaking a plain `POST {base_url}/push` with a bearer
/// token. One attempt per payload; retrying is the caller's concern.
pub struct HttpPushGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl HttpPushGateway {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PushError(format!("client build: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send_push(&self, user_id: &UserId, payload: &PushPayload) -> Result<(), PushError> {
        let url = format!("{}/push", self.base_url);
        let body = serde_json::json!({
            "user_id": user_id,
            "title": payload.title,
            "body": payload.body,
            "data": payload.data,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| PushError(format!("request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PushError(format!("gateway returned {status}: {text}")));
        }

        tracing::debug!(user_id = %user_id, "push accepted by gateway");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_normalized() {
        let gw = HttpPushGateway::new("https://push.example.com/", SecretString::from("k")).unwrap();
        assert_eq!(gw.base_url, "https://push.example.com");
    }
}
