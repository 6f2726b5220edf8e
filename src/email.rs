use crate::error::{DigestError, Result};
use crate::storage_utils::EmailConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Resend HTTP API.
pub struct ResendMailer {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ResendMailer {
    pub fn new(api_key: String, config: &EmailConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await
            .map_err(|e| DigestError::Email(format!("{}: {}", email.to, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DigestError::Email(format!("{} rejected with {}: {}", email.to, status, body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_field_names() {
        let email = OutgoingEmail {
            from: "MetalDetectors <signals@metaldetectors.info>".to_string(),
            to: "a@example.com".to_string(),
            subject: "Daily Signals: XAG".to_string(),
            html: "<p>hi</p>".to_string(),
        };
        let json = serde_json::to_value(&email).unwrap();
        assert_eq!(json["to"], "a@example.com");
        assert_eq!(json["subject"], "Daily Signals: XAG");
        assert_eq!(json.as_object().unwrap().len(), 4);
    }
}
