use crate::error::{DigestError, Result};
use crate::format::{Currency, Locale};
use crate::storage_utils::AsyncStorageManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::Mutex;

const SUBSCRIBERS_FILE: &str = "subscribers";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Basic,
    #[default]
    Pro,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Plan::Basic => "basic",
            Plan::Pro => "pro",
        })
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Plan::Basic),
            "pro" => Ok(Plan::Pro),
            other => Err(format!("unknown plan {:?}", other)),
        }
    }
}

/// One row of the subscriber store, keyed by email.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub email: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub locale: Locale,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_customer_id: Option<String>,
}

impl Subscriber {
    pub fn new(email: impl Into<String>, plan: Plan, currency: Currency, locale: Locale) -> Self {
        Self {
            email: email.into(),
            active: true,
            plan,
            currency,
            locale,
            stripe_id: None,
            stripe_customer_id: None,
        }
    }
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>>;
    async fn get(&self, email: &str) -> Result<Option<Subscriber>>;
    /// Inserts or replaces the row with the same email, stored trimmed and lowercased.
    async fn upsert(&self, subscriber: Subscriber) -> Result<()>;
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Subscriber table kept as `subscribers.json` in the storage directory.
pub struct JsonSubscriberStore {
    storage: AsyncStorageManager,
    // serializes read-modify-write cycles of upsert
    write_lock: Mutex<()>,
}

impl JsonSubscriberStore {
    pub fn new(storage: AsyncStorageManager) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    async fn load_all(&self) -> Result<Vec<Subscriber>> {
        self.storage
            .load_or_default::<Vec<Subscriber>>(SUBSCRIBERS_FILE)
            .await
            .map_err(|e| DigestError::Store(format!("{:#}", e)))
    }

    pub async fn all(&self) -> Result<Vec<Subscriber>> {
        self.load_all().await
    }
}

#[async_trait]
impl SubscriberStore for JsonSubscriberStore {
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>> {
        Ok(self.load_all().await?.into_iter().filter(|s| s.active).collect())
    }

    async fn get(&self, email: &str) -> Result<Option<Subscriber>> {
        let wanted = normalize_email(email);
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|s| normalize_email(&s.email) == wanted))
    }

    async fn upsert(&self, mut subscriber: Subscriber) -> Result<()> {
        let email = normalize_email(&subscriber.email);
        if email.is_empty() || !email.contains('@') {
            return Err(DigestError::Store(format!("invalid email {:?}", subscriber.email)));
        }
        subscriber.email = email;

        let _guard = self.write_lock.lock().await;
        let mut all = self.load_all().await?;
        match all
            .iter_mut()
            .find(|s| normalize_email(&s.email) == subscriber.email)
        {
            Some(existing) => *existing = subscriber,
            None => all.push(subscriber),
        }

        self.storage
            .save(SUBSCRIBERS_FILE, &all)
            .await
            .map_err(|e| DigestError::Store(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let store = JsonSubscriberStore::new(AsyncStorageManager::new(dir.path()).await.unwrap());
        assert!(store.active_subscribers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_defaults_and_active_filter() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("subscribers.json"),
            r#"[
                {"email": "a@example.com", "active": true},
                {"email": "b@example.com", "active": false, "plan": "basic"},
                {"email": "c@example.com", "active": true, "plan": "basic", "currency": "EUR", "locale": "de-DE", "stripe_customer_id": "cus_123"}
            ]"#,
        )
        .unwrap();
        let store = JsonSubscriberStore::new(AsyncStorageManager::new(dir.path()).await.unwrap());

        let active = store.active_subscribers().await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].plan, Plan::Pro);
        assert_eq!(active[0].currency, Currency::Usd);
        assert_eq!(active[0].locale, Locale::EnUs);
        assert_eq!(active[1].currency, Currency::Eur);
        assert_eq!(active[1].stripe_customer_id.as_deref(), Some("cus_123"));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_email() {
        let dir = tempdir().unwrap();
        let store = JsonSubscriberStore::new(AsyncStorageManager::new(dir.path()).await.unwrap());

        store
            .upsert(Subscriber::new("x@example.com", Plan::Basic, Currency::Gbp, Locale::EnGb))
            .await
            .unwrap();
        let mut updated = Subscriber::new("X@example.com", Plan::Pro, Currency::Gbp, Locale::EnGb);
        updated.active = false;
        store.upsert(updated).await.unwrap();

        let row = store.get("x@example.com").await.unwrap().unwrap();
        assert_eq!(row.plan, Plan::Pro);
        assert!(!row.active);
        assert_eq!(store.all().await.unwrap().len(), 1);
        assert!(store.active_subscribers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_stores_normalized_email() {
        let dir = tempdir().unwrap();
        let store = JsonSubscriberStore::new(AsyncStorageManager::new(dir.path()).await.unwrap());

        store
            .upsert(Subscriber::new(" A@Example.com ", Plan::Basic, Currency::Usd, Locale::EnUs))
            .await
            .unwrap();
        store
            .upsert(Subscriber::new("a@example.com", Plan::Pro, Currency::Eur, Locale::FrFr))
            .await
            .unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].email, "a@example.com");
        assert_eq!(all[0].plan, Plan::Pro);
        assert!(store.get("a@example.com").await.unwrap().is_some());
        assert!(store.get(" A@EXAMPLE.COM").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_rejects_bad_email() {
        let dir = tempdir().unwrap();
        let store = JsonSubscriberStore::new(AsyncStorageManager::new(dir.path()).await.unwrap());
        let err = store
            .upsert(Subscriber::new("not-an-email", Plan::Pro, Currency::Usd, Locale::EnUs))
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::Store(_)));
    }
}
