use crate::error::{DigestError, Result};
use crate::storage_utils::AsyncStorageManager;
use async_trait::async_trait;
use chrono::NaiveDate;

const DIGEST_DIR: &str = "digests";

#[async_trait]
pub trait DigestArchive: Send + Sync {
    /// Stores `html` for `date` unless that date is already archived.
    /// Returns whether a new entry was written.
    async fn insert_if_absent(&self, date: NaiveDate, html: &str) -> Result<bool>;
    async fn get(&self, date: NaiveDate) -> Result<Option<String>>;
    /// Archived dates, newest first.
    async fn dates(&self) -> Result<Vec<NaiveDate>>;
}

/// One `digests/YYYY-MM-DD.html` file per day.
pub struct FileArchive {
    storage: AsyncStorageManager,
}

impl FileArchive {
    pub fn new(storage: AsyncStorageManager) -> Self {
        Self { storage }
    }

    fn path_for(date: NaiveDate) -> String {
        format!("{}/{}.html", DIGEST_DIR, date.format("%Y-%m-%d"))
    }
}

fn store_err(e: anyhow::Error) -> DigestError {
    DigestError::Store(format!("{:#}", e))
}

#[async_trait]
impl DigestArchive for FileArchive {
    async fn insert_if_absent(&self, date: NaiveDate, html: &str) -> Result<bool> {
        self.storage
            .write_new(&Self::path_for(date), html.as_bytes())
            .await
            .map_err(store_err)
    }

    async fn get(&self, date: NaiveDate) -> Result<Option<String>> {
        self.storage.read_text(&Self::path_for(date)).await.map_err(store_err)
    }

    async fn dates(&self) -> Result<Vec<NaiveDate>> {
        let names = self.storage.list_dir(DIGEST_DIR).await.map_err(store_err)?;
        let mut dates: Vec<NaiveDate> = names
            .iter()
            .filter_map(|n| n.strip_suffix(".html"))
            .filter_map(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok())
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[tokio::test]
    async fn test_second_insert_same_day_is_noop() {
        let dir = tempdir().unwrap();
        let archive = FileArchive::new(AsyncStorageManager::new(dir.path()).await.unwrap());

        assert!(archive.insert_if_absent(day(16), "<p>first</p>").await.unwrap());
        assert!(!archive.insert_if_absent(day(16), "<p>second</p>").await.unwrap());

        assert_eq!(archive.get(day(16)).await.unwrap().as_deref(), Some("<p>first</p>"));
        assert_eq!(archive.dates().await.unwrap(), vec![day(16)]);
    }

    #[tokio::test]
    async fn test_dates_newest_first_and_missing_get() {
        let dir = tempdir().unwrap();
        let archive = FileArchive::new(AsyncStorageManager::new(dir.path()).await.unwrap());

        for d in [3, 15, 9] {
            archive.insert_if_absent(day(d), "x").await.unwrap();
        }
        std::fs::write(dir.path().join("digests").join("notes.txt"), "ignore me").unwrap();

        assert_eq!(archive.dates().await.unwrap(), vec![day(15), day(9), day(3)]);
        assert_eq!(archive.get(day(1)).await.unwrap(), None);
    }
}
