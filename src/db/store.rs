use anyhow::Result;
use async_trait::async_trait;

use super::connection::Database;
use crate::models::{ActiveCheckpoint, RecordUpdate, SessionRecord};

/// Persistence boundary of the monitoring engine.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn persist(&self, record: &SessionRecord) -> Result<()>;

    async fn latest(&self) -> Result<Option<SessionRecord>>;

    async fn update(&self, record_id: &str, update: RecordUpdate) -> Result<SessionRecord>;

    async fn save_checkpoint(&self, checkpoint: &ActiveCheckpoint) -> Result<()>;

    async fn load_checkpoint(&self) -> Result<Option<ActiveCheckpoint>>;

    async fn clear_checkpoint(&self, session_id: &str) -> Result<()>;
}

#[async_trait]
impl SessionStore for Database {
    async fn persist(&self, record: &SessionRecord) -> Result<()> {
        self.insert_record(record).await
    }

    async fn latest(&self) -> Result<Option<SessionRecord>> {
        self.latest_record().await
    }

    async fn update(&self, record_id: &str, update: RecordUpdate) -> Result<SessionRecord> {
        self.update_record(record_id, update).await
    }

    async fn save_checkpoint(&self, checkpoint: &ActiveCheckpoint) -> Result<()> {
        Database::save_checkpoint(self, checkpoint).await
    }

    async fn load_checkpoint(&self) -> Result<Option<ActiveCheckpoint>> {
        Database::load_checkpoint(self).await
    }

    async fn clear_checkpoint(&self, session_id: &str) -> Result<()> {
        Database::clear_checkpoint(self, session_id).await
    }
}
