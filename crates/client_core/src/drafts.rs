use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::protocol::PolicyDraft;
use storage::Storage;
use tokio::sync::Mutex;

/// Key of the persisted buy-form draft.
pub const DRAFT_KEY: &str = "policyDraft";

#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn save_draft(&self, draft: &PolicyDraft) -> Result<()>;
    async fn load_draft(&self) -> Result<Option<PolicyDraft>>;
    async fn clear_draft(&self) -> Result<()>;
}

/// Keeps the draft for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryDraftStore {
    draft: Mutex<Option<PolicyDraft>>,
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn save_draft(&self, draft: &PolicyDraft) -> Result<()> {
        *self.draft.lock().await = Some(draft.clone());
        Ok(())
    }

    async fn load_draft(&self) -> Result<Option<PolicyDraft>> {
        Ok(self.draft.lock().await.clone())
    }

    async fn clear_draft(&self) -> Result<()> {
        self.draft.lock().await.take();
        Ok(())
    }
}

#[async_trait]
impl DraftStore for Storage {
    async fn save_draft(&self, draft: &PolicyDraft) -> Result<()> {
        let blob = serde_json::to_string(draft).context("failed to encode policy draft")?;
        self.save_blob(DRAFT_KEY, &blob, draft.timestamp).await
    }

    async fn load_draft(&self) -> Result<Option<PolicyDraft>> {
        let Some(blob) = self.load_blob(DRAFT_KEY).await? else {
            return Ok(None);
        };
        let draft = serde_json::from_str(&blob.value).context("stored policy draft is not valid JSON")?;
        Ok(Some(draft))
    }

    async fn clear_draft(&self) -> Result<()> {
        self.delete_blob(DRAFT_KEY).await?;
        Ok(())
    }
}
