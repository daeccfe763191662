use async_trait::async_trait;

use crate::regulatory::models::RegulatoryDocument;
use labelcheck_common::error::LabelResult;

#[async_trait]
pub trait RegulatoryRepository: Send + Sync {
    /// Documents flagged active, in no guaranteed order.
    async fn list_active_documents(&self) -> LabelResult<Vec<RegulatoryDocument>>;
}
