use async_trait::async_trait;

use crate::users::models::User;
use labelcheck_common::error::LabelResult;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn lookup_by_external_id(&self, external_id: &str) -> LabelResult<Option<User>>;
}
