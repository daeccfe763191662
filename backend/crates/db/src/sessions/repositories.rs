use async_trait::async_trait;
use uuid::Uuid;

use crate::sessions::models::{Iteration, IterationType, NewIteration, Session, SessionFilter};
use labelcheck_common::error::LabelResult;

/// Raw persistence for sessions and their iterations. Ownership checks are
/// not done here; callers go through the analysis crate's session store.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: Session) -> LabelResult<Session>;
    async fn get_session(&self, id: Uuid) -> LabelResult<Option<Session>>;
    async fn list_sessions(&self, filter: SessionFilter) -> LabelResult<Vec<Session>>;

    /// All iterations of a session in insertion (sequence) order.
    async fn list_iterations(&self, session_id: Uuid) -> LabelResult<Vec<Iteration>>;

    async fn get_iteration(&self, session_id: Uuid, id: Uuid) -> LabelResult<Option<Iteration>>;

    /// Append one iteration. Assigns the next sequence number and a
    /// `created_at` no earlier than the session's latest iteration.
    async fn insert_iteration(&self, iteration: NewIteration) -> LabelResult<Iteration>;

    /// Highest-sequence iteration whose type is one of `types`.
    async fn latest_iteration_of_types(
        &self,
        session_id: Uuid,
        types: &[IterationType],
    ) -> LabelResult<Option<Iteration>>;
}
