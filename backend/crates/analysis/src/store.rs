use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use labelcheck_common::error::{LabelError, LabelResult};
use labelcheck_db::sessions::models::{
    Iteration, IterationContent, IterationType, NewIteration, Session, SessionFilter,
};
use labelcheck_db::sessions::repositories::SessionRepository;

/// Who a session read or write is performed for.
///
/// `Elevated` skips the owner check. It exists for callers that already
/// authenticated the acting user some other way (e.g. a session created
/// under a service identity), and must say why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Owner(Uuid),
    Elevated { reason: &'static str },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionWithIterations {
    pub session: Session,
    pub iterations: Vec<Iteration>,
}

/// Ownership-checked front of the session repository.
#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    pub async fn create_session(&self, owner: Uuid) -> LabelResult<Session> {
        let session = self.repo.create_session(Session::new(owner)).await?;
        tracing::info!(session_id = %session.id, user_id = %owner, "session created");
        Ok(session)
    }

    pub async fn list_sessions(
        &self,
        owner: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> LabelResult<Vec<Session>> {
        self.repo
            .list_sessions(SessionFilter {
                user_id: Some(owner),
                limit,
                offset,
            })
            .await
    }

    /// Load the session and check `access` against its owner.
    pub async fn authorize(&self, session_id: Uuid, access: Access) -> LabelResult<Session> {
        let session = self
            .repo
            .get_session(session_id)
            .await?
            .ok_or_else(|| LabelError::NotFound(format!("session {session_id}")))?;

        match access {
            Access::Owner(user_id) if user_id == session.user_id => Ok(session),
            Access::Owner(user_id) => {
                tracing::warn!(%session_id, %user_id, "session access denied");
                Err(LabelError::Authorization(format!(
                    "session {session_id} belongs to another user"
                )))
            }
            Access::Elevated { reason } => {
                tracing::info!(%session_id, reason, "elevated session access");
                Ok(session)
            }
        }
    }

    pub async fn get_session_with_iterations(
        &self,
        session_id: Uuid,
        access: Access,
    ) -> LabelResult<SessionWithIterations> {
        let session = self.authorize(session_id, access).await?;
        let iterations = self.repo.list_iterations(session_id).await?;
        Ok(SessionWithIterations {
            session,
            iterations,
        })
    }

    /// Append one iteration. Nothing is written unless the caller may write
    /// to the session and the parent, if any, lives in the same session.
    pub async fn add_iteration(
        &self,
        session_id: Uuid,
        content: IterationContent,
        file_ref: Option<String>,
        parent_iteration_id: Option<Uuid>,
        access: Access,
    ) -> LabelResult<Iteration> {
        self.authorize(session_id, access).await?;

        if let Some(parent_id) = parent_iteration_id {
            if self.repo.get_iteration(session_id, parent_id).await?.is_none() {
                return Err(LabelError::Validation(format!(
                    "parent iteration {parent_id} is not part of session {session_id}"
                )));
            }
        }

        let iteration_type = content.iteration_type();
        let iteration = self
            .repo
            .insert_iteration(NewIteration {
                id: Uuid::new_v4(),
                session_id,
                content,
                file_ref,
                parent_iteration_id,
            })
            .await?;

        tracing::info!(
            %session_id,
            iteration_id = %iteration.id,
            iteration_type = iteration_type.as_str(),
            sequence = iteration.sequence,
            "iteration stored"
        );
        Ok(iteration)
    }

    pub async fn latest_iteration_of_types(
        &self,
        session_id: Uuid,
        types: &[IterationType],
        access: Access,
    ) -> LabelResult<Option<Iteration>> {
        self.authorize(session_id, access).await?;
        self.repo.latest_iteration_of_types(session_id, types).await
    }
}
