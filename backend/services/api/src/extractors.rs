use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use labelcheck_common::error::LabelError;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

/// Header set by the identity proxy in front of the service.
pub const USER_HEADER: &str = "X-User-Id";

/// The internal user behind the caller's external identity.
pub struct CurrentUser(pub Uuid);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let external_id = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| LabelError::Authentication(format!("missing {USER_HEADER} header")))?
            .to_str()
            .map_err(|_| LabelError::Authentication(format!("invalid {USER_HEADER} header")))?
            .trim();
        if external_id.is_empty() {
            return Err(LabelError::Authentication(format!("empty {USER_HEADER} header")).into());
        }

        let user = state
            .users
            .lookup_by_external_id(external_id)
            .await?
            .ok_or_else(|| LabelError::Authentication("unknown user".to_string()))?;

        Ok(CurrentUser(user.id))
    }
}
