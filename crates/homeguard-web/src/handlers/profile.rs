//! Current user profile

use crate::auth::AuthenticatedUser;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Profile of the authenticated caller
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    /// Login name, empty for vendor tokens
    pub name: String,
}

/// Get the current user profile
///
/// With authentication bypassed (first run, no users) there is no identity
/// and the name is empty.
#[utoipa::path(
    get,
    path = "/control/profile",
    tag = "auth",
    responses(
        (status = 200, description = "Current user profile", body = ProfileResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    )
)]
pub async fn profile_handler(
    user: Option<Extension<AuthenticatedUser>>,
) -> Json<ProfileResponse> {
    let name = user
        .map(|Extension(user)| user.name().to_string())
        .unwrap_or_default();

    Json(ProfileResponse { name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthMethod, Login};

    #[tokio::test]
    async fn test_profile_name() {
        let user = AuthenticatedUser {
            login: Some(Login::from("admin")),
            method: AuthMethod::Session,
        };

        let Json(profile) = profile_handler(Some(Extension(user))).await;
        assert_eq!(profile.name, "admin");

        let Json(profile) = profile_handler(None).await;
        assert_eq!(profile.name, "");
    }
}
