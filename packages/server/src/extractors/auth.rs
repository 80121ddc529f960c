use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

use crate::config::PermissionSet;
use crate::entity::auth;
use crate::error::AppError;
use crate::state::AppState;
use crate::utils::hash;

/// Principal resolved from `Authorization: Basic <id:token>`.
///
/// Add this as a handler parameter to require authentication.
/// Permission checks happen via `require()` in the handler body.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub permissions: PermissionSet,
}

/// A single permission flag on an auth row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Crs,
    CompetitionManagement,
    JobRunner,
}

impl PermissionSet {
    pub fn has(&self, permission: Permission) -> bool {
        match permission {
            Permission::Crs => self.crs,
            Permission::CompetitionManagement => self.competition_management,
            Permission::JobRunner => self.job_runner,
        }
    }
}

impl AuthUser {
    /// Returns `Ok(())` if the principal holds every permission in `needed`.
    pub fn require(&self, needed: &[Permission]) -> Result<(), AppError> {
        if needed.iter().all(|p| self.permissions.has(*p)) {
            Ok(())
        } else {
            Err(AppError::PermissionDenied)
        }
    }
}

/// Split a Basic credential into `(id, token)`.
fn parse_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, token) = decoded.split_once(':')?;
    Some((id.to_string(), token.to_string()))
}

async fn verify_blocking(token: String, stored: Option<String>) -> bool {
    tokio::task::spawn_blocking(move || match stored {
        Some(stored) => hash::verify_token(&token, &stored),
        None => {
            hash::verify_dummy(&token);
            false
        }
    })
    .await
    .unwrap_or(false)
}

/// Upgrade a hash made with outdated parameters. Failure only costs the
/// upgrade.
async fn rehash(state: &AppState, row: &auth::Model, token: String) {
    let Ok(Ok(new_hash)) = tokio::task::spawn_blocking(move || hash::hash_token(&token)).await
    else {
        tracing::warn!(auth_id = %row.id, "failed to rehash token");
        return;
    };
    let update = auth::ActiveModel {
        id: Set(row.id),
        token_hash: Set(new_hash),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    if let Err(e) = update.update(&state.db).await {
        tracing::warn!(auth_id = %row.id, error = %e, "failed to persist rehashed token");
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credentials = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_basic);

        // Every rejection path performs one lookup and one hash verification
        // so response time does not reveal why a request was refused.
        let (id, token) = match credentials {
            Some((id, token)) => (Uuid::parse_str(&id).ok(), token),
            None => (None, String::new()),
        };
        let row = auth::Entity::find_by_id(id.unwrap_or(Uuid::nil()))
            .one(&state.db)
            .await?
            .filter(|row| id.is_some() && row.active);

        let valid = verify_blocking(token.clone(), row.as_ref().map(|r| r.token_hash.clone())).await;
        let Some(row) = row.filter(|_| valid) else {
            return Err(AppError::Unauthorized);
        };

        if hash::needs_rehash(&row.token_hash) {
            rehash(state, &row, token).await;
        }

        Ok(AuthUser {
            id: row.id,
            permissions: PermissionSet {
                crs: row.crs,
                competition_management: row.competition_management,
                job_runner: row.job_runner,
            },
        })
    }
}
