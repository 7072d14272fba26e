//! Name-only login backed by a random session token in a cookie.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::{json, Value};
use tally_store::{Database, UserRepo, UserRow, VoteRepo};
use tracing::{info, instrument};

use super::{blocking, ApiError, ApiState};

pub const SESSION_COOKIE: &str = "voting-session";
pub const MAX_NAME_LEN: usize = 20;

/// Validate the `name` field of a login body and return it trimmed.
pub fn validate_name(body: &Value) -> Result<String, ApiError> {
    let name = match body.get("name") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => return Err(ApiError::MissingName),
        Some(Value::String(s)) if s.is_empty() => return Err(ApiError::MissingName),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => return Err(ApiError::MissingName),
        Some(Value::String(s)) => s,
        Some(_) => return Err(ApiError::InvalidNameType),
    };
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ApiError::EmptyName);
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::NameTooLong { max: MAX_NAME_LEN });
    }
    Ok(trimmed.to_string())
}

fn session_cookie(token: &str, max_age_secs: u64) -> Result<Cookie<'static>, ApiError> {
    Cookie::parse(format!(
        "{SESSION_COOKIE}={token}; Max-Age={max_age_secs}; Path=/; HttpOnly; SameSite=Lax"
    ))
    .map_err(|e| ApiError::Internal(format!("session cookie: {e}")))
}

/// Raw session token from the request cookie.
pub(crate) fn session_token(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|c| c.value().to_owned())
}

/// User owning `token`, if any. Runs store queries; call from the blocking pool.
pub(crate) fn session_user(db: &Database, token: Option<&str>) -> Result<Option<UserRow>, ApiError> {
    let Some(token) = token else {
        return Ok(None);
    };
    UserRepo::new(db.clone())
        .find_by_session(token)
        .map_err(|e| ApiError::database("Failed to validate session", e))
}

/// POST /api/auth/login
#[instrument(skip_all)]
pub async fn login(
    State(state): State<ApiState>,
    jar: CookieJar,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let Json(body) =
        body.map_err(|e| ApiError::InvalidInput(format!("Request body must be JSON: {e}")))?;
    let name = validate_name(&body)?;

    let db = state.db.clone();
    let (user, token, has_voted) = blocking(move || {
        let (user, token) = UserRepo::new(db.clone())
            .create_session(&name)
            .map_err(ApiError::SessionCreationFailed)?;
        let has_voted = VoteRepo::new(db)
            .has_voted(user.id)
            .map_err(ApiError::SessionCreationFailed)?;
        Ok((user, token, has_voted))
    })
    .await?;
    let cookie = session_cookie(token.as_str(), state.session_max_age_secs)?;

    info!(user_id = user.id, has_voted, "user logged in");
    Ok((
        jar.add(cookie),
        Json(json!({
            "success": true,
            "user": { "id": user.id, "name": user.name, "hasVoted": has_voted },
            "sessionId": token.into_string(),
        })),
    ))
}

/// POST /api/auth/logout
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<ApiState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    if let Some(token) = session_token(&jar) {
        let revoked = blocking(move || {
            UserRepo::new(state.db)
                .clear_session(&token)
                .map_err(|e| ApiError::database("Failed to logout", e))
        })
        .await?;
        info!(revoked, "session logged out");
    }
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));
    Ok((
        jar,
        Json(json!({ "success": true, "message": "Logged out successfully" })),
    ))
}

/// GET /api/auth/session
pub async fn session(State(state): State<ApiState>, jar: CookieJar) -> Result<Response, ApiError> {
    let token = session_token(&jar);
    let found = blocking(move || {
        let Some(user) = session_user(&state.db, token.as_deref())? else {
            return Ok(None);
        };
        let has_voted = VoteRepo::new(state.db)
            .has_voted(user.id)
            .map_err(|e| ApiError::database("Failed to validate session", e))?;
        Ok(Some((user, has_voted)))
    })
    .await?;

    let Some((user, has_voted)) = found else {
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "valid": false,
                "error": { "code": "INVALID_SESSION", "message": "No valid session found" }
            })),
        )
            .into_response());
    };
    Ok(Json(json!({
        "valid": true,
        "user": { "id": user.id, "name": user.name },
        "hasVoted": has_voted,
    }))
    .into_response())
}
