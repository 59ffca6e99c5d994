use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::cookies::{
    read_access_token, read_cookie, read_header, SessionCookies, CSRF_HEADER, CSRF_TOKEN_COOKIE,
    REFRESH_TOKEN_COOKIE,
};
use crate::auth::jwt::Claims;
use crate::db::models::SessionResponse;
use crate::error::{AppError, AuthError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Runs `operation` under the configured request deadline. Dropping the future
/// on expiry cancels any store call still in flight.
async fn with_deadline<T, F>(state: &AppState, operation: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    let deadline = Duration::from_secs(state.config.server.request_timeout_secs);
    tokio::time::timeout(deadline, operation)
        .await
        .map_err(|_| AppError::Timeout)?
}

fn authenticate(req: &HttpRequest, state: &AppState) -> Result<Claims, AppError> {
    let token = read_access_token(req).ok_or(AuthError::InvalidToken)?;
    state.auth_service.validate_access_token(&token)
}

fn require_csrf(req: &HttpRequest, state: &AppState) -> Result<(), AppError> {
    let cookie = read_cookie(req, CSRF_TOKEN_COOKIE);
    let header = read_header(req, CSRF_HEADER);
    let refresh = read_cookie(req, REFRESH_TOKEN_COOKIE);
    state
        .csrf
        .check(cookie.as_deref(), header.as_deref(), refresh.as_deref())
        .map_err(|e| {
            warn!(path = %req.path(), "CSRF check failed");
            e
        })
}

fn session_response(
    state: &AppState,
    access_token: &str,
    refresh_token: &str,
    mut response: actix_web::HttpResponseBuilder,
) -> actix_web::HttpResponseBuilder {
    let csrf_token = state.csrf.issue_for(refresh_token);
    state.cookies.set_session(
        &mut response,
        SessionCookies {
            access_token,
            refresh_token,
            csrf_token: &csrf_token,
            access_ttl_secs: state.auth_service.access_token_ttl().num_seconds(),
            refresh_ttl_secs: state.auth_service.refresh_token_ttl().num_seconds(),
        },
    );
    response
}

pub async fn register(
    req: web::Json<CredentialsRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for email: {}", req.email);

    let user = with_deadline(&state, state.auth_service.register(&req.email, &req.password)).await?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "registration successful",
        "user": user.to_response(),
    })))
}

pub async fn login(
    req: web::Json<CredentialsRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received login request for email: {}", req.email);

    let result = with_deadline(&state, state.auth_service.login(&req.email, &req.password)).await?;

    let mut response = session_response(
        &state,
        &result.access_token,
        &result.refresh_token,
        HttpResponse::Ok(),
    );
    Ok(response.json(serde_json::json!({
        "message": "login successful",
        "user": result.user.to_response(),
    })))
}

pub async fn refresh(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let presented = read_cookie(&req, REFRESH_TOKEN_COOKIE).ok_or(AuthError::InvalidToken)?;

    let pair = with_deadline(&state, state.auth_service.refresh_access_token(&presented)).await?;

    let mut response = session_response(
        &state,
        &pair.access_token,
        &pair.refresh_token,
        HttpResponse::Ok(),
    );
    Ok(response.json(serde_json::json!({
        "message": "token refreshed successfully"
    })))
}

pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    require_csrf(&req, &state)?;

    // No refresh cookie means the client is already logged out
    if let Some(refresh_token) = read_cookie(&req, REFRESH_TOKEN_COOKIE) {
        with_deadline(&state, state.auth_service.logout(&refresh_token)).await?;
    }

    let mut response = HttpResponse::Ok();
    state.cookies.clear_session(&mut response);
    Ok(response.json(serde_json::json!({
        "message": "logged out successfully"
    })))
}

pub async fn logout_all(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let claims = authenticate(&req, &state)?;
    require_csrf(&req, &state)?;

    let revoked = with_deadline(&state, state.auth_service.logout_all(claims.user_id)).await?;

    let mut response = HttpResponse::Ok();
    state.cookies.clear_session(&mut response);
    Ok(response.json(serde_json::json!({
        "message": "all sessions revoked",
        "revoked": revoked,
    })))
}

pub async fn me(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let claims = authenticate(&req, &state)?;
    let user = with_deadline(&state, state.auth_service.get_user(claims.user_id)).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "user": user.to_response()
    })))
}

pub async fn sessions(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let claims = authenticate(&req, &state)?;
    let sessions: Vec<SessionResponse> =
        with_deadline(&state, state.auth_service.active_sessions(claims.user_id))
            .await?
            .iter()
            .map(|token| token.to_session())
            .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "sessions": sessions
    })))
}
