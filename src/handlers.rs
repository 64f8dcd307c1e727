use crate::auth::TokenService;
use crate::auth_event;
use crate::blacklist::BlacklistStore;
use crate::config::JwtConfig;
use crate::database::UserDirectory;
use crate::errors::{with_deadline, ApiError, StoreError};
use crate::idm_client::SERVICE_KEY_HEADER;
use crate::metrics::{metrics_handler, BLACKLIST_OPERATIONS, LOGIN_ATTEMPTS};
use crate::middleware::Authenticated;
use crate::models::*;
use crate::password::{PasswordError, PasswordHasher};
use crate::redis_cache::RedisStore;
use actix_web::cookie::{time::Duration as CookieDuration, Cookie};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use validator::Validate;

pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub hasher: PasswordHasher,
    pub blacklist: Arc<dyn BlacklistStore>,
    pub directory: Arc<dyn UserDirectory>,
    /// Pinged by `/health`; absent when the blacklist is not Redis-backed.
    pub redis: Option<RedisStore>,
    pub jwt: JwtConfig,
    pub backend_timeout: Duration,
    /// Expected in `x-service-key` on `/internal` routes; `None` closes them.
    pub service_key: Option<String>,
}

/// Route table of the identity service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/idm/register", web::post().to(register))
        .route("/idm/login", web::post().to(login))
        .route("/idm/logout", web::post().to(logout))
        .route("/idm/me", web::get().to(whoami))
        .route("/idm/user/{user_id}/password", web::put().to(update_password))
        .route("/idm/user/{user_id}/role", web::put().to(update_role))
        .route("/idm/blacklist", web::post().to(add_to_blacklist))
        .route("/idm/blacklist/{user_id}", web::get().to(check_blacklist))
        .route("/idm/blacklist/{user_id}", web::delete().to(remove_from_blacklist))
        .route("/internal/blacklist/{user_id}", web::get().to(internal_check_blacklist));
}

fn info_response(info: Info) -> HttpResponse {
    let status = StatusCode::from_u16(info.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(info)
}

fn enhanced_response(info: Info, rows_affected: u64) -> HttpResponse {
    let status = StatusCode::from_u16(info.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(EnhancedInfo { info, rows_affected })
}

/// Byte comparison that does not stop at the first mismatch.
fn keys_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

// ============ Health Check ============

pub async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let redis = match &state.redis {
        None => "not configured",
        Some(store) => {
            let ping = async { store.health_check().await.map_err(StoreError::from) };
            match with_deadline(state.backend_timeout, ping).await {
                Ok(true) => "connected",
                _ => "disconnected",
            }
        }
    };

    let body = serde_json::json!({
        "status": if redis == "disconnected" { "unhealthy" } else { "healthy" },
        "redis": redis,
        "timestamp": Utc::now().to_rfc3339()
    });

    if redis == "disconnected" {
        HttpResponse::ServiceUnavailable().json(body)
    } else {
        HttpResponse::Ok().json(body)
    }
}

// ============ Authentication Handlers ============

pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate()?;

    let username = body.username.trim();
    let password_hash = state
        .hasher
        .hash(&body.password)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let Some(user_id) = state.directory.create(username, &password_hash, body.role).await? else {
        return Err(ApiError::Conflict(format!("username {} is already taken", username)));
    };

    auth_event!("register", Some(user_id), true);

    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "user registered",
        "user_id": user_id,
        "role": body.role,
    })))
}

pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate()?;

    let Some(user) = state.directory.find_by_username(body.username.trim()).await? else {
        LOGIN_ATTEMPTS.with_label_values(&["unknown_user"]).inc();
        auth_event!("login", None::<i64>, false, "unknown user");
        return Err(ApiError::InvalidCredentials);
    };

    match state.hasher.verify(&user.password_hash, &body.password) {
        Ok(()) => {}
        Err(PasswordError::Mismatch) => {
            LOGIN_ATTEMPTS.with_label_values(&["failure"]).inc();
            auth_event!("login", Some(user.id), false, "invalid credentials");
            return Err(ApiError::InvalidCredentials);
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    }

    // A blacklisted account stays locked out until an admin removes the entry
    let subject = user.id.to_string();
    if with_deadline(state.backend_timeout, state.blacklist.is_revoked(&subject)).await? {
        LOGIN_ATTEMPTS.with_label_values(&["blacklisted"]).inc();
        auth_event!("login", Some(user.id), false, "account blacklisted");
        return Err(ApiError::Forbidden("account is blacklisted".to_string()));
    }

    let token = state
        .tokens
        .issue(&subject, user.role, state.tokens.default_ttl())
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    LOGIN_ATTEMPTS.with_label_values(&["success"]).inc();
    auth_event!("login", Some(user.id), true);

    let cookie = Cookie::build(state.jwt.cookie_name.clone(), token.clone())
        .path(state.jwt.cookie_path.clone())
        .http_only(true)
        .secure(state.jwt.cookie_secure)
        .max_age(CookieDuration::seconds(state.jwt.cookie_max_age_secs))
        .finish();

    Ok(HttpResponse::Ok().cookie(cookie).json(LoginResponse {
        message: "login successful".to_string(),
        token,
    }))
}

/// Revokes the caller's own subject with the token it presented.
pub async fn logout(
    state: web::Data<AppState>,
    caller: Authenticated,
) -> Result<HttpResponse, ApiError> {
    let Authenticated(ctx) = caller;

    let created = with_deadline(state.backend_timeout, state.blacklist.add(&ctx.claims.sub, &ctx.token)).await?;
    BLACKLIST_OPERATIONS
        .with_label_values(&["add", if created { "created" } else { "exists" }])
        .inc();
    auth_event!("logout", Some(&ctx.claims.sub), true);

    let mut expired = Cookie::build(state.jwt.cookie_name.clone(), "")
        .path(state.jwt.cookie_path.clone())
        .http_only(true)
        .finish();
    expired.make_removal();

    Ok(HttpResponse::Ok().cookie(expired).json(Info::new(200, "logged out")))
}

pub async fn whoami(caller: Authenticated) -> impl Responder {
    let claims = caller.0.claims;
    HttpResponse::Ok().json(WhoAmI {
        subject: claims.sub,
        role: claims.role,
        expires_at: claims.exp,
    })
}

// ============ Credential Handlers ============

/// Users may change their own password; admins may change anyone's.
pub async fn update_password(
    state: web::Data<AppState>,
    caller: Authenticated,
    path: web::Path<i64>,
    body: web::Json<UpdatePasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate()?;
    let user_id = path.into_inner();
    let claims = &caller.0.claims;

    if claims.role != Role::Admin && claims.sub != user_id.to_string() {
        auth_event!("update_password", Some(&claims.sub), false, "not the account owner");
        return Err(ApiError::Forbidden("cannot change another user's password".to_string()));
    }

    let password_hash = state
        .hasher
        .hash(&body.password)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let rows_affected = state.directory.update_password(user_id, &password_hash).await?;

    if rows_affected == 0 {
        return Ok(enhanced_response(Info::new(404, format!("user {} not found", user_id)), 0));
    }

    auth_event!("update_password", Some(user_id), true);
    Ok(enhanced_response(Info::new(200, "password updated"), rows_affected))
}

/// Tokens already issued keep the old role until they expire or are blacklisted.
pub async fn update_role(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<UpdateRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    let rows_affected = state.directory.update_role(user_id, body.role).await?;

    if rows_affected == 0 {
        return Ok(enhanced_response(Info::new(404, format!("user {} not found", user_id)), 0));
    }

    info!(user_id, role = %body.role, "user role updated");
    Ok(enhanced_response(Info::new(200, format!("role set to {}", body.role)), rows_affected))
}

// ============ Blacklist Handlers ============

pub async fn add_to_blacklist(
    state: web::Data<AppState>,
    body: web::Json<BlacklistRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate()?;

    if !state.directory.exists(body.user_id).await? {
        return Ok(info_response(Info::new(404, format!("user {} not found", body.user_id))));
    }

    let user_id = body.user_id.to_string();
    let created = with_deadline(state.backend_timeout, state.blacklist.add(&user_id, &body.token)).await?;

    if created {
        BLACKLIST_OPERATIONS.with_label_values(&["add", "created"]).inc();
        info!(user_id = %user_id, "user blacklisted");
        Ok(info_response(Info::new(200, format!("user {} blacklisted", user_id))))
    } else {
        BLACKLIST_OPERATIONS.with_label_values(&["add", "exists"]).inc();
        Ok(info_response(Info::new(409, format!("user {} is already blacklisted", user_id))))
    }
}

pub async fn check_blacklist(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    blacklist_status(&state, path.into_inner()).await
}

/// Service-to-service check. No session token; the caller presents the shared key.
pub async fn internal_check_blacklist(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let presented = req
        .headers()
        .get(SERVICE_KEY_HEADER)
        .map(|value| value.as_bytes());

    let authorized = match (presented, state.service_key.as_deref()) {
        (Some(presented), Some(expected)) => keys_match(presented, expected.as_bytes()),
        _ => false,
    };
    if !authorized {
        warn!(path = %req.path(), "internal route called without a valid service key");
        return Ok(info_response(Info::new(401, "service key required")));
    }

    blacklist_status(&state, path.into_inner()).await
}

async fn blacklist_status(state: &AppState, user_id: i64) -> Result<HttpResponse, ApiError> {
    if !state.directory.exists(user_id).await? {
        return Ok(info_response(Info::new(404, format!("user {} not found", user_id))));
    }

    let revoked = with_deadline(state.backend_timeout, state.blacklist.is_revoked(&user_id.to_string())).await?;
    BLACKLIST_OPERATIONS
        .with_label_values(&["check", if revoked { "revoked" } else { "clear" }])
        .inc();

    if revoked {
        Ok(info_response(Info::new(403, "token revoked")))
    } else {
        Ok(info_response(Info::new(200, "token clear")))
    }
}

pub async fn remove_from_blacklist(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner().to_string();

    let rows_affected = with_deadline(state.backend_timeout, state.blacklist.remove(&user_id)).await?;

    let info = if rows_affected == 0 {
        BLACKLIST_OPERATIONS.with_label_values(&["remove", "absent"]).inc();
        warn!(user_id = %user_id, "restore requested for user that is not blacklisted");
        Info::new(404, format!("user {} is not blacklisted", user_id))
    } else {
        BLACKLIST_OPERATIONS.with_label_values(&["remove", "removed"]).inc();
        info!(user_id = %user_id, "user restored");
        Info::new(200, format!("user {} removed from blacklist", user_id))
    };

    Ok(enhanced_response(info, rows_affected))
}
