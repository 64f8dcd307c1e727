//! Per-request admission: policy lookup, then token extraction, signature and
//! claim verification, revocation and finally the role check. Each step runs
//! only if the one before it passed.

use crate::auth::{extract_bearer_token, TokenError, TokenService};
use crate::auth_event;
use crate::blacklist::{blacklist_key, RevocationCheck};
use crate::errors::{with_deadline, StoreError};
use crate::metrics::{ADMISSION_DECISIONS, STORE_ERRORS};
use crate::models::{Claims, ResponseData};
use crate::policy::{PolicyDecision, RoutePolicy};
use actix_web::http::{Method, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Verified caller identity handed to downstream handlers.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

#[derive(Debug)]
pub enum Admission {
    Exempt,
    Granted(AuthContext),
}

#[derive(Debug, Error)]
pub enum Rejection {
    #[error("missing token")]
    MissingToken,
    #[error("{0}")]
    InvalidToken(#[from] TokenError),
    #[error("token revoked")]
    Revoked,
    #[error("insufficient role")]
    RoleDenied,
    #[error("no access policy for this route")]
    NoPolicy,
    #[error("auth backend error: {0}")]
    Backend(#[from] StoreError),
    #[error("rate limit exceeded")]
    RateLimited,
}

impl Rejection {
    pub fn outcome(&self) -> &'static str {
        match self {
            Rejection::MissingToken => "missing_token",
            Rejection::InvalidToken(_) => "invalid_token",
            Rejection::Revoked => "revoked",
            Rejection::RoleDenied => "role_denied",
            Rejection::NoPolicy => "no_policy",
            Rejection::Backend(_) => "backend_error",
            Rejection::RateLimited => "rate_limited",
        }
    }
}

impl ResponseError for Rejection {
    fn status_code(&self) -> StatusCode {
        match self {
            Rejection::MissingToken | Rejection::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Rejection::Revoked | Rejection::RoleDenied | Rejection::NoPolicy => StatusCode::FORBIDDEN,
            Rejection::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Rejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            Rejection::Backend(_) => "auth backend error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ResponseData {
            message: "Access denied".to_string(),
            error,
        })
    }
}

pub struct Authorizer {
    tokens: Arc<TokenService>,
    revocations: Arc<dyn RevocationCheck>,
    policy: RoutePolicy,
    backend_timeout: Duration,
}

impl Authorizer {
    pub fn new(
        tokens: Arc<TokenService>,
        revocations: Arc<dyn RevocationCheck>,
        policy: RoutePolicy,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            revocations,
            policy,
            backend_timeout,
        }
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    pub async fn authorize(
        &self,
        method: &Method,
        path: &str,
        auth_header: Option<&str>,
    ) -> Result<Admission, Rejection> {
        self.authorize_at(method, path, auth_header, Utc::now().timestamp()).await
    }

    pub async fn authorize_at(
        &self,
        method: &Method,
        path: &str,
        auth_header: Option<&str>,
        now: i64,
    ) -> Result<Admission, Rejection> {
        let result = self.decide(method, path, auth_header, now).await;

        let outcome = match &result {
            Ok(Admission::Exempt) => "exempt",
            Ok(Admission::Granted(_)) => "granted",
            Err(rejection) => rejection.outcome(),
        };
        ADMISSION_DECISIONS.with_label_values(&[outcome]).inc();

        result
    }

    async fn decide(
        &self,
        method: &Method,
        path: &str,
        auth_header: Option<&str>,
        now: i64,
    ) -> Result<Admission, Rejection> {
        let allowed = match self.policy.decide(method, path) {
            PolicyDecision::Exempt => return Ok(Admission::Exempt),
            PolicyDecision::Protected(roles) => roles,
            PolicyDecision::Unmapped => {
                warn!(method = %method, path = %path, "request to route without access policy");
                return Err(Rejection::NoPolicy);
            }
        };

        let token = match extract_bearer_token(auth_header) {
            Some(token) => token,
            None => {
                auth_event!("admission", None::<&str>, false, "missing token");
                return Err(Rejection::MissingToken);
            }
        };

        let claims = match self.tokens.verify_at(token, now) {
            Ok(claims) => claims,
            Err(e) => {
                auth_event!("admission", None::<&str>, false, e);
                return Err(Rejection::InvalidToken(e));
            }
        };

        let revoked = with_deadline(self.backend_timeout, self.revocations.is_revoked(&claims.sub))
            .await
            .map_err(|e| {
                STORE_ERRORS.with_label_values(&["revocation"]).inc();
                error!(store = "revocation", key = %blacklist_key(&claims.sub), error = %e, "revocation check failed");
                Rejection::Backend(e)
            })?;
        if revoked {
            warn!(subject = %claims.sub, path = %path, "revoked token presented");
            return Err(Rejection::Revoked);
        }

        if !allowed.allows(claims.role) {
            warn!(subject = %claims.sub, role = %claims.role, allowed = %allowed, path = %path, "role denied");
            return Err(Rejection::RoleDenied);
        }

        debug!(subject = %claims.sub, role = %claims.role, path = %path, "request admitted");
        Ok(Admission::Granted(AuthContext {
            claims,
            token: token.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::{BlacklistStore, MemoryBlacklist};
    use crate::models::Role;
    use crate::policy::RoleSet;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &[u8] = b"test_secret_key_minimum_32_chars_long_for_security";
    const NOW: i64 = 1_700_000_000;

    struct CountingCheck {
        calls: AtomicUsize,
        answer: Result<bool, ()>,
    }

    impl CountingCheck {
        fn answering(answer: Result<bool, ()>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer,
            })
        }
    }

    #[async_trait]
    impl RevocationCheck for CountingCheck {
        async fn is_revoked(&self, _user_id: &str) -> Result<bool, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .map_err(|_| StoreError::Protocol("connection refused".to_string()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl RevocationCheck for Stalled {
        async fn is_revoked(&self, _user_id: &str) -> Result<bool, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(false)
        }
    }

    fn tokens() -> Arc<TokenService> {
        Arc::new(TokenService::with_secret(SECRET, chrono::Duration::days(30)))
    }

    fn policy() -> RoutePolicy {
        RoutePolicy::new()
            .exempt(Method::GET, "/doctors/health-check")
            .rule(Method::GET, "/admin", RoleSet::ADMIN_ONLY)
            .rule(Method::GET, "/anyone", RoleSet::ALL_ROLES)
    }

    fn authorizer(revocations: Arc<dyn RevocationCheck>) -> Authorizer {
        Authorizer::new(tokens(), revocations, policy(), Duration::from_millis(50))
    }

    fn bearer(subject: &str, role: Role) -> String {
        let token = tokens()
            .issue_at(subject, role, chrono::Duration::days(30), NOW)
            .unwrap();
        format!("Bearer {}", token)
    }

    #[tokio::test]
    async fn test_exempt_route_needs_no_token() {
        let check = CountingCheck::answering(Ok(false));
        let result = authorizer(check.clone())
            .authorize_at(&Method::GET, "/doctors/health-check", None, NOW)
            .await;

        assert!(matches!(result, Ok(Admission::Exempt)));
        assert_eq!(check.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_tokens() {
        let check = CountingCheck::answering(Ok(false));
        let authz = authorizer(check.clone());

        let missing = authz.authorize_at(&Method::GET, "/anyone", None, NOW).await;
        assert!(matches!(missing, Err(Rejection::MissingToken)));

        let garbage = authz
            .authorize_at(&Method::GET, "/anyone", Some("Bearer not.a.token"), NOW)
            .await;
        assert!(matches!(garbage, Err(Rejection::InvalidToken(TokenError::BadSignature))));

        // revocation is never consulted for a token that failed verification
        assert_eq!(check.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthorized() {
        let authz = authorizer(CountingCheck::answering(Ok(false)));
        let header = bearer("42", Role::Admin);

        let result = authz
            .authorize_at(&Method::GET, "/admin", Some(&header), NOW + 31 * 24 * 3600)
            .await;
        let rejection = result.unwrap_err();
        assert!(matches!(rejection, Rejection::InvalidToken(TokenError::Expired)));
        assert_eq!(rejection.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_enforcement() {
        let authz = authorizer(CountingCheck::answering(Ok(false)));
        let header = bearer("42", Role::Patient);

        let denied = authz.authorize_at(&Method::GET, "/admin", Some(&header), NOW).await;
        assert!(matches!(denied, Err(Rejection::RoleDenied)));

        let granted = authz.authorize_at(&Method::GET, "/anyone", Some(&header), NOW).await;
        match granted {
            Ok(Admission::Granted(ctx)) => {
                assert_eq!(ctx.claims.sub, "42");
                assert_eq!(ctx.claims.role, Role::Patient);
            }
            other => panic!("expected grant, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_revocation_wins_over_role() {
        let blacklist = Arc::new(MemoryBlacklist::new());
        blacklist.add("42", "whatever").await.unwrap();
        let authz = authorizer(blacklist);
        let header = bearer("42", Role::Doctor);

        // even where the role would also be denied, revocation answers first
        let on_admin = authz.authorize_at(&Method::GET, "/admin", Some(&header), NOW).await;
        assert!(matches!(on_admin, Err(Rejection::Revoked)));

        let on_anyone = authz.authorize_at(&Method::GET, "/anyone", Some(&header), NOW).await;
        let rejection = on_anyone.unwrap_err();
        assert!(matches!(rejection, Rejection::Revoked));
        assert_eq!(rejection.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let authz = authorizer(CountingCheck::answering(Err(())));
        let header = bearer("42", Role::Admin);

        let rejection = authz
            .authorize_at(&Method::GET, "/admin", Some(&header), NOW)
            .await
            .unwrap_err();
        assert!(matches!(rejection, Rejection::Backend(_)));
        assert_eq!(rejection.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let authz = authorizer(Arc::new(Stalled));
        let header = bearer("42", Role::Admin);

        let rejection = authz
            .authorize_at(&Method::GET, "/admin", Some(&header), NOW)
            .await
            .unwrap_err();
        assert!(matches!(rejection, Rejection::Backend(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_unmapped_route_denied_without_store_call() {
        let check = CountingCheck::answering(Ok(false));
        let header = bearer("1", Role::Admin);

        let result = authorizer(check.clone())
            .authorize_at(&Method::POST, "/admin", Some(&header), NOW)
            .await;
        let rejection = result.unwrap_err();
        assert!(matches!(rejection, Rejection::NoPolicy));
        assert_eq!(rejection.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(check.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejection_statuses() {
        assert_eq!(Rejection::MissingToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Rejection::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(Rejection::RoleDenied.status_code(), StatusCode::FORBIDDEN);
    }
}
