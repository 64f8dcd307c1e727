use actix_web::http::{header, Method, StatusCode};
use actix_web::{test, web, App, HttpResponse};
use async_trait::async_trait;
use clinic_auth::{
    auth::TokenService,
    authz::Authorizer,
    blacklist::{BlacklistStore, MemoryBlacklist, RevocationCheck},
    config::JwtConfig,
    database::{MemoryUserDirectory, UserDirectory},
    errors::{json_error_handler, StoreError},
    handlers::{self, AppState},
    idm_client::SERVICE_KEY_HEADER,
    middleware::{Authenticated, Authorize, RateLimit},
    models::{EnhancedInfo, Info, LoginResponse, ResponseData, Role, WhoAmI},
    password::PasswordHasher,
    policy::RoutePolicy,
    rate_limit::{CounterStore, MemoryCounterStore, RateLimiter},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const TEST_JWT_SECRET: &str = "test_secret_key_minimum_32_chars_long_for_security_testing";
const PEER: &str = "10.1.2.3:40000";
const SERVICE_KEY: &str = "internal_service_key_for_tests";

struct Fixture {
    tokens: Arc<TokenService>,
    blacklist: Arc<MemoryBlacklist>,
    directory: Arc<MemoryUserDirectory>,
    authorizer: Arc<Authorizer>,
    limiter: Arc<RateLimiter>,
    state: web::Data<AppState>,
}

fn jwt_config() -> JwtConfig {
    JwtConfig {
        secret: TEST_JWT_SECRET.to_string(),
        ttl_days: 30,
        cookie_name: "token".to_string(),
        cookie_path: "/".to_string(),
        cookie_max_age_secs: 3600,
        cookie_secure: false,
    }
}

fn fixture_with(
    rate: u64,
    policy: RoutePolicy,
    revocations: Option<Arc<dyn RevocationCheck>>,
    counters: Option<Arc<dyn CounterStore>>,
) -> Fixture {
    let timeout = Duration::from_millis(200);
    let tokens = Arc::new(TokenService::new(&jwt_config()));
    let blacklist = Arc::new(MemoryBlacklist::new());
    let directory = Arc::new(MemoryUserDirectory::new());

    let revocations = revocations.unwrap_or_else(|| blacklist.clone() as Arc<dyn RevocationCheck>);
    let counters = counters.unwrap_or_else(|| Arc::new(MemoryCounterStore::new()) as Arc<dyn CounterStore>);

    let authorizer = Arc::new(Authorizer::new(tokens.clone(), revocations, policy, timeout));
    let limiter = Arc::new(RateLimiter::with_limits(
        counters,
        rate,
        Duration::from_secs(3600),
        "idm",
        timeout,
    ));

    let state = web::Data::new(AppState {
        tokens: tokens.clone(),
        hasher: PasswordHasher::new(),
        blacklist: blacklist.clone(),
        directory: directory.clone(),
        redis: None,
        jwt: jwt_config(),
        backend_timeout: timeout,
        service_key: Some(SERVICE_KEY.to_string()),
    });

    Fixture {
        tokens,
        blacklist,
        directory,
        authorizer,
        limiter,
        state,
    }
}

fn fixture() -> Fixture {
    fixture_with(1000, RoutePolicy::idm(), None, None)
}

/// Builds the IDM app inline so the concrete type is known to init_service.
macro_rules! idm_app {
    ($fx:expr) => {
        test::init_service(
            App::new()
                .wrap(Authorize::new($fx.authorizer.clone()))
                .wrap(RateLimit::new($fx.limiter.clone()))
                .app_data($fx.state.clone())
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .configure(handlers::configure),
        )
        .await
    };
}

fn request(method: Method, uri: &str) -> test::TestRequest {
    let peer: SocketAddr = PEER.parse().unwrap();
    test::TestRequest::default().method(method).uri(uri).peer_addr(peer)
}

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

async fn seed_user(fx: &Fixture, username: &str, role: Role) -> (i64, String) {
    let hash = PasswordHasher::new().hash("SecurePass123!").unwrap();
    let id = fx.directory.create(username, &hash, role).await.unwrap().unwrap();
    let token = fx
        .tokens
        .issue(&id.to_string(), role, chrono::Duration::days(30))
        .unwrap();
    (id, token)
}

#[actix_web::test]
async fn test_health_endpoint() {
    let fx = fixture();
    let app = idm_app!(fx);

    let resp = test::call_service(&app, request(Method::GET, "/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["redis"], "not configured");
}

#[actix_web::test]
async fn test_register_then_login_sets_cookie() {
    let fx = fixture();
    let app = idm_app!(fx);

    let register = request(Method::POST, "/idm/register")
        .set_json(json!({"username": "ana", "password": "SecurePass123!", "role": "doctor"}))
        .to_request();
    let resp = test::call_service(&app, register).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let login = request(Method::POST, "/idm/login")
        .set_json(json!({"username": "ana", "password": "SecurePass123!"}))
        .to_request();
    let resp = test::call_service(&app, login).await;
    assert_eq!(resp.status(), StatusCode::OK);

    {
        let cookie = resp
            .response()
            .cookies()
            .find(|c| c.name() == "token")
            .expect("login sets the token cookie");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.max_age(),
            Some(actix_web::cookie::time::Duration::seconds(3600))
        );
    }

    let body: LoginResponse = test::read_body_json(resp).await;
    let claims = fx.tokens.verify(&body.token).unwrap();
    assert_eq!(claims.sub, "1");
    assert_eq!(claims.role, Role::Doctor);
    assert_eq!(claims.exp - claims.iat, 30 * 24 * 3600);
}

#[actix_web::test]
async fn test_register_rejects_duplicates_and_bad_input() {
    let fx = fixture();
    let app = idm_app!(fx);
    seed_user(&fx, "ana", Role::Patient).await;

    let duplicate = request(Method::POST, "/idm/register")
        .set_json(json!({"username": "ana", "password": "SecurePass123!", "role": "patient"}))
        .to_request();
    assert_eq!(test::call_service(&app, duplicate).await.status(), StatusCode::CONFLICT);

    let short_password = request(Method::POST, "/idm/register")
        .set_json(json!({"username": "bob", "password": "short", "role": "patient"}))
        .to_request();
    assert_eq!(test::call_service(&app, short_password).await.status(), StatusCode::BAD_REQUEST);

    let unknown_role = request(Method::POST, "/idm/register")
        .set_json(json!({"username": "bob", "password": "SecurePass123!", "role": "nurse"}))
        .to_request();
    assert_eq!(test::call_service(&app, unknown_role).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_malformed_body_is_classified() {
    let fx = fixture();
    let app = idm_app!(fx);

    let req = request(Method::POST, "/idm/login")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload("{\"username\": \"ana\"")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ResponseData = test::read_body_json(resp).await;
    assert_eq!(body.error, "body ended unexpectedly");
}

#[actix_web::test]
async fn test_login_failures() {
    let fx = fixture();
    let app = idm_app!(fx);
    seed_user(&fx, "ana", Role::Patient).await;

    let wrong_password = request(Method::POST, "/idm/login")
        .set_json(json!({"username": "ana", "password": "WrongPassword123!"}))
        .to_request();
    let resp = test::call_service(&app, wrong_password).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let wrong_password: ResponseData = test::read_body_json(resp).await;

    let unknown = request(Method::POST, "/idm/login")
        .set_json(json!({"username": "nobody", "password": "SecurePass123!"}))
        .to_request();
    let resp = test::call_service(&app, unknown).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let unknown: ResponseData = test::read_body_json(resp).await;

    // no hint about which usernames exist
    assert_eq!(wrong_password.error, unknown.error);
    assert_eq!(unknown.error, "username or password are incorrect");
}

#[actix_web::test]
async fn test_token_failures_are_unauthorized() {
    let fx = fixture();
    let app = idm_app!(fx);

    let missing = request(Method::GET, "/idm/me").to_request();
    let resp = test::call_service(&app, missing).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: ResponseData = test::read_body_json(resp).await;
    assert_eq!(body.error, "missing token");

    let garbage = request(Method::GET, "/idm/me")
        .insert_header(bearer("not.a.token"))
        .to_request();
    assert_eq!(test::call_service(&app, garbage).await.status(), StatusCode::UNAUTHORIZED);

    let other_secret = TokenService::with_secret(b"another_secret_key_that_is_32_bytes_long!!", chrono::Duration::days(1))
        .issue("1", Role::Admin, chrono::Duration::hours(1))
        .unwrap();
    let forged = request(Method::GET, "/idm/me")
        .insert_header(bearer(&other_secret))
        .to_request();
    assert_eq!(test::call_service(&app, forged).await.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_whoami_reads_verified_claims() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (id, token) = seed_user(&fx, "ana", Role::Patient).await;

    let req = request(Method::GET, "/idm/me").insert_header(bearer(&token)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["subject"], id.to_string());
    assert_eq!(body["role"], "patient");
}

#[actix_web::test]
async fn test_logout_revokes_token() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (_, token) = seed_user(&fx, "ana", Role::Doctor).await;

    let logout = request(Method::POST, "/idm/logout").insert_header(bearer(&token)).to_request();
    assert_eq!(test::call_service(&app, logout).await.status(), StatusCode::OK);
    assert_eq!(fx.blacklist.revoked_token("1").await.unwrap().as_deref(), Some(token.as_str()));

    // still unexpired, but revocation wins
    let again = request(Method::GET, "/idm/me").insert_header(bearer(&token)).to_request();
    let resp = test::call_service(&app, again).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: ResponseData = test::read_body_json(resp).await;
    assert_eq!(body.error, "token revoked");
}

#[actix_web::test]
async fn test_blacklisted_user_cannot_log_in() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (id, token) = seed_user(&fx, "ana", Role::Doctor).await;

    let logout = request(Method::POST, "/idm/logout").insert_header(bearer(&token)).to_request();
    assert_eq!(test::call_service(&app, logout).await.status(), StatusCode::OK);

    let login = || {
        request(Method::POST, "/idm/login")
            .set_json(json!({"username": "ana", "password": "SecurePass123!"}))
            .to_request()
    };
    let resp = test::call_service(&app, login()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(resp.response().cookies().next().is_none());
    let body: ResponseData = test::read_body_json(resp).await;
    assert_eq!(body.error, "account is blacklisted");

    // restored by an admin, the account works again
    assert_eq!(fx.blacklist.remove(&id.to_string()).await.unwrap(), 1);
    assert_eq!(test::call_service(&app, login()).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_password_update() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (_, admin) = seed_user(&fx, "root", Role::Admin).await;
    let (ana_id, ana) = seed_user(&fx, "ana", Role::Patient).await;
    let (bob_id, _) = seed_user(&fx, "bob", Role::Patient).await;

    let update = |token: &str, user_id: i64, password: &str| {
        request(Method::PUT, &format!("/idm/user/{}/password", user_id))
            .insert_header(bearer(token))
            .set_json(json!({"password": password}))
            .to_request()
    };

    let resp = test::call_service(&app, update(&ana, ana_id, "NewSecurePass456!")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: EnhancedInfo = test::read_body_json(resp).await;
    assert_eq!(updated.rows_affected, 1);

    let stored = fx.directory.find_by_username("ana").await.unwrap().unwrap();
    assert!(PasswordHasher::new().verify(&stored.password_hash, "NewSecurePass456!").is_ok());

    let login = request(Method::POST, "/idm/login")
        .set_json(json!({"username": "ana", "password": "NewSecurePass456!"}))
        .to_request();
    assert_eq!(test::call_service(&app, login).await.status(), StatusCode::OK);

    // a patient cannot touch someone else's password
    let resp = test::call_service(&app, update(&ana, bob_id, "Hijacked123456!")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(&app, update(&admin, bob_id, "ResetByAdmin123!")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, update(&admin, 99, "ResetByAdmin123!")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let missing: EnhancedInfo = test::read_body_json(resp).await;
    assert_eq!(missing.rows_affected, 0);

    let resp = test::call_service(&app, update(&ana, ana_id, "short")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_role_update_is_admin_only() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (_, admin) = seed_user(&fx, "root", Role::Admin).await;
    let (doctor_id, doctor) = seed_user(&fx, "house", Role::Doctor).await;

    let update = |token: &str, user_id: i64| {
        request(Method::PUT, &format!("/idm/user/{}/role", user_id))
            .insert_header(bearer(token))
            .set_json(json!({"role": "admin"}))
            .to_request()
    };

    let resp = test::call_service(&app, update(&doctor, doctor_id)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(&app, update(&admin, doctor_id)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: EnhancedInfo = test::read_body_json(resp).await;
    assert_eq!(updated.rows_affected, 1);
    let stored = fx.directory.find_by_username("house").await.unwrap().unwrap();
    assert_eq!(stored.role, Role::Admin);

    let resp = test::call_service(&app, update(&admin, 99)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let missing: EnhancedInfo = test::read_body_json(resp).await;
    assert_eq!(missing.rows_affected, 0);
    assert_eq!(missing.info.status, 404);
}

#[actix_web::test]
async fn test_internal_route_requires_service_key() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (patient_id, _) = seed_user(&fx, "ana", Role::Patient).await;
    let uri = format!("/internal/blacklist/{}", patient_id);

    let anonymous = request(Method::GET, &uri).to_request();
    let resp = test::call_service(&app, anonymous).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let info: Info = test::read_body_json(resp).await;
    assert_eq!(info.status, 401);

    let wrong_key = request(Method::GET, &uri)
        .insert_header((SERVICE_KEY_HEADER, "internal_service_key_for_test"))
        .to_request();
    assert_eq!(test::call_service(&app, wrong_key).await.status(), StatusCode::UNAUTHORIZED);

    let with_key = request(Method::GET, &uri)
        .insert_header((SERVICE_KEY_HEADER, SERVICE_KEY))
        .to_request();
    assert_eq!(test::call_service(&app, with_key).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_blacklist_contract() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (_, admin) = seed_user(&fx, "root", Role::Admin).await;
    let (patient_id, _) = seed_user(&fx, "ana", Role::Patient).await;

    let add = |user_id: i64| {
        request(Method::POST, "/idm/blacklist")
            .insert_header(bearer(&admin))
            .set_json(json!({"user_id": user_id, "token": "revoked-token"}))
            .to_request()
    };

    let resp = test::call_service(&app, add(patient_id)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let info: Info = test::read_body_json(resp).await;
    assert_eq!(info.status, 200);

    assert_eq!(test::call_service(&app, add(patient_id)).await.status(), StatusCode::CONFLICT);
    assert_eq!(test::call_service(&app, add(99)).await.status(), StatusCode::NOT_FOUND);

    let check = request(Method::GET, &format!("/idm/blacklist/{}", patient_id))
        .insert_header(bearer(&admin))
        .to_request();
    let info: Info = test::read_body_json(test::call_service(&app, check).await).await;
    assert_eq!(info.status, 403);

    // the internal route takes the service key instead of a token
    let internal = request(Method::GET, &format!("/internal/blacklist/{}", patient_id))
        .insert_header((SERVICE_KEY_HEADER, SERVICE_KEY))
        .to_request();
    let resp = test::call_service(&app, internal).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let info: Info = test::read_body_json(resp).await;
    assert_eq!(info.status, 403);

    let remove = || {
        request(Method::DELETE, &format!("/idm/blacklist/{}", patient_id))
            .insert_header(bearer(&admin))
            .to_request()
    };
    let removed: EnhancedInfo = test::read_body_json(test::call_service(&app, remove()).await).await;
    assert_eq!(removed.rows_affected, 1);
    assert_eq!(removed.info.status, 200);

    let resp = test::call_service(&app, remove()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let absent: EnhancedInfo = test::read_body_json(resp).await;
    assert_eq!(absent.rows_affected, 0);

    let internal = request(Method::GET, &format!("/internal/blacklist/{}", patient_id))
        .insert_header((SERVICE_KEY_HEADER, SERVICE_KEY))
        .to_request();
    assert_eq!(test::call_service(&app, internal).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_blacklist_routes_are_admin_only() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (_, doctor) = seed_user(&fx, "house", Role::Doctor).await;

    let req = request(Method::POST, "/idm/blacklist")
        .insert_header(bearer(&doctor))
        .set_json(json!({"user_id": 1, "token": "t"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: ResponseData = test::read_body_json(resp).await;
    assert_eq!(body.error, "insufficient role");
    assert!(!fx.blacklist.is_revoked("1").await.unwrap());
}

#[actix_web::test]
async fn test_unmapped_route_is_denied() {
    let fx = fixture();
    let app = idm_app!(fx);
    let (_, admin) = seed_user(&fx, "root", Role::Admin).await;

    let req = request(Method::GET, "/idm/users").insert_header(bearer(&admin)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_rate_limit_returns_429_after_n() {
    let fx = fixture_with(3, RoutePolicy::idm(), None, None);
    let app = idm_app!(fx);

    for _ in 0..3 {
        let resp = test::call_service(&app, request(Method::GET, "/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = test::call_service(&app, request(Method::GET, "/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: ResponseData = test::read_body_json(resp).await;
    assert_eq!(body.error, "rate limit exceeded");

    // another client has its own window
    let other: SocketAddr = "10.9.9.9:5000".parse().unwrap();
    let req = test::TestRequest::get().uri("/health").peer_addr(other).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_rate_limit_runs_before_authorization() {
    let fx = fixture_with(1, RoutePolicy::idm(), None, None);
    let app = idm_app!(fx);

    let first = test::call_service(&app, request(Method::GET, "/idm/me").to_request()).await;
    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);

    let second = test::call_service(&app, request(Method::GET, "/idm/me").to_request()).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[actix_web::test]
async fn test_request_without_peer_address_fails_closed() {
    let fx = fixture();
    let app = idm_app!(fx);

    let req = test::TestRequest::get().uri("/health").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

struct BrokenStore;

#[async_trait]
impl RevocationCheck for BrokenStore {
    async fn is_revoked(&self, _user_id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Protocol("connection refused".to_string()))
    }
}

#[async_trait]
impl CounterStore for BrokenStore {
    async fn incr(&self, _key: &str) -> Result<i64, StoreError> {
        Err(StoreError::Protocol("connection refused".to_string()))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Protocol("connection refused".to_string()))
    }
}

#[actix_web::test]
async fn test_revocation_store_failure_fails_closed() {
    let fx = fixture_with(1000, RoutePolicy::idm(), Some(Arc::new(BrokenStore)), None);
    let app = idm_app!(fx);
    let (_, token) = seed_user(&fx, "ana", Role::Admin).await;

    let req = request(Method::GET, "/idm/me").insert_header(bearer(&token)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // backend details stay out of the response
    let body: ResponseData = test::read_body_json(resp).await;
    assert_eq!(body.error, "auth backend error");
}

#[actix_web::test]
async fn test_rate_limit_store_failure_fails_closed() {
    let fx = fixture_with(1000, RoutePolicy::idm(), None, Some(Arc::new(BrokenStore)));
    let app = idm_app!(fx);

    let resp = test::call_service(&app, request(Method::GET, "/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

async fn healthy() -> HttpResponse {
    HttpResponse::Ok().finish()
}

async fn caller_role(caller: Authenticated) -> HttpResponse {
    HttpResponse::Ok().json(WhoAmI {
        subject: caller.0.claims.sub,
        role: caller.0.claims.role,
        expires_at: caller.0.claims.exp,
    })
}

#[actix_web::test]
async fn test_gateway_scenario() {
    let fx = fixture_with(1000, RoutePolicy::clinic_gateway(), None, None);
    let app = test::init_service(
        App::new()
            .wrap(Authorize::new(fx.authorizer.clone()))
            .wrap(RateLimit::new(fx.limiter.clone()))
            .route("/doctors/health-check", web::get().to(healthy))
            .route("/api/users", web::get().to(caller_role))
            .route("/api/doctors", web::get().to(caller_role)),
    )
    .await;

    let token = fx
        .tokens
        .issue("42", Role::Doctor, chrono::Duration::days(30))
        .unwrap();

    let health = request(Method::GET, "/doctors/health-check").to_request();
    assert_eq!(test::call_service(&app, health).await.status(), StatusCode::OK);

    let admin_only = request(Method::GET, "/api/users").insert_header(bearer(&token)).to_request();
    assert_eq!(test::call_service(&app, admin_only).await.status(), StatusCode::FORBIDDEN);

    let all_roles = request(Method::GET, "/api/doctors").insert_header(bearer(&token)).to_request();
    let resp = test::call_service(&app, all_roles).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let who: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(who["subject"], "42");

    fx.blacklist.add("42", &token).await.unwrap();

    let revoked = request(Method::GET, "/api/doctors").insert_header(bearer(&token)).to_request();
    let resp = test::call_service(&app, revoked).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: ResponseData = test::read_body_json(resp).await;
    assert_eq!(body.error, "token revoked");
}
