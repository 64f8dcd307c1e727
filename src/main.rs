use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use anyhow::Context;
use clinic_auth::auth::TokenService;
use clinic_auth::authz::Authorizer;
use clinic_auth::blacklist::RevocationCheck;
use clinic_auth::config::{RevocationSource, Settings};
use clinic_auth::database::{create_pool, PgUserDirectory};
use clinic_auth::errors::json_error_handler;
use clinic_auth::handlers::{self, AppState};
use clinic_auth::idm_client::RemoteBlacklist;
use clinic_auth::middleware::{Authorize, RateLimit};
use clinic_auth::password::PasswordHasher;
use clinic_auth::policy::RoutePolicy;
use clinic_auth::rate_limit::RateLimiter;
use clinic_auth::redis_cache::RedisStore;
use clinic_auth::{logging, metrics};
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let settings = Settings::new().context("Failed to load configuration")?;

    logging::init_logging(&settings.logging.directory, &settings.logging.level)
        .context("Failed to initialize logging")?;
    metrics::init_metrics().context("Failed to register metrics")?;

    info!("Clinic IDM starting...");

    info!("Connecting to PostgreSQL...");
    let pool = create_pool(&settings.database)
        .await
        .context("Failed to create database pool")?;

    info!("Connecting to Redis...");
    let redis = RedisStore::connect(&settings.redis)
        .await
        .context("Failed to connect to Redis")?;

    // Every store or IDM call made during admission shares this deadline
    let backend_timeout = settings.admission.backend_timeout();
    let tokens = Arc::new(TokenService::new(&settings.jwt));

    let revocations: Arc<dyn RevocationCheck> = match settings.admission.revocation_source {
        RevocationSource::Redis => Arc::new(redis.clone()),
        RevocationSource::Idm => {
            let url = settings
                .admission
                .idm_url
                .as_deref()
                .context("admission.idm_url is not set")?;
            let service_key = settings
                .admission
                .service_key
                .as_deref()
                .context("admission.service_key is not set")?;
            info!("Revocation checks answered by IDM at {}", url);
            Arc::new(RemoteBlacklist::new(url, service_key, backend_timeout)?)
        }
    };

    // Admission: rate limit per peer IP, then token, revocation and role
    let authorizer = Arc::new(Authorizer::new(
        tokens.clone(),
        revocations,
        RoutePolicy::idm(),
        backend_timeout,
    ));
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(redis.clone()),
        &settings.rate_limit,
        backend_timeout,
    ));

    let app_state = web::Data::new(AppState {
        tokens,
        hasher: PasswordHasher::new(),
        blacklist: Arc::new(redis.clone()),
        directory: Arc::new(PgUserDirectory::new(pool)),
        redis: Some(redis),
        jwt: settings.jwt.clone(),
        backend_timeout,
        service_key: settings.admission.service_key.clone(),
    });

    if settings.admission.service_key.is_none() {
        info!("admission.service_key not set, /internal routes will refuse every caller");
    }

    info!(
        "Rate limit: {} requests per {}s",
        settings.rate_limit.requests, settings.rate_limit.window_secs
    );
    info!("Starting server on {}", settings.server.bind_addr);

    let cors_origins = settings.cors.allowed_origins.clone();

    HttpServer::new(move || {
        // Configure CORS
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::ACCEPT,
            ])
            .supports_credentials()
            .max_age(3600);

        for origin in &cors_origins {
            cors = cors.allowed_origin(origin);
        }

        // Last wrap runs first: tracing, CORS, rate limit, then authorization
        App::new()
            .wrap(Authorize::new(authorizer.clone()))
            .wrap(RateLimit::new(limiter.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(app_state.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .configure(handlers::configure)
    })
    .workers(settings.server.workers.unwrap_or(4))
    .bind(&settings.server.bind_addr)?
    .run()
    .await?;

    Ok(())
}
