use actix_web::{HttpResponse, Responder};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref ADMISSION_DECISIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("admission_decisions_total", "Admission outcomes per request"),
        &["outcome"] // granted, exempt, or the rejection kind
    ).unwrap();

    pub static ref RATE_LIMIT_DECISIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("rate_limit_decisions_total", "Rate limiter decisions"),
        &["decision"]
    ).unwrap();

    pub static ref STORE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("auth_store_errors_total", "Failed calls to a backing store"),
        &["store"]
    ).unwrap();

    pub static ref BLACKLIST_OPERATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("blacklist_operations_total", "Blacklist operations"),
        &["operation", "result"]
    ).unwrap();

    pub static ref LOGIN_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("login_attempts_total", "Login attempts"),
        &["result"]
    ).unwrap();
}

pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(ADMISSION_DECISIONS.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMIT_DECISIONS.clone()))?;
    REGISTRY.register(Box::new(STORE_ERRORS.clone()))?;
    REGISTRY.register(Box::new(BLACKLIST_OPERATIONS.clone()))?;
    REGISTRY.register(Box::new(LOGIN_ATTEMPTS.clone()))?;

    Ok(())
}

/// Prometheus text exposition.
pub async fn metrics_handler() -> impl Responder {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("Failed to encode metrics: {}", e));
    }

    match String::from_utf8(buffer) {
        Ok(metrics) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics),
        Err(e) => HttpResponse::InternalServerError().body(format!("Failed to convert metrics: {}", e)),
    }
}
