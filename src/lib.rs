//! Authentication and admission control shared by the clinic services.

pub mod auth;
pub mod authz;
pub mod blacklist;
pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod idm_client;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod password;
pub mod policy;
pub mod rate_limit;
pub mod redis_cache;
