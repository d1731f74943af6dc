//! Process initialization: logging, the shared HTTP client, and the cache
//! backend.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use log::LevelFilter;
use reqwest::ClientBuilder;

use crate::cache::{MemoryCache, RedisCache, ResolveCache};
use crate::config::{LogFormat, DIAL_TIMEOUT, POOL_IDLE_TIMEOUT, POOL_MAX_IDLE_PER_HOST};
use crate::security::SafeDns;

/// Initializes the logger with the given level and format.
///
/// The plain format is colored and human-oriented; the JSON format is one
/// object per line for log shippers. Chatty dependencies are clamped to
/// more urgent levels.
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<()> {
    let mut builder = env_logger::Builder::new();

    builder.filter_level(level);
    builder.filter_module("html5ever", LevelFilter::Error);
    builder.filter_module("selectors", LevelFilter::Warn);
    builder.filter_module("reqwest", LevelFilter::Info);
    builder.filter_module("hyper", LevelFilter::Info);
    // Malformed-response warnings from DNS lookups of hostile hosts are
    // expected traffic here, not operator-actionable events.
    builder.filter_module("hickory_proto", LevelFilter::Error);
    builder.filter_module("link_resolver", level);

    match format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{{\"ts\":{},\"level\":\"{}\",\"target\":\"{}\",\"msg\":{}}}",
                    chrono::Utc::now().timestamp_millis(),
                    record.level(),
                    record.target(),
                    serde_json::to_string(&record.args().to_string())
                        .unwrap_or_else(|_| "\"\"".into())
                )
            });
        }
        LogFormat::Plain => {
            builder.format(|buf, record| {
                let level = record.level();
                let colored_level = match level {
                    log::Level::Error => level.to_string().red(),
                    log::Level::Warn => level.to_string().yellow(),
                    log::Level::Info => level.to_string().green(),
                    log::Level::Debug => level.to_string().blue(),
                    log::Level::Trace => level.to_string().purple(),
                };
                writeln!(
                    buf,
                    "{} [{}] {}",
                    record.target().cyan(),
                    colored_level,
                    record.args()
                )
            });
        }
    }

    builder.try_init().context("logger already initialized")
}

/// Builds the shared HTTP client used by every resolve.
///
/// Redirects are disabled (the resolver follows them manually), DNS goes
/// through [`SafeDns`] so hostnames cannot resolve to private addresses,
/// and the connection pool reuses connections across resolves.
pub fn init_client() -> Result<reqwest::Client, reqwest::Error> {
    ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(DIAL_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .dns_resolver(Arc::new(SafeDns::new()))
        .build()
}

/// Picks the cache backend: Redis when `FLY_REDIS_CACHE_URL` is set and
/// reachable, the bounded in-memory cache otherwise.
pub async fn init_cache(ttl: Duration, capacity: u64) -> Arc<dyn ResolveCache> {
    match std::env::var("FLY_REDIS_CACHE_URL") {
        Ok(url) if !url.is_empty() => match RedisCache::connect(&url, ttl).await {
            Ok(cache) => {
                log::info!("caching resolutions in redis (ttl {}h)", ttl.as_secs() / 3600);
                Arc::new(cache)
            }
            Err(err) => {
                log::warn!("FLY_REDIS_CACHE_URL unusable, falling back to in-memory cache: {err}");
                Arc::new(MemoryCache::new(capacity, ttl))
            }
        },
        _ => {
            log::info!("set FLY_REDIS_CACHE_URL to share the cache across instances; using in-memory cache");
            Arc::new(MemoryCache::new(capacity, ttl))
        }
    }
}
