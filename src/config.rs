//! Configuration types and constants.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::twitter::DEFAULT_OEMBED_URL;

/// Overall deadline for a single resolve, covering every redirect hop, the
/// body read, and decoding.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of redirects followed per resolve.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// How much of a response body is read while looking for a title (500 KiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 500 * 1024;

/// How long cached resolutions live.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120 * 60 * 60);

/// Entry bound for the in-memory cache.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// DNS query timeout in seconds. Most queries complete in well under a
/// second; failing fast matters more than squeezing out slow resolvers.
pub const DNS_TIMEOUT_SECS: u64 = 3;

/// How long we wait to establish a TCP connection to a remote host.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

// The connection pool reuses connections somewhat aggressively: resolves
// tend to cluster around the same shorteners and publishers.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
pub const POOL_MAX_IDLE_PER_HOST: usize = 100;

/// Default listen port when neither `--port` nor `PORT` is set.
pub const DEFAULT_PORT: u16 = 8080;

/// Request timeout used by the server binary. More generous than the
/// library default to accommodate slow shortener chains.
pub const SERVER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Plain,
    Json,
}

/// Tunables for [`HttpResolver`](crate::HttpResolver).
///
/// Regex tables and header sets are compiled at resolver construction;
/// nothing here is consulted from process-global mutable state.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Overall deadline for one resolve.
    pub timeout: Duration,
    /// Redirect hop cap.
    pub max_redirects: usize,
    /// Body-read cap for title extraction.
    pub max_body_size: usize,
    /// When set, refuse any target that is not a public host on port
    /// 80/443. Disabled only in tests that talk to loopback fixtures.
    pub enforce_public_targets: bool,
    /// Twitter oembed endpoint.
    pub oembed_base_url: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            enforce_public_targets: true,
            oembed_base_url: DEFAULT_OEMBED_URL.to_string(),
        }
    }
}

/// Command-line options for the server binary.
#[derive(Debug, Parser)]
#[command(
    name = "link_resolver",
    about = "Resolves URLs to a stable canonical form and serves the result as JSON."
)]
pub struct Opt {
    /// Port to listen on (the PORT environment variable takes precedence)
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Per-resolve timeout in seconds
    #[arg(long, default_value_t = SERVER_REQUEST_TIMEOUT.as_secs())]
    pub timeout_seconds: u64,

    /// Maximum redirect hops per resolve
    #[arg(long, default_value_t = DEFAULT_MAX_REDIRECTS)]
    pub max_redirects: usize,

    /// Cache TTL in hours
    #[arg(long, default_value_t = 120)]
    pub cache_ttl_hours: u64,

    /// Maximum entries in the in-memory cache (ignored with Redis)
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: u64,

    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log format: plain|json
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,
}
