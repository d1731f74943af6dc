//! link_resolver: resolve URLs to a stable canonical form.
//!
//! Given an arbitrary input URL, the resolver issues a GET, follows
//! redirects under a strict policy, strips tracker query parameters from
//! the final address, and (for HTML responses) extracts the document
//! title. Short links and marketing wrappers collapse into a form suitable
//! for deduplication, display, and archival.
//!
//! # Example
//!
//! ```no_run
//! use link_resolver::{init_client, HttpResolver, Resolver, ResolverConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = init_client()?;
//! let resolver = HttpResolver::new(client, ResolverConfig::default());
//!
//! let resolution = resolver
//!     .resolve("https://t.co/sOmEsHoRtLiNk?utm_source=share")
//!     .await?;
//! println!("{} {}", resolution.resolved_url, resolution.title);
//! # Ok(())
//! # }
//! ```
//!
//! The full service stack composes [`HttpResolver`] with
//! [`SingleflightResolver`] (concurrent duplicate resolves share one
//! fetch) and [`CachedResolver`] (TTL-bounded result cache), fronted by
//! the axum router in [`server`].
//!
//! Outbound traffic is restricted to ports 80/443 on public unicast
//! addresses; see [`check_url`] and [`SafeDns`] for the SSRF policy.

mod browser;
mod cache;
mod canonical;
pub mod config;
mod cookies;
mod html;
mod initialization;
mod resolver;
mod sailthru;
mod security;
pub mod server;
mod singleflight;
mod twitter;

pub use cache::{CachedResolver, MemoryCache, RedisCache, ResolveCache};
pub use canonical::{canonicalize, pre_canonicalize, Canonicalizer};
pub use config::{LogFormat, LogLevel, Opt, ResolverConfig};
pub use initialization::{init_cache, init_client, init_logger_with};
pub use resolver::{ErrorKind, HttpResolver, Resolution, ResolveError, ResolveResult, Resolver};
pub use security::{check_address, check_url, is_public_ip, SafeDns, TargetError};
pub use singleflight::SingleflightResolver;
pub use twitter::{extract_tweet_text, match_tweet_url, Tweet, TweetError, TweetFetcher};
