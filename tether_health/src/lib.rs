//! Memoized health of the services an integration depends on
//!
//! Health endpoints of an integration report whether the platform services it
//! calls are reachable and recent enough. Probing every service on each
//! request would multiply load on those services, so a [`HealthCache`] keeps
//! the last [`HealthEntry`] of each service for a fixed time (20 seconds by
//! default). Requests arriving while an entry is stale wait for a single probe
//! instead of each issuing their own.
//!
//! ```no_run
//! use tether_health::{HealthCache, HealthConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HealthConfig::default().with_service(
//!     "agent",
//!     "https://agent.example.com/agent/v1/HealthCheck",
//!     Some("20.14"),
//! );
//!
//! let cache = HealthCache::from_config(&config)?;
//! let agent = cache.status("agent").await;
//! println!("{}", serde_json::to_string(&*agent)?);
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod cache;
mod config;
mod entry;
pub mod probe;

pub use cache::{HealthCache, DEFAULT_TTL};
pub use config::{HealthConfig, ServiceConfig};
pub use entry::{compare_versions, Connectivity, HealthEntry, HealthReport};
pub use probe::{HealthConfigError, HealthProbe, HttpHealthProbe, ProbeError};
