//! # treesync-session
//!
//! Session layer over the treesync wire core: per-session object caches,
//! pending-object delivery, and the GetObject / GetRef / Visit / Print
//! operations. Transport and recipe logic stay outside; the seams are the
//! [`treesync_wire::BatchSource`] / [`treesync_wire::RefSource`] traits and
//! the [`Visitor`] / [`Renderer`] hooks.

pub mod config;
mod error;
pub mod rpc;
mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use rpc::{Batch, VisitOutcome};
pub use session::{Renderer, Session, Visitor};

/// Install the default subscriber: env-filtered, terse output.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
