//! Backends module - Filesystem access
//!
//! Provides:
//! - exclude: Basename exclusion patterns and the ignore file
//! - scan: Tree building with walkdir, one-level lazy loading
//! - watch: Filesystem subscriptions with notify (optional)

pub mod exclude;
pub mod scan;

#[cfg(feature = "watch")]
pub mod watch;
