//! Flows module - Operations combining the tree, settings and filesystem
//!
//! Provides:
//! - selection: Toggle cascades and reconciliation with a saved tree
//! - content: Selected-content aggregation, whole or batched
//! - delta: Applying filesystem events to a live tree
//! - session: The watch service binding it all to one root (optional)

pub mod content;
pub mod delta;
pub mod selection;

#[cfg(feature = "watch")]
pub mod session;
