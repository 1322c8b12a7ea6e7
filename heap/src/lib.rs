//! Collector contract used by the execution engine.
//!
//! The engine does not allocate or sweep; it only reports what it keeps
//! alive. Consumers provide:
//! - A [`RootProvider`] that enumerates the values an activation or
//!   activity owns.
//! - [`WeakCache`]s for lookups that must not extend object lifetimes.

mod mark;
mod weak;

pub use mark::{MarkStats, Marker, RootProvider};
pub use weak::WeakCache;
