// src/watch/mod.rs

//! File watching, kept in step with the analysis service's mode.
//!
//! - [`timer`]: cancellable one-shot timer (arm / cancel / fire once).
//! - [`registry`]: the debounced owner of the active listener set.
//! - [`listener`]: listener sets and the `notify`-backed factory.
//! - [`patterns`]: compiled watch/exclude globs per mode.
//! - [`hash`]: content hashes so only material changes are reported.

pub mod hash;
pub mod listener;
pub mod patterns;
pub mod registry;
pub mod timer;

pub use hash::{ContentHashes, compute_file_hash};
pub use listener::{FileListener, ListenerFactory, ListenerSet, NotifyListenerFactory};
pub use patterns::{ModePatterns, WatchPatterns};
pub use registry::DebouncedWatcherRegistry;
pub use timer::DebounceTimer;
