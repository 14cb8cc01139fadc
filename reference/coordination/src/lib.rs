//! Turnstile Coordination
//!
//! The narrow contract the lock client needs from a hierarchical,
//! watch-capable coordination service, plus an in-process implementation.
//!
//! # Features
//!
//! - Node creation with optional ephemeral lifetime and sequential suffix
//! - Existence checks with one-shot watches
//! - Children listing and unconditional or versioned deletion
//! - A single per-session [`Watcher`] receiving node and session events
//!
//! # Example
//!
//! ```rust,ignore
//! use turnstile_coordination::{CreateMode, MemoryEnsemble, SessionFactory};
//!
//! let ensemble = MemoryEnsemble::new();
//! let session = ensemble.connect("memory", timeout, watcher).await?;
//! session.create("/locks", CreateMode::Persistent).await?;
//! let token = session.create("/locks/res_lock_", CreateMode::EphemeralSequential).await?;
//! ```

pub mod service;
pub mod memory;

pub use service::{
    CoordinationService, CreateMode, EventKind, SessionFactory, SessionState, Stat, WatchedEvent,
    Watcher,
};
pub use memory::{MemoryEnsemble, MemorySession};
