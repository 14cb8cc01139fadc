//! Turnstile Common Types
//!
//! This crate contains the types shared by the coordination contract and the
//! lock client: lock names, ordering tokens, session identifiers, the error
//! taxonomy, and protocol constants.

pub mod identifiers;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use error::*;
pub use time::*;
