//! Type system utilities and aliases.
//!
//! ## Modules
//!
//! - [`aliases`]: Type aliases for `Arc<Mutex<T>>` handles shared between a
//!   simulated collaborator and the code observing it.

pub mod aliases;

pub use aliases::*;
