//! # iga-terminator
//!
//! Cascading deletion for the identity-governance object model.
//!
//! Deleting an object first repairs every other object that refers to it:
//! optional references are nulled, collection references pruned, and owned
//! dependants deleted recursively. The object is removed last, so the store
//! never holds a reference to a deleted object.
//!
//! ```ignore
//! let terminator = Terminator::new(Arc::clone(&ctx));
//! terminator.delete_by_id::<Application>(app_id).await?;
//! ```

pub mod config;
pub mod error;
pub mod terminator;

mod application;
mod governance;
mod identity;
mod role;
mod rule;

pub use config::TerminatorConfig;
pub use error::{TerminatorError, TerminatorResult};
pub use terminator::{DeleteFuture, Terminator};
