//! # iga-core
//!
//! Shared vocabulary for the identity-governance engines: strongly typed
//! identifiers, the persisted entity model and the [`Object`] tagged union
//! every store and the cascading deleter dispatch on.
//!
//! ```text
//! Identity ──links──▶ Link ──application──▶ Application
//!    │                                          │
//!    └──detected/assigned roles──▶ Bundle       └──▶ ManagedAttribute ──inheritance──▶ ManagedAttribute
//! ```
//!
//! All relationships are ids. Nothing in the model holds another object.

pub mod ids;
pub mod model;
pub mod object;

pub use ids::*;
pub use model::*;
pub use object::{Object, ObjectKind, ObjectRef, Owned, Persistent, PropertyValue, References};
