//! # Agent Door Core
//!
//! Domain types and error definitions for the Agent Door gateway.
//! This crate has **zero framework dependencies** — it defines the domain
//! model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Registration records, compiled capabilities, and sessions are plain data
//! here. The crates that move them around (guard, registry, compiler, door,
//! gateway) depend inward on this crate and never on each other's internals.

pub mod capability;
pub mod error;
pub mod registration;
pub mod session;

// Re-export key types at crate root for ergonomics
pub use capability::{Capability, HttpMethod, ParamSpec};
pub use error::{CompileError, GuardError, RegistryError, UpstreamError};
pub use registration::{RESERVED_SLUGS, SiteRegistration, slug_is_valid};
pub use session::Session;
