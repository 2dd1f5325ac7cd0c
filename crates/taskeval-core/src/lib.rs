//! taskeval-core
//!
//! Code evaluation with paid unlocks: tasks are scored by an external
//! evaluator, and the detailed feedback is released once a gateway payment
//! is confirmed.
//!
//! # Modules
//! - **domain**: records, state machines, errors
//! - **ports**: store, collaborator, clock and id traits
//! - **impls**: in-memory and SQLite stores, HMAC signatures, remote and scripted collaborators
//! - **app**: builder, unlock coordinator, evaluation pipeline, rate limiter, status watch

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{App, AppBuilder, BuildError, UnlockSettings};
pub use domain::{ErrorKind, UnlockError};
