//! Implementations of the ports.
//!
//! - `memory`: in-process store (development, tests)
//! - `sqlite`: durable store
//! - `hmac`: gateway signature verification
//! - `groq`, `razorpay`: remote collaborators
//! - `scripted`: offline collaborators

pub mod groq;
pub mod hmac;
pub mod memory;
pub mod razorpay;
pub mod scripted;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod contract;

pub use self::groq::{GroqConfig, GroqEvaluator};
pub use self::hmac::HmacSignatures;
pub use self::memory::InMemoryStore;
pub use self::razorpay::{RazorpayConfig, RazorpayGateway};
pub use self::scripted::{ScriptedEvaluator, ScriptedGateway};
pub use self::sqlite::SqliteStore;
