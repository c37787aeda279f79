//! A provider-neutral protocol for text generation.
//!
//! Every agent in a group chat talks to its model through the types in this
//! crate, so that a chat can mix providers, or swap a real provider for a
//! scripted one in tests, without touching the conversation loop.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. Retry, timeouts and
//! stream collection live in the consumers of this crate.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
