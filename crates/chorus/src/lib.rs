//! An out-of-the-box group chat that assembles agents, tools and model
//! providers from a configuration file.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring multi-agent conversations into your own host
//! apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod config;
mod session;
pub mod tools;

pub use config::ChatConfig;
pub use session::{Session, SessionBuilder};

/// Re-exports of [`chorus_core`] crate.
pub mod core {
    pub use chorus_core::*;
}
