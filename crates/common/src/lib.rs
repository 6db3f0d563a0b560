//! Error plumbing shared by the composer crates.

pub mod error;

pub use error::FromMessage;
