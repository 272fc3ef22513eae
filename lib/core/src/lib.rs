//! Core identity types for the portcullis authenticating proxy.
//!
//! This crate provides the email identity type shared by the session codec,
//! the access validator and the identity provider clients, plus the
//! rootcause-based `Result` alias every crate returns.

pub mod email;
pub mod error;

pub use email::{EmailAddress, ParseEmailError};
pub use error::Result;
