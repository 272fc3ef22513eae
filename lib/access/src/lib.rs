//! Authorization policy for the portcullis authenticating proxy.
//!
//! This crate provides:
//! - [`Validator`]: decides whether a resolved email may pass
//! - [`HtpasswdStore`]: verifies basic-auth and sign-in form credentials
//!
//! Both are loaded once at startup and read-only afterwards.
//!
//! # Example
//!
//! ```
//! use portcullis_access::Validator;
//!
//! let validator = Validator::builder()
//!     .domains(["example.com".to_string()])
//!     .build();
//!
//! assert!(validator.is_authorized("alice@Example.com"));
//! assert!(!validator.is_authorized("mallory@evil.test"));
//! ```

pub mod error;
pub mod htpasswd;
pub mod validator;

pub use error::AccessError;
pub use htpasswd::HtpasswdStore;
pub use validator::{Validator, ValidatorBuilder, load_emails};
