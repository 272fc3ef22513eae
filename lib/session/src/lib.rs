//! Cookie sessions for the portcullis authenticating proxy.
//!
//! A [`Session`] is never stored server-side. [`SessionCodec`] turns it into
//! a signed (and optionally encrypted) cookie value and back, and rejects any
//! value that was tampered with, minted for another cookie, or has expired.

pub mod codec;
pub mod error;
pub mod session;
pub mod state;

pub use codec::{MIN_SECRET_LEN, SessionCodec};
pub use error::{CodecError, CookieDecodeError};
pub use session::Session;
pub use state::{CsrfState, STATE_LIFETIME_MINUTES};
