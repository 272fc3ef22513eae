//! Error handling foundation for portcullis.
//!
//! This module provides only the `Result` type alias using rootcause. Each
//! crate defines its own error enums and adds layer-appropriate context with
//! `.context()` as errors propagate.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_type_works() {
        let ok: Result<u16> = Ok(4180);
        assert_eq!(ok.expect("should be ok"), 4180);
    }
}
