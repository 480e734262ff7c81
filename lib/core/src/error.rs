//! Error handling foundation for flowmill.
//!
//! Only the `Result` alias lives here. Each crate defines its own error enums
//! and wraps them in a rootcause `Report` at its public boundary.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Rejected;

    impl std::fmt::Display for Rejected {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "rejected")
        }
    }

    impl std::error::Error for Rejected {}

    fn reject() -> Result<u8, Rejected> {
        Err(Rejected.into())
    }

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }

    #[test]
    fn typed_context_is_displayed() {
        let err = reject().expect_err("should fail");
        assert!(err.to_string().contains("rejected"));
    }
}
