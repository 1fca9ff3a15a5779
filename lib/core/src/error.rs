//! Shared result alias.
//!
//! Every kanna crate raises its own error enum as a rootcause `Report`.
//! Callers one layer up wrap it with their own enum via `.context()`, so a
//! failed reply reads as "dispatch step → store or backend failure".

use rootcause::Report;

/// Result whose error is a report carrying the error enum `C`.
pub type Result<T, C> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Rejected;

    impl fmt::Display for Rejected {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("rejected")
        }
    }

    impl std::error::Error for Rejected {}

    fn check(value: i32) -> Result<i32, Rejected> {
        if value < 0 {
            return Err(Rejected.into());
        }
        Ok(value)
    }

    #[test]
    fn plain_errors_convert_into_reports() {
        assert_eq!(check(7).expect("non-negative"), 7);
        assert!(check(-1).is_err());
    }
}
