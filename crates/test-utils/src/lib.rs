//! Shared test utilities for the nwp-consumer workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic record and dataset generators
//! - Common init times and grid fixtures
//! - Approximate float assertions
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, make_dataset};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert that every value of a slice is the missing-value sentinel.
///
/// ```ignore
/// use test_utils::assert_all_missing;
///
/// assert_all_missing!(&[f32::NAN, f32::NAN]);
/// ```
#[macro_export]
macro_rules! assert_all_missing {
    ($values:expr) => {{
        let values: &[f32] = $values;
        if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_nan()) {
            panic!(
                "assertion failed: expected all missing, found `{:?}` at index {}",
                v, i
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_assert_all_missing_passes() {
        assert_all_missing!(&[f32::NAN, f32::NAN]);
        assert_all_missing!(&[]);
    }

    #[test]
    #[should_panic(expected = "expected all missing")]
    fn test_assert_all_missing_fails() {
        assert_all_missing!(&[f32::NAN, 1.0]);
    }
}
