// src/test_utils.rs

//! This module contains utilities for testing.

use num_traits::Float;

/// A constant defining the tolerance within which floating-point values
/// are considered close enough to be equal.
pub const TEST_TOLERANCE: f32 = 1e-5;

/// Tolerance for results of matrix factorizations and other long chains of
/// single-precision arithmetic.
pub const SOLVER_TOLERANCE: f32 = 1e-4;

/// Checks if two floating point numbers are close enough to be considered
/// equal.
///
/// # Arguments
/// * `target` - The target value.
/// * `value` - The value to compare against the target.
///
/// # Returns
/// `true` if the absolute difference between `target` and `value` is less than
/// `TEST_TOLERANCE`, otherwise `false`.
pub fn value_close(target: f32, value: f32) -> bool {
    (target - value).abs() < TEST_TOLERANCE
}

/// Checks if two floating point numbers are not close enough to be
/// considered equal.
///
/// # Arguments
/// * `target` - The target value.
/// * `value` - The value to compare against the target.
///
/// # Returns
/// `true` if the absolute difference between `target` and `value` exceeds
/// `TEST_TOLERANCE`, otherwise `false`.
pub fn value_not_close(target: f32, value: f32) -> bool {
    TEST_TOLERANCE <= (target - value).abs()
}

/// Checks if each of the components in a slice is close enough to be
/// considered equal.
///
/// # Arguments
/// * `target` - The target values.
/// * `value` - The values to compare against the target.
///
/// # Returns
/// `true` if both slices have the same length and each pair of components is
/// close as per `value_close`, otherwise `false`.
pub fn slice_close(target: &[f32], value: &[f32]) -> bool {
    slice_within(target, value, TEST_TOLERANCE)
}

/// Like `slice_close`, with an explicit tolerance.
pub fn slice_within(target: &[f32], value: &[f32], tolerance: f32) -> bool {
    target.len() == value.len()
        && target
            .iter()
            .zip(value)
            .all(|(target, value)| (target - value).abs() < tolerance)
}

/// Euclidean norm of a slice.
pub fn norm(value: &[f32]) -> f32 {
    Float::sqrt(value.iter().map(|v| v * v).sum::<f32>())
}
