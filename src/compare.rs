//! Output comparison for test-case grading.
//!
//! Both sides are trimmed before comparison; an exact match passes.
//! When both trimmed strings parse as finite numbers, a small absolute
//! tolerance absorbs floating-point rounding differences in numeric
//! answers ("3.14" vs "3.141").

/// Absolute tolerance for numeric answers.
const NUMERIC_TOLERANCE: f64 = 0.02;

/// Returns true when `actual` matches `expected` under the grading rules.
///
/// An execution error on the actual side must force failure regardless
/// of output content; that is enforced by the caller building the
/// outcome, not here.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    let actual = actual.trim();
    let expected = expected.trim();

    if actual == expected {
        return true;
    }

    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(e)) if a.is_finite() && e.is_finite() => {
            (a - e).abs() <= NUMERIC_TOLERANCE
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(outputs_match("42", "42"));
        assert!(outputs_match("hello world", "hello world"));
        assert!(outputs_match("", ""));
    }

    #[test]
    fn test_reflexive_after_trim() {
        for s in ["42", "  42", "42\n", "  x y z \r\n", "   "] {
            assert!(outputs_match(s, s.trim()), "failed for {s:?}");
        }
    }

    #[test]
    fn test_whitespace_normalized() {
        assert!(outputs_match("  42  \n", "42"));
        assert!(outputs_match("42", "\n42\n"));
    }

    #[test]
    fn test_numeric_within_tolerance() {
        assert!(outputs_match("3.14", "3.141"));
        assert!(outputs_match("3.141", "3.14"));
        assert!(outputs_match("1.0", "1.02"));
        assert!(outputs_match("100", "100.019"));
    }

    #[test]
    fn test_numeric_outside_tolerance() {
        // diff = 0.04 > 0.02
        assert!(!outputs_match("3.10", "3.14"));
        assert!(!outputs_match("1.0", "1.03"));
        assert!(!outputs_match("100", "101"));
    }

    #[test]
    fn test_non_numeric_mismatch() {
        assert!(!outputs_match("hello", "world"));
        assert!(!outputs_match("3.14 apples", "3.141 apples"));
    }

    #[test]
    fn test_one_side_numeric() {
        assert!(!outputs_match("3.14", "pi"));
        assert!(!outputs_match("pi", "3.14"));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        assert!(!outputs_match("NaN", "0.0"));
        assert!(!outputs_match("inf", "0.0"));
        // identical spellings still match on exact equality
        assert!(outputs_match("NaN", "NaN"));
    }

    #[test]
    fn test_internal_whitespace_preserved() {
        assert!(!outputs_match("a  b", "a b"));
        assert!(outputs_match("line1\nline2", "line1\nline2\n"));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!outputs_match("Hello", "hello"));
    }
}
