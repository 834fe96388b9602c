//! Setting value encoding
//!
//! GRBL transports every setting as a decimal string using `.` as the
//! separator regardless of the host locale. Fractional values carry at
//! least one and at most three fractional digits.

/// Maximum number of fractional digits sent for a setting value
pub const SETTING_DECIMALS: usize = 3;

/// Format a value for a settings write using the `0.0##` pattern
///
/// Rounds to three fractional digits and then drops trailing zeros,
/// always keeping one digit after the separator.
pub fn format_setting_decimal(value: f64) -> String {
    let mut formatted = format!("{:.*}", SETTING_DECIMALS, value);

    if formatted.contains('.') {
        while formatted.ends_with('0') && !formatted.ends_with(".0") {
            formatted.pop();
        }
    }

    if formatted == "-0.0" {
        return "0.0".to_string();
    }

    formatted
}

/// Parse a cached setting value as a finite number
///
/// Returns `None` for empty, non-numeric, infinite or NaN values.
pub fn parse_setting_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Rust accepts "inf" and "NaN"; the controller never reports them
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }

    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_keeps_one_fraction_digit() {
        assert_eq!(format_setting_decimal(10.0), "10.0");
        assert_eq!(format_setting_decimal(0.0), "0.0");
        assert_eq!(format_setting_decimal(-0.0), "0.0");
    }

    #[test]
    fn test_format_limits_to_three_digits() {
        assert_eq!(format_setting_decimal(10.5), "10.5");
        assert_eq!(format_setting_decimal(250.25), "250.25");
        assert_eq!(format_setting_decimal(1.23456), "1.235");
        assert_eq!(format_setting_decimal(-200.1), "-200.1");
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_setting_number("250.000"), Some(250.0));
        assert_eq!(parse_setting_number(" -3 "), Some(-3.0));
        assert_eq!(parse_setting_number("1e3"), Some(1000.0));
    }

    #[test]
    fn test_parse_rejects_non_numbers() {
        assert_eq!(parse_setting_number(""), None);
        assert_eq!(parse_setting_number("abc"), None);
        assert_eq!(parse_setting_number("inf"), None);
        assert_eq!(parse_setting_number("NaN"), None);
        assert_eq!(parse_setting_number("1.2.3"), None);
    }
}
