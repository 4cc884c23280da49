/// Parse a published potential ("+7.74%", "-3,2 %", "12%") into a finite
/// percentage.
///
/// Whitespace (including non-breaking spaces) is stripped, a trailing `%` is
/// dropped, a decimal comma becomes a decimal point and an explicit sign is
/// kept. Returns `None` for anything that does not end up as a finite number,
/// e.g. "N/A" or "-".
pub fn parse_potential(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let body = cleaned.strip_suffix('%').unwrap_or(&cleaned);
    if body.is_empty() || !body.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    // "1.234,5" style thousands grouping is not used by the source
    if body.contains(',') && body.contains('.') {
        return None;
    }

    let value: f64 = body.replace(',', ".").parse().ok()?;
    // "-0,00%" is zero, not a value below zero
    let value = if value == 0.0 { 0.0 } else { value };
    value.is_finite().then_some(value)
}

/// Render a percentage the way the bot displays it: explicit `+` for gains,
/// two decimals.
pub fn format_potential(pct: f64) -> String {
    let sign = if pct > 0.0 { "+" } else { "" };
    format!("{sign}{pct:.2}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signed_percentages() {
        assert_eq!(parse_potential("+7.74%"), Some(7.74));
        assert_eq!(parse_potential("-12.5%"), Some(-12.5));
        assert_eq!(parse_potential("3%"), Some(3.0));
    }

    #[test]
    fn test_negative_zero_is_plain_zero() {
        let value = parse_potential("-0,00%").unwrap();
        assert_eq!(value, 0.0);
        assert!(value.is_sign_positive());
        assert_eq!(format_potential(value), "0.00%");
    }

    #[test]
    fn test_parse_decimal_comma_and_spaces() {
        assert_eq!(parse_potential(" +7,74 % "), Some(7.74));
        assert_eq!(parse_potential("-0,5\u{a0}%"), Some(-0.5));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_potential("N/A"), None);
        assert_eq!(parse_potential("-"), None);
        assert_eq!(parse_potential(""), None);
        assert_eq!(parse_potential("%"), None);
        assert_eq!(parse_potential("inf%"), None);
        assert_eq!(parse_potential("1.234,5%"), None);
    }

    #[test]
    fn test_format_potential() {
        assert_eq!(format_potential(7.74), "+7.74%");
        assert_eq!(format_potential(-3.2), "-3.20%");
        assert_eq!(format_potential(0.0), "0.00%");
    }
}
