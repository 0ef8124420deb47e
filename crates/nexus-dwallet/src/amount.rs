//! Decimal strings to fixed-point integers, without floats.

use eyre::Context as _;

/// Scale used by HyperCore prices and sizes on CoreWriter actions.
pub const CORE_WRITER_DECIMALS: u32 = 8;
/// USDC on HyperEVM.
pub const USDC_DECIMALS: u32 = 6;

/// Parses a decimal string into an integer scaled by `10^decimals`.
///
/// Extra fractional digits are truncated, never rounded: `"1.123456789"` at 8 decimals is
/// `112345678`. A leading `-` or `+` is accepted.
pub fn parse_fixed_point(s: &str, decimals: u32) -> eyre::Result<i128> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && frac.is_empty() {
        eyre::bail!("empty amount");
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        eyre::bail!("invalid decimal amount: {s}");
    }

    let width = usize::try_from(decimals).context("decimals out of range")?;
    let mut frac_s: String = frac.chars().take(width).collect();
    while frac_s.len() < width {
        frac_s.push('0');
    }

    let whole_v: i128 = if whole.is_empty() {
        0
    } else {
        whole.parse().context("parse whole")?
    };
    let frac_v: i128 = if frac_s.is_empty() {
        0
    } else {
        frac_s.parse().context("parse fractional")?
    };
    let scale = 10_i128
        .checked_pow(decimals)
        .ok_or_else(|| eyre::eyre!("decimals too large"))?;
    let v = whole_v
        .checked_mul(scale)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| eyre::eyre!("amount overflow"))?;
    Ok(if negative { -v } else { v })
}

/// [`parse_fixed_point`] at CoreWriter's 8 decimals.
pub fn scale8(s: &str) -> eyre::Result<i128> {
    parse_fixed_point(s, CORE_WRITER_DECIMALS)
}

/// Parses a non-negative token amount into base units.
pub fn parse_token_amount(s: &str, decimals: u32) -> eyre::Result<u128> {
    let v = parse_fixed_point(s, decimals)?;
    u128::try_from(v).map_err(|e| eyre::eyre!("amount must be non-negative: {s} ({e})"))
}

/// Format a base-unit integer amount into a UI decimal string without using floats.
///
/// Examples:
/// - base=1500000, decimals=6 => "1.5"
/// - base=1, decimals=6 => "0.000001"
pub fn format_base_units(base: u128, decimals: u32) -> eyre::Result<String> {
    if decimals == 0 {
        return Ok(base.to_string());
    }
    let scale = 10_u128
        .checked_pow(decimals)
        .ok_or_else(|| eyre::eyre!("decimals too large"))?;
    let whole = base / scale;
    let frac = base % scale;
    if frac == 0 {
        return Ok(whole.to_string());
    }
    let width = usize::try_from(decimals).context("decimals out of range")?;
    let mut frac_s = format!("{frac:0width$}");
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    Ok(format!("{whole}.{frac_s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale8_truncates() -> eyre::Result<()> {
        assert_eq!(scale8("94500.25")?, 9_450_025_000_000);
        assert_eq!(scale8("-1.5")?, -150_000_000);
        assert_eq!(scale8("1.123456789")?, 112_345_678);
        assert_eq!(scale8("0.000000019")?, 1);
        assert_eq!(scale8(".5")?, 50_000_000);
        assert_eq!(scale8("+3")?, 300_000_000);
        Ok(())
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "-", ".", "1e5", "1.2.3", "abc", "1,5"] {
            assert!(scale8(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn token_amounts_are_non_negative() -> eyre::Result<()> {
        assert_eq!(parse_token_amount("1.5", USDC_DECIMALS)?, 1_500_000);
        assert_eq!(parse_token_amount("0.0000019", USDC_DECIMALS)?, 1);
        assert!(parse_token_amount("-1", USDC_DECIMALS).is_err(), "negative accepted");
        Ok(())
    }

    #[test]
    fn format_base_to_ui() -> eyre::Result<()> {
        assert_eq!(format_base_units(1_500_000, 6)?, "1.5");
        assert_eq!(format_base_units(1, 6)?, "0.000001");
        assert_eq!(format_base_units(10_000_000, 6)?, "10");
        Ok(())
    }
}
