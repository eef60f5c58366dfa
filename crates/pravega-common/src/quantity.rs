//! Kubernetes quantity and JVM size parsing
//!
//! Memory quantities are compared in bytes and cpu quantities in millicores.
//! Values are kept as exact rationals until the final rounding so that
//! `1.5Gi` and `1536Mi` compare equal.

use crate::{Error, Result};

/// A non-negative quantity held as `numerator / denominator`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Rational {
    num: u128,
    den: u128,
}

impl Rational {
    fn ceil_scaled(self, scale: u128) -> u128 {
        (self.num * scale).div_ceil(self.den)
    }
}

fn invalid(input: &str) -> Error {
    Error::validation(format!("quantities must match the regular expression: {input}"))
}

fn suffix_multiplier(suffix: &str) -> Option<Rational> {
    let (num, den) = match suffix {
        "" => (1, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        _ => return None,
    };
    Some(Rational { num, den })
}

fn parse_rational(input: &str) -> Result<Rational> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    if number.is_empty() || number.matches('.').count() > 1 {
        return Err(invalid(input));
    }

    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    let digits = format!("{whole}{frac}");
    let mantissa: u128 = digits.parse().map_err(|_| invalid(input))?;
    let mut den = 10u128.pow(frac.len() as u32);
    let mut num = mantissa;

    // Decimal exponent form such as 1e3; a bare E is the exa suffix
    let multiplier = match suffix.strip_prefix(['e', 'E']) {
        Some(exp) if !exp.is_empty() && exp.chars().all(|c| c.is_ascii_digit()) => {
            let exp: u32 = exp.parse().map_err(|_| invalid(input))?;
            Rational {
                num: 10u128.checked_pow(exp).ok_or_else(|| invalid(input))?,
                den: 1,
            }
        }
        _ => suffix_multiplier(suffix).ok_or_else(|| invalid(input))?,
    };

    num = num.checked_mul(multiplier.num).ok_or_else(|| invalid(input))?;
    den *= multiplier.den;
    Ok(Rational { num, den })
}

/// Parse a memory quantity (e.g. `2Gi`, `1500M`) into bytes, rounding up
pub fn parse_bytes(input: &str) -> Result<u128> {
    parse_rational(input).map(|r| r.ceil_scaled(1))
}

/// Parse a cpu quantity (e.g. `500m`, `1`, `0.5`) into millicores, rounding up
pub fn parse_millis(input: &str) -> Result<u128> {
    parse_rational(input).map(|r| r.ceil_scaled(1_000))
}

/// Parse a JVM size such as the value of `-Xmx2g` or
/// `-XX:MaxDirectMemorySize=1024m` into bytes
///
/// JVM suffixes are binary and case-insensitive; a bare number is bytes.
pub fn parse_jvm_size(input: &str) -> Result<u128> {
    let s = input.trim();
    let invalid = || Error::validation(format!("invalid JVM memory size: {input}"));
    let (number, shift) = match s.chars().last() {
        Some(c) if c.is_ascii_digit() => (s, 0),
        Some(c) => {
            let shift = match c.to_ascii_lowercase() {
                'k' => 10,
                'm' => 20,
                'g' => 30,
                't' => 40,
                _ => return Err(invalid()),
            };
            (&s[..s.len() - 1], shift)
        }
        None => return Err(invalid()),
    };
    let value: u128 = number.parse().map_err(|_| invalid())?;
    Ok(value << shift)
}
