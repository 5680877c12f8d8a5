//! Kubernetes resource quantities
//!
//! Quantities are held at milli-unit precision so that CPU values like `500m`
//! and byte counts like `1Gi` share one exact integer representation.
//! Summation is plain integer addition, which keeps aggregate results
//! independent of the order pods are visited in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use thiserror::Error;

/// Resource name for CPU, reported in fractional cores
pub const RESOURCE_CPU: &str = "cpu";

/// Mapping of resource name to quantity
pub type ResourceList = BTreeMap<String, Quantity>;

/// Error returned when a quantity string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quantity {input:?}: {reason}")]
pub struct QuantityParseError {
    pub input: String,
    pub reason: &'static str,
}

/// A resource amount stored in thousandths of the base unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    millis: i64,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { millis: 0 };

    pub fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    pub fn from_units(units: i64) -> Self {
        Self {
            millis: units.saturating_mul(1000),
        }
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Whole units, rounded up
    pub fn value(&self) -> i64 {
        self.millis.div_euclid(1000) + i64::from(self.millis.rem_euclid(1000) != 0)
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    pub fn is_positive(&self) -> bool {
        self.millis > 0
    }

    /// Difference that never goes below zero
    pub fn saturating_sub_floor(self, other: Quantity) -> Quantity {
        Quantity {
            millis: self.millis.saturating_sub(other.millis).max(0),
        }
    }

    /// Numeric value published for `resource`
    ///
    /// CPU keeps its milli precision as fractional cores; every other
    /// resource reports whole units.
    pub fn as_reported(&self, resource: &str) -> f64 {
        if resource == RESOURCE_CPU {
            self.millis as f64 / 1000.0
        } else {
            self.value() as f64
        }
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity {
            millis: self.millis.saturating_add(rhs.millis),
        }
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 == 0 {
            write!(f, "{}", self.millis / 1000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl TryFrom<String> for Quantity {
    type Error = QuantityParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_quantity(&value)
    }
}

impl From<Quantity> for String {
    fn from(quantity: Quantity) -> String {
        quantity.to_string()
    }
}

impl FromStr for Quantity {
    type Err = QuantityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_quantity(s)
    }
}

/// Add every entry of `source` into `target`, treating absent keys as zero
pub fn add_resources(target: &mut ResourceList, source: &ResourceList) {
    for (name, quantity) in source {
        *target.entry(name.clone()).or_default() += *quantity;
    }
}

/// Parse a Kubernetes quantity string such as `500m`, `1.5Gi` or `2e3`
pub fn parse_quantity(input: &str) -> Result<Quantity, QuantityParseError> {
    let err = |reason| QuantityParseError {
        input: input.to_string(),
        reason,
    };

    let s = input.trim();
    if s.is_empty() {
        return Err(err("empty quantity"));
    }

    let (negative, unsigned) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let number_end = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_end);

    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(err("missing digits"));
    }
    if fraction.contains('.') {
        return Err(err("more than one decimal point"));
    }

    // mantissa / 10^fraction.len() is the numeric part
    let mut mantissa: i128 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(i128::from(digit - b'0')))
            .ok_or_else(|| err("too many digits"))?;
    }
    let fraction_digits = i32::try_from(fraction.len()).map_err(|_| err("too many digits"))?;

    let (binary_multiplier, decimal_exponent) = match suffix {
        "" => (1i128, 0i32),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        other if other.starts_with(['e', 'E']) => {
            let exponent: i32 = other[1..].parse().map_err(|_| err("invalid exponent"))?;
            (1, exponent)
        }
        _ => return Err(err("unknown suffix")),
    };

    // Scale to millis: value * 1000 = mantissa * multiplier * 10^(exp + 3 - fraction_digits)
    let scale = decimal_exponent
        .checked_add(3)
        .and_then(|e| e.checked_sub(fraction_digits))
        .ok_or_else(|| err("exponent out of range"))?;
    let numerator = mantissa.saturating_mul(binary_multiplier);

    let magnitude = if scale >= 0 {
        pow10(scale)
            .map(|factor| numerator.saturating_mul(factor))
            .unwrap_or(if numerator == 0 { 0 } else { i128::MAX })
    } else {
        match pow10(-scale) {
            // Round up like Kubernetes does for sub-milli precision
            Some(divisor) => {
                numerator / divisor + i128::from(numerator % divisor != 0)
            }
            None => i128::from(numerator != 0),
        }
    };

    let signed = if negative { -magnitude } else { magnitude };
    let millis = signed.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
    Ok(Quantity::from_millis(millis))
}

fn pow10(exponent: i32) -> Option<i128> {
    10i128.checked_pow(u32::try_from(exponent).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_cpu_forms() {
        assert_eq!(q("500m").millis(), 500);
        assert_eq!(q("1").millis(), 1000);
        assert_eq!(q("0.1").millis(), 100);
        assert_eq!(q("2.5").millis(), 2500);
        assert_eq!(q("100u").millis(), 1);
    }

    #[test]
    fn test_parse_memory_forms() {
        assert_eq!(q("1Ki").value(), 1024);
        assert_eq!(q("128Mi").value(), 128 * 1024 * 1024);
        assert_eq!(q("1.5Gi").value(), 1_610_612_736);
        assert_eq!(q("1G").value(), 1_000_000_000);
        assert_eq!(q("2e3").value(), 2000);
        assert_eq!(q("129e6").value(), 129_000_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Quantity>().is_err());
        assert!("abc".parse::<Quantity>().is_err());
        assert!("1Qi".parse::<Quantity>().is_err());
        assert!("1.2.3".parse::<Quantity>().is_err());
        assert!("1eX".parse::<Quantity>().is_err());
    }

    #[test]
    fn test_value_rounds_up() {
        assert_eq!(Quantity::from_millis(1500).value(), 2);
        assert_eq!(Quantity::from_millis(1000).value(), 1);
        assert_eq!(Quantity::from_millis(-1500).value(), -1);
    }

    #[test]
    fn test_reported_values() {
        assert_eq!(q("250m").as_reported(RESOURCE_CPU), 0.25);
        assert_eq!(q("1Ki").as_reported("memory"), 1024.0);
        assert_eq!(q("1").as_reported("nvidia.com/gpu"), 1.0);
    }

    #[test]
    fn test_saturating_sub_floor() {
        assert_eq!(q("4").saturating_sub_floor(q("3800m")), q("200m"));
        assert_eq!(q("1").saturating_sub_floor(q("2")), Quantity::ZERO);
    }

    #[test]
    fn test_add_resources_treats_absent_as_zero() {
        let mut target = ResourceList::new();
        target.insert("cpu".into(), q("1"));

        let mut source = ResourceList::new();
        source.insert("cpu".into(), q("500m"));
        source.insert("memory".into(), q("1Mi"));

        add_resources(&mut target, &source);
        assert_eq!(target["cpu"], q("1500m"));
        assert_eq!(target["memory"], q("1Mi"));
    }

    #[test]
    fn test_display() {
        assert_eq!(q("2").to_string(), "2");
        assert_eq!(q("250m").to_string(), "250m");
    }
}
