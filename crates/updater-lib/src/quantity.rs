//! Kubernetes-style resource quantities
//!
//! Quantities are stored as integer milli-units so CPU (`"250m"`) and
//! memory (`"512Mi"`) amounts share one totally ordered representation.

use crate::error::QuantityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource name for CPU
pub const CPU: &str = "cpu";

/// Resource name for memory
pub const MEMORY: &str = "memory";

const MILLIS_PER_UNIT: i64 = 1000;

/// Finer fractions than this are rejected instead of silently truncated
const MAX_FRACTION_DIGITS: usize = 9;

/// Binary suffixes used when formatting, largest first
const BINARY_SUFFIXES: &[(&str, i64)] = &[
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
];

/// A non-negative resource amount with milli-unit precision
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    millis: i64,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { millis: 0 };

    /// Negative amounts clamp to zero
    pub const fn from_millis(millis: i64) -> Self {
        Self {
            millis: if millis < 0 { 0 } else { millis },
        }
    }

    /// Negative amounts clamp to zero
    pub const fn from_units(units: i64) -> Self {
        Self::from_millis(units.saturating_mul(MILLIS_PER_UNIT))
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Whole units, rounded up
    pub fn units(&self) -> i64 {
        let whole = self.millis / MILLIS_PER_UNIT;
        if self.millis % MILLIS_PER_UNIT > 0 {
            whole + 1
        } else {
            whole
        }
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    /// Relative distance of `self` from `reference`.
    ///
    /// A zero reference yields 0 when both are zero and infinity otherwise.
    pub fn relative_difference(&self, reference: Quantity) -> f64 {
        let diff = (self.millis as f64 - reference.millis as f64).abs();
        if reference.millis == 0 {
            if diff == 0.0 {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            diff / reference.millis as f64
        }
    }
}

/// Multiplier that turns one unit of `suffix` into milli-units
fn suffix_multiplier(suffix: &str) -> Option<i128> {
    let units: i128 = match suffix {
        "m" => return Some(1),
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        _ => return None,
    };
    Some(units * MILLIS_PER_UNIT as i128)
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }
        let invalid = |reason| QuantityError::Invalid {
            input: input.to_string(),
            reason,
        };
        let overflow = || QuantityError::Overflow {
            input: input.to_string(),
        };

        if input.starts_with('-') {
            return Err(invalid("negative quantities are not allowed"));
        }
        let input_digits = input.strip_prefix('+').unwrap_or(input);

        let split = input_digits
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(input_digits.len());
        let (number, suffix) = input_digits.split_at(split);

        let multiplier = suffix_multiplier(suffix).ok_or_else(|| QuantityError::UnknownSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        })?;

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid("missing numeric part"));
        }
        if frac_part.contains('.') {
            return Err(invalid("more than one decimal point"));
        }
        if frac_part.len() > MAX_FRACTION_DIGITS {
            return Err(invalid("too many fractional digits"));
        }

        let parse = |digits: &str| -> Result<i128, QuantityError> {
            if digits.is_empty() {
                Ok(0)
            } else {
                digits.parse::<i128>().map_err(|_| overflow())
            }
        };
        let scale = 10i128.pow(frac_part.len() as u32);
        let scaled = parse(int_part)?
            .checked_mul(scale)
            .and_then(|v| v.checked_add(parse(frac_part).ok()?))
            .and_then(|v| v.checked_mul(multiplier))
            .ok_or_else(overflow)?;

        // Sub-milli precision rounds up
        let millis = scaled
            .checked_add(scale - 1)
            .map(|v| v / scale)
            .ok_or_else(overflow)?;
        let millis = i64::try_from(millis).map_err(|_| overflow())?;

        Ok(Quantity { millis })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % MILLIS_PER_UNIT != 0 {
            return write!(f, "{}m", self.millis);
        }
        let units = self.millis / MILLIS_PER_UNIT;
        if units != 0 {
            for (suffix, factor) in BINARY_SUFFIXES {
                if units % factor == 0 {
                    return write!(f, "{}{}", units / factor, suffix);
                }
            }
        }
        write!(f, "{}", units)
    }
}

impl TryFrom<String> for Quantity {
    type Error = QuantityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Quantity> for String {
    fn from(quantity: Quantity) -> Self {
        quantity.to_string()
    }
}
