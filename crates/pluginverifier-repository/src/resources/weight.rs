use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, de};

/// An additive measure of the "cost" of keeping a resource in a repository.
///
/// Subtraction saturates at [`zero`](ResourceWeight::zero), so removing an entry can never
/// underflow the repository total.
pub trait ResourceWeight:
    Copy + Ord + fmt::Debug + Add<Output = Self> + Sub<Output = Self> + Send + Sync + 'static
{
    /// The weight of an empty repository.
    fn zero() -> Self;

    /// The weight as a plain number, for metrics.
    fn units(self) -> u64;
}

/// Weighs every resource as one unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CountWeight(pub u64);

impl Add for CountWeight {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for CountWeight {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl ResourceWeight for CountWeight {
    fn zero() -> Self {
        Self(0)
    }

    fn units(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CountWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

const UNITS: &[(&str, u64)] = &[
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
];

/// An amount of disk space, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceAmount(u64);

impl SpaceAmount {
    pub const ZERO: Self = Self(0);

    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn from_kilobytes(kb: u64) -> Self {
        Self(kb << 10)
    }

    pub const fn from_megabytes(mb: u64) -> Self {
        Self(mb << 20)
    }

    pub const fn from_gigabytes(gb: u64) -> Self {
        Self(gb << 30)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// Scales the amount by `fraction`, which is clamped to `0.0..=1.0`.
    pub fn fraction(self, fraction: f64) -> Self {
        Self((self.0 as f64 * fraction.clamp(0.0, 1.0)) as u64)
    }
}

impl Add for SpaceAmount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SpaceAmount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl ResourceWeight for SpaceAmount {
    fn zero() -> Self {
        Self::ZERO
    }

    fn units(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpaceAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, size) in UNITS {
            if self.0 >= *size {
                return write!(f, "{:.2} {unit}", self.0 as f64 / *size as f64);
            }
        }
        write!(f, "{} B", self.0)
    }
}

/// Error returned when parsing a [`SpaceAmount`] fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid space amount `{0}`, expected a number of bytes optionally followed by B, KB, MB, GB or TB")]
pub struct ParseSpaceAmountError(String);

impl FromStr for SpaceAmount {
    type Err = ParseSpaceAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSpaceAmountError(s.to_owned());
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let number: f64 = number.parse().map_err(|_| err())?;

        let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
            "" | "B" => 1u64,
            "K" | "KB" => 1 << 10,
            "M" | "MB" => 1 << 20,
            "G" | "GB" => 1 << 30,
            "T" | "TB" => 1 << 40,
            _ => return Err(err()),
        };

        Ok(Self((number * multiplier as f64) as u64))
    }
}

impl<'de> Deserialize<'de> for SpaceAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Human(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(bytes) => Ok(Self(bytes)),
            Raw::Human(s) => s.parse().map_err(de::Error::custom),
        }
    }
}
