//! Migration version identifiers.
//!
//! Versions are dotted numeric strings (`1`, `1.2`, `2.0.10`) compared
//! component-wise, with two sentinels: [`MigrationVersion::Zero`] below every
//! numbered version and [`MigrationVersion::Max`] above every numbered
//! version. Shorter versions compare as if padded with zeros, so `1` and
//! `1.0` are equal.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::MigrateError;

/// A totally ordered migration version.
#[derive(Debug, Clone)]
pub enum MigrationVersion {
    /// Sentinel below every numbered version; the default baseline.
    Zero,
    /// A dotted numeric version such as `1`, `1.2` or `2.0.10`.
    Numbered(Vec<u64>),
    /// Sentinel above every numbered version; the default migration target.
    Max,
}

impl MigrationVersion {
    /// Parses a dotted numeric version string.
    pub fn parse(text: &str) -> Result<Self, MigrateError> {
        let invalid = |reason: &str| MigrateError::InvalidVersion {
            version: text.to_string(),
            reason: reason.to_string(),
        };

        if text.is_empty() {
            return Err(invalid("version is empty"));
        }

        let mut parts = Vec::new();
        for component in text.split('.') {
            if component.is_empty() {
                return Err(invalid("empty version component"));
            }
            if !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("version components must be numeric"));
            }
            let value = component
                .parse::<u64>()
                .map_err(|_| invalid("version component out of range"))?;
            parts.push(value);
        }

        Ok(Self::Numbered(parts))
    }

    /// Significant components, with trailing zeros trimmed.
    ///
    /// `1.0` and `1` reduce to the same slice, which keeps `Eq` and `Hash`
    /// consistent with the padded ordering.
    fn significant(&self) -> &[u64] {
        match self {
            Self::Numbered(parts) => {
                let end = parts.iter().rposition(|&p| p != 0).map_or(0, |i| i + 1);
                &parts[..end]
            }
            _ => &[],
        }
    }
}

impl FromStr for MigrationVersion {
    type Err = MigrateError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        use MigrationVersion::{Max, Numbered, Zero};
        match (self, other) {
            (Zero, Zero) | (Max, Max) => Ordering::Equal,
            (Zero, _) | (_, Max) => Ordering::Less,
            (_, Zero) | (Max, _) => Ordering::Greater,
            (Numbered(a), Numbered(b)) => {
                for i in 0..a.len().max(b.len()) {
                    let x = a.get(i).copied().unwrap_or(0);
                    let y = b.get(i).copied().unwrap_or(0);
                    match x.cmp(&y) {
                        Ordering::Equal => {}
                        ord => return ord,
                    }
                }
                Ordering::Equal
            }
        }
    }
}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MigrationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MigrationVersion {}

impl Hash for MigrationVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Zero => state.write_u8(0),
            Self::Numbered(_) => {
                state.write_u8(1);
                for part in self.significant() {
                    state.write_u64(*part);
                }
            }
            Self::Max => state.write_u8(2),
        }
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => f.write_str("0"),
            Self::Numbered(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Self::Max => f.write_str("latest"),
        }
    }
}
