//! Human-readable byte sizes for command-line arguments.

use derive_more::{Display, Error};
use std::str::FromStr;

#[derive(Debug, Display, Error)]
#[display("invalid size {_0:?}: expected bytes or a number followed by B, KB, MB, GB, TB, KiB, MiB, GiB or TiB")]
pub struct InvalidSize(#[error(not(source))] String);

/// A size in bytes, parsed from `4096`, `512MB`, `1.5GiB` and similar.
///
/// Decimal units (`KB`, `MB`, ...) are powers of 1000 and binary units
/// (`KiB`, `MiB`, ...) powers of 1024. Units are case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl FromStr for ByteSize {
    type Err = InvalidSize;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSize(s.to_string());
        let trimmed = s.trim();
        let split = trimmed.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" => 1_000,
            "m" | "mb" => 1_000_000,
            "g" | "gb" => 1_000_000_000,
            "t" | "tb" => 1_000_000_000_000,
            "kib" => 1 << 10,
            "mib" => 1 << 20,
            "gib" => 1 << 30,
            "tib" => 1 << 40,
            _ => return Err(invalid()),
        };
        if let Ok(whole) = number.parse::<u64>() {
            return whole.checked_mul(multiplier).map(Self).ok_or_else(invalid);
        }
        let fractional: f64 = number.parse().map_err(|_| invalid())?;
        let bytes = (fractional * multiplier as f64).floor();
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(invalid());
        }
        Ok(Self(bytes as u64))
    }
}
