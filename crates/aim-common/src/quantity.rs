//! Resource quantity arithmetic
//!
//! Quantities stay strings on the wire ("32Gi", "500M", "4"). These helpers
//! parse them to bytes, scale them per GPU, and compute storage sizes with
//! headroom.

use crate::{Error, Result};

/// Bytes in one GiB
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Default storage headroom percentage
pub const DEFAULT_HEADROOM_PERCENT: u32 = 10;

const SUFFIXES: [(&str, u64); 12] = [
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Split a quantity into its numeric prefix and suffix.
fn split_quantity(qty: &str) -> (&str, &str) {
    let qty = qty.trim();
    for (suffix, _) in SUFFIXES {
        if let Some(prefix) = qty.strip_suffix(suffix) {
            return (prefix, suffix);
        }
    }
    (qty, "")
}

fn multiplier(suffix: &str) -> u64 {
    SUFFIXES
        .iter()
        .find(|(s, _)| *s == suffix)
        .map(|(_, m)| *m)
        .unwrap_or(1)
}

/// Parse a byte quantity ("10Gi", "500M", "1.5Gi", "1073741824") into bytes.
///
/// Fractional values round up to the next whole byte.
pub fn parse_bytes(qty: &str) -> Result<u64> {
    let (prefix, suffix) = split_quantity(qty);
    let mult = multiplier(suffix);
    if let Ok(n) = prefix.parse::<u64>() {
        return n
            .checked_mul(mult)
            .ok_or_else(|| Error::validation(format!("quantity '{qty}' overflows")));
    }
    match prefix.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Ok((f * mult as f64).ceil() as u64),
        _ => Err(Error::validation(format!(
            "invalid quantity '{qty}' (expected e.g., '128Mi', '1Gi')"
        ))),
    }
}

/// Multiply a quantity by an integer factor, keeping its suffix.
///
/// `scale("32Gi", 2)` is "64Gi"; `scale("500m", 3)` is "1500m".
pub fn scale(qty: &str, factor: u64) -> Result<String> {
    let qty = qty.trim();
    let (prefix, suffix) = match qty.strip_suffix('m') {
        Some(prefix) => (prefix, "m"),
        None => split_quantity(qty),
    };
    if let Ok(n) = prefix.parse::<u64>() {
        let scaled = n
            .checked_mul(factor)
            .ok_or_else(|| Error::validation(format!("quantity '{qty}' overflows")))?;
        return Ok(format!("{scaled}{suffix}"));
    }
    match prefix.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Ok(format!("{}{}", f * factor as f64, suffix)),
        _ => Err(Error::validation(format!("invalid quantity '{qty}'"))),
    }
}

/// Render a whole number of GiB as a quantity string
pub fn format_gi(gi: u64) -> String {
    format!("{gi}Gi")
}

/// A named byte size, typically one model weight source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizedSource<'a> {
    /// Source name for error messages
    pub name: &'a str,
    /// Size in bytes (0 means unknown)
    pub bytes: u64,
}

/// Storage needed to hold `sources` plus `headroom_percent`, in whole GiB.
///
/// The result rounds up and is never below 1 GiB. Any source without a known
/// size makes the total unknowable and is an error.
pub fn required_storage_gi(sources: &[SizedSource<'_>], headroom_percent: u32) -> Result<u64> {
    if sources.is_empty() {
        return Err(Error::validation("no model sources to size storage for"));
    }
    let mut total: u128 = 0;
    for source in sources {
        if source.bytes == 0 {
            return Err(Error::validation(format!(
                "model source {:?} has no size specified",
                source.name
            )));
        }
        total += u128::from(source.bytes);
    }

    let with_headroom = (total * (100 + u128::from(headroom_percent))).div_ceil(100);
    let gi = with_headroom.div_ceil(u128::from(GIB));
    Ok(u64::try_from(gi).unwrap_or(u64::MAX).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1Gi", GIB)]
    #[case("512Mi", 512 * 1024 * 1024)]
    #[case("500M", 500_000_000)]
    #[case("1.5Gi", GIB + GIB / 2)]
    #[case("1024", 1024)]
    fn parses_byte_quantities(#[case] qty: &str, #[case] bytes: u64) {
        assert_eq!(parse_bytes(qty).unwrap(), bytes);
    }

    #[test]
    fn rejects_garbage_quantities() {
        assert!(parse_bytes("lots").is_err());
        assert!(parse_bytes("-1Gi").is_err());
    }

    #[rstest]
    #[case("32Gi", 2, "64Gi")]
    #[case("4", 2, "8")]
    #[case("500m", 3, "1500m")]
    #[case("48Gi", 1, "48Gi")]
    fn scales_quantities(#[case] qty: &str, #[case] factor: u64, #[case] expected: &str) {
        assert_eq!(scale(qty, factor).unwrap(), expected);
    }

    #[test]
    fn storage_applies_headroom_and_rounds_up() {
        let sources = [SizedSource {
            name: "weights",
            bytes: 10 * GIB,
        }];
        assert_eq!(required_storage_gi(&sources, 10).unwrap(), 11);
        assert_eq!(required_storage_gi(&sources, 0).unwrap(), 10);
        assert_eq!(required_storage_gi(&sources, 15).unwrap(), 12);
    }

    #[test]
    fn storage_sums_all_sources() {
        let sources = [
            SizedSource {
                name: "a",
                bytes: 3 * GIB,
            },
            SizedSource {
                name: "b",
                bytes: 2 * GIB,
            },
        ];
        assert_eq!(required_storage_gi(&sources, 10).unwrap(), 6);
    }

    #[test]
    fn storage_never_below_one_gib() {
        let sources = [SizedSource {
            name: "tiny",
            bytes: 1,
        }];
        assert_eq!(required_storage_gi(&sources, 10).unwrap(), 1);
    }

    #[test]
    fn storage_lower_bound_holds_for_many_sizes() {
        for bytes in [1, GIB - 1, GIB, GIB + 1, 7 * GIB + 123, 100 * GIB] {
            for headroom in [0, 10, 25, 100] {
                let gi = required_storage_gi(&[SizedSource { name: "s", bytes }], headroom).unwrap();
                let needed = (bytes as f64) * (1.0 + headroom as f64 / 100.0);
                let capacity = (gi as f64) * (GIB as f64);
                assert!(capacity >= needed * (1.0 - 1e-12), "{bytes} @ {headroom}% -> {gi}");
                assert!(capacity < needed + GIB as f64 + 1.0, "{bytes} @ {headroom}% overshoots");
                assert!(gi >= 1);
            }
        }
    }

    #[test]
    fn storage_rejects_empty_and_unsized_sources() {
        assert!(required_storage_gi(&[], 10).is_err());
        let err = required_storage_gi(&[SizedSource { name: "w", bytes: 0 }], 10).unwrap_err();
        assert!(err.to_string().contains("has no size specified"));
    }
}
