//! WAL position marker.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque, totally ordered position inside a write-ahead log.
///
/// ArangoDB reports ticks as decimal strings that may exceed `u64` in
/// future releases, so ticks are never parsed or used for arithmetic.
/// Ordering is numeric-aware: two all-digit ticks compare by significant
/// length first and then lexically, which matches numeric order without
/// converting. All-digit ticks sort before any other tick; the rest
/// compare lexically. Equality and hashing ignore leading zeros.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(String);

impl Tick {
    pub fn new(tick: impl Into<String>) -> Self {
        Self(tick.into())
    }

    /// The position before every entry of the log.
    pub fn origin() -> Self {
        Self("0".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_origin(&self) -> bool {
        self.significant_digits() == Some("")
    }

    fn significant_digits(&self) -> Option<&str> {
        if !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit()) {
            Some(self.0.trim_start_matches('0'))
        } else {
            None
        }
    }
}

impl PartialEq for Tick {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Hash for Tick {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.significant_digits() {
            Some(digits) => {
                0u8.hash(state);
                digits.hash(state);
            }
            None => {
                1u8.hash(state);
                self.0.hash(state);
            }
        }
    }
}

impl Ord for Tick {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.significant_digits(), other.significant_digits()) {
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Tick {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tick {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Tick {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for Tick {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ticks_order_by_magnitude() {
        assert!(Tick::from("9") < Tick::from("10"));
        assert!(Tick::from("123456789012") > Tick::from("99999"));
        assert!(Tick::from("0099") < Tick::from("100"));
        assert_eq!(Tick::from("007"), Tick::from("7"));
    }

    #[test]
    fn test_huge_ticks_compare_without_overflow() {
        let a = Tick::from("340282366920938463463374607431768211456");
        let b = Tick::from("340282366920938463463374607431768211457");
        assert!(a < b);
    }

    #[test]
    fn test_non_numeric_ticks_compare_lexically() {
        assert!(Tick::from("a") < Tick::from("b"));
        assert!(Tick::from("10") < Tick::from("a"));
    }

    #[test]
    fn test_mixed_ticks_have_one_total_order() {
        let mut ticks: Vec<Tick> = ["1a", "10", "2", "b", "002"]
            .into_iter()
            .map(Tick::from)
            .collect();
        ticks.sort();
        let sorted: Vec<&str> = ticks.iter().map(Tick::as_str).collect();
        assert_eq!(sorted, vec!["2", "002", "10", "1a", "b"]);

        // Transitive across the numeric/non-numeric boundary.
        let (two, ten, mixed) = (Tick::from("2"), Tick::from("10"), Tick::from("1a"));
        assert!(two < ten && ten < mixed && two < mixed);
    }

    #[test]
    fn test_equal_ticks_hash_alike() {
        use std::collections::HashSet;

        let set: HashSet<Tick> = ["7", "007", "0007", "a", "0a"]
            .into_iter()
            .map(Tick::from)
            .collect();
        assert_eq!(set.len(), 3);
        assert!(set.contains(&Tick::from("00007")));
    }

    #[test]
    fn test_origin() {
        assert!(Tick::origin().is_origin());
        assert!(Tick::from("000").is_origin());
        assert!(!Tick::from("1").is_origin());
        assert!(Tick::origin() < Tick::from("1"));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&Tick::from("42")).unwrap();
        assert_eq!(json, "\"42\"");
        let tick: Tick = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(tick, Tick::from(42u64));
    }
}
