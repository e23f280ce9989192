//! The event store's opaque, monotonically orderable read position.
use std::fmt;
use std::str::FromStr;

/// A totally ordered `(timestamp ticks, sequence)` pair.
///
/// # Why
/// Event time alone does not uniquely order messages — two writes can
/// share a timestamp. Pairing the timestamp with a monotonically
/// increasing sequence number (assigned at write time, §4.3) gives every
/// message in one store a distinct, lexicographically comparable
/// position, with arrival order as the tiebreaker for same-timestamp
/// writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CursorPosition {
    primary: i64,
    secondary: i64,
}

impl CursorPosition {
    pub fn new(primary: i64, secondary: i64) -> Self {
        CursorPosition { primary, secondary }
    }

    pub fn primary(&self) -> i64 {
        self.primary
    }

    pub fn secondary(&self) -> i64 {
        self.secondary
    }
}

impl fmt::Display for CursorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.primary, self.secondary)
    }
}

/// Bit-exact parse failure: anything other than exactly one `|` with two
/// base-10 `int64` sides is rejected, never partially accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed cursor position")]
pub struct CursorParseError;

impl FromStr for CursorPosition {
    type Err = CursorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('|');
        let (Some(primary), Some(secondary), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CursorParseError);
        };
        let primary = primary.parse::<i64>().map_err(|_| CursorParseError)?;
        let secondary = secondary.parse::<i64>().map_err(|_| CursorParseError)?;
        Ok(CursorPosition { primary, secondary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_then_parse_round_trips() {
        let cursor = CursorPosition::new(100, 7);
        assert_eq!(cursor.to_string(), "100|7");
        assert_eq!(cursor.to_string().parse::<CursorPosition>().unwrap(), cursor);
    }

    #[test]
    fn ordering_is_lexicographic_on_primary_then_secondary() {
        assert!(CursorPosition::new(1, 5) < CursorPosition::new(2, 0));
        assert!(CursorPosition::new(5, 0) < CursorPosition::new(5, 1));
    }

    #[test]
    fn parse_rejects_anything_but_exactly_one_separator() {
        assert!("100".parse::<CursorPosition>().is_err());
        assert!("100|7|9".parse::<CursorPosition>().is_err());
        assert!("abc|7".parse::<CursorPosition>().is_err());
        assert!("100|abc".parse::<CursorPosition>().is_err());
    }
}
