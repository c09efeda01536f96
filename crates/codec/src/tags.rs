//! Wire tag constants
//!
//! Tags `0..=8` identify primitive kinds. Structural types register a tag in
//! `[NEXT_TAG, MAX_TAG]` so that every tag fits in a signed byte.

use once_cell::sync::Lazy;

/// Boolean (1 byte, 0 or 1)
pub const BOOLEAN: u8 = 0;
/// Signed byte
pub const BYTE: u8 = 1;
/// 16-bit signed integer
pub const SHORT: u8 = 2;
/// Unicode scalar value (4 bytes)
pub const CHAR: u8 = 3;
/// 32-bit signed integer
pub const INT: u8 = 4;
/// 64-bit signed integer
pub const LONG: u8 = 5;
/// IEEE 754 single precision
pub const FLOAT: u8 = 6;
/// IEEE 754 double precision
pub const DOUBLE: u8 = 7;
/// Nullable UTF-8 string
pub const STRING: u8 = 8;

/// First tag available to structural types.
pub const NEXT_TAG: i32 = 9;

/// Last tag available to structural types.
pub const MAX_TAG: i32 = 127;

/// Environment variable enabling per-tag trace logging.
pub const TAG_DEBUG_ENV: &str = "TALLY_TAG_DEBUG";

/// Resolved once: per-call lookups would dominate the cost of small writes.
pub(crate) static TAG_DEBUG: Lazy<bool> = Lazy::new(|| {
    std::env::var(TAG_DEBUG_ENV)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
});

/// Human-readable name of a primitive tag, `None` for structural tags.
pub fn primitive_name(tag: u8) -> Option<&'static str> {
    match tag {
        BOOLEAN => Some("boolean"),
        BYTE => Some("byte"),
        SHORT => Some("short"),
        CHAR => Some("char"),
        INT => Some("int"),
        LONG => Some("long"),
        FLOAT => Some("float"),
        DOUBLE => Some("double"),
        STRING => Some("string"),
        _ => None,
    }
}

/// Returns `true` if `tag` is usable by a structural type.
pub fn is_structural(tag: i32) -> bool {
    (NEXT_TAG..=MAX_TAG).contains(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_tags_are_below_next_tag() {
        for tag in [BOOLEAN, BYTE, SHORT, CHAR, INT, LONG, FLOAT, DOUBLE, STRING] {
            assert!((tag as i32) < NEXT_TAG);
            assert!(primitive_name(tag).is_some());
        }
    }

    #[test]
    fn structural_range() {
        assert!(!is_structural(8));
        assert!(is_structural(9));
        assert!(is_structural(127));
        assert!(!is_structural(128));
        assert!(!is_structural(-1));
        assert_eq!(primitive_name(9), None);
    }
}
