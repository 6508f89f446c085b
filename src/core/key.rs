//! Variable keys.
//!
//! Keys are opaque 64-bit identifiers. The [`symbol`] helper packs a single
//! character tag together with an index, which keeps diagnostic output
//! readable ("x3", "l17") without the library caring how callers mint keys.

use std::collections::BTreeSet;

/// Identifier of a variable in the factor graph
pub type Key = u64;

/// Ordered set of keys, used wherever deterministic iteration matters
pub type KeySet = BTreeSet<Key>;

const TAG_SHIFT: u32 = 56;
const INDEX_MASK: Key = (1 << TAG_SHIFT) - 1;

/// Pack a character tag and an index into a key.
///
/// The tag occupies the top byte, the index the remaining 56 bits. Keys built
/// this way sort first by tag, then by index.
pub fn symbol(tag: char, index: u64) -> Key {
    debug_assert!(tag.is_ascii_alphabetic());
    debug_assert!(index <= INDEX_MASK);
    ((tag as Key) << TAG_SHIFT) | (index & INDEX_MASK)
}

/// Render a key for diagnostics.
///
/// Keys created by [`symbol`] render as `x12`; anything else renders as the
/// raw integer.
pub fn format_key(key: Key) -> String {
    let tag = (key >> TAG_SHIFT) as u8;
    if tag.is_ascii_alphabetic() {
        format!("{}{}", tag as char, key & INDEX_MASK)
    } else {
        format!("{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_roundtrip_formatting() {
        assert_eq!(format_key(symbol('x', 0)), "x0");
        assert_eq!(format_key(symbol('l', 17)), "l17");
    }

    #[test]
    fn test_plain_keys_format_as_integers() {
        assert_eq!(format_key(42), "42");
    }

    #[test]
    fn test_symbols_sort_by_tag_then_index() {
        assert!(symbol('x', 9) < symbol('x', 10));
        assert!(symbol('l', 999) < symbol('x', 0));
    }
}
