//! ByteRange handling and the signed-bytes digest.
//!
//! A ByteRange is `[offset1 length1 offset2 length2]`: two spans of the file
//! that are hashed together, leaving out the `/Contents <...>` hex string that
//! holds the signature. The same [`digest`] function is used when signing and
//! when verifying.
//!
//! The placeholder helpers reserve fixed-width slots for the ByteRange array
//! and the signature hex so both can be filled in place after the revision
//! has been written.

use crate::error::{Error, Result};
use crate::lexer::{is_delimiter, is_whitespace};
use crate::object::Object;
use crate::serializer::to_hex_upper;
use sha2::{Digest, Sha256};
use std::ops::Range;

/// Length of the SHA-256 digest over the ByteRange.
pub const DIGEST_LEN: usize = 32;

/// Name of the ByteRange digest algorithm, as reported in errors.
pub const DIGEST_ALGORITHM: &str = "SHA-256";

/// Digits per number in a reserved ByteRange slot.
const SLOT_DIGITS: usize = 10;

/// The two hashed spans of a signed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ByteRange {
    /// Start of the first span (0 for a whole-file signature)
    pub offset1: usize,
    /// Length of the first span
    pub length1: usize,
    /// Start of the second span
    pub offset2: usize,
    /// Length of the second span
    pub length2: usize,
}

impl ByteRange {
    /// Create a ByteRange from its four values.
    pub fn new(offset1: usize, length1: usize, offset2: usize, length2: usize) -> Self {
        Self {
            offset1,
            length1,
            offset2,
            length2,
        }
    }

    /// ByteRange of a `total`-byte file excluding `excluded`.
    pub fn around(excluded: Range<usize>, total: usize) -> Self {
        Self::new(0, excluded.start, excluded.end, total.saturating_sub(excluded.end))
    }

    /// Read a `/ByteRange` array.
    pub fn from_object(obj: &Object) -> Result<Self> {
        let values: Vec<usize> = obj
            .as_array()
            .ok_or_else(|| Error::MalformedRange(format!("expected array, found {}", obj.type_name())))?
            .iter()
            .map(|v| {
                v.as_integer()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| Error::MalformedRange("entries must be non-negative integers".to_string()))
            })
            .collect::<Result<_>>()?;

        match values.as_slice() {
            &[o1, l1, o2, l2] => Ok(Self::new(o1, l1, o2, l2)),
            other => Err(Error::MalformedRange(format!("expected 4 entries, found {}", other.len()))),
        }
    }

    /// End of the second span: the file length at signing time.
    pub fn end(&self) -> usize {
        self.offset2.saturating_add(self.length2)
    }

    /// Bytes between the two spans (the signature placeholder).
    pub fn excluded(&self) -> Range<usize> {
        self.offset1.saturating_add(self.length1)..self.offset2
    }

    /// Whether byte `index` is hashed.
    pub fn covers(&self, index: usize) -> bool {
        (self.offset1..self.offset1.saturating_add(self.length1)).contains(&index)
            || (self.offset2..self.end()).contains(&index)
    }

    /// Check the spans against a document of `len` bytes.
    ///
    /// Fails when a span is out of bounds, when the spans overlap or are out of
    /// order, or when they are both empty.
    pub fn validate(&self, len: usize) -> Result<()> {
        let end1 = self
            .offset1
            .checked_add(self.length1)
            .ok_or_else(|| Error::MalformedRange("first span overflows".to_string()))?;
        let end2 = self
            .offset2
            .checked_add(self.length2)
            .ok_or_else(|| Error::MalformedRange("second span overflows".to_string()))?;

        if self.length1 == 0 && self.length2 == 0 {
            return Err(Error::MalformedRange("both spans are empty".to_string()));
        }
        if end1 > len || end2 > len {
            return Err(Error::MalformedRange(format!(
                "{} exceeds document length {}",
                self, len
            )));
        }
        if end1 > self.offset2 {
            return Err(Error::MalformedRange(format!(
                "{}: spans overlap or are out of order",
                self
            )));
        }
        Ok(())
    }

    /// Zero-padded form that fits a slot reserved with [`reserved_slot`].
    pub fn to_slot_string(&self) -> String {
        format!(
            "[{} {:0w$} {:0w$} {:0w$}]",
            self.offset1,
            self.length1,
            self.offset2,
            self.length2,
            w = SLOT_DIGITS
        )
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {} {} {}]", self.offset1, self.length1, self.offset2, self.length2)
    }
}

/// SHA-256 over the two spans of `data` described by `range`.
pub fn digest(data: &[u8], range: &ByteRange) -> Result<[u8; DIGEST_LEN]> {
    range.validate(data.len())?;
    let mut hasher = Sha256::new();
    hasher.update(&data[range.offset1..range.offset1 + range.length1]);
    hasher.update(&data[range.offset2..range.end()]);
    Ok(hasher.finalize().into())
}

/// Placeholder ByteRange array written before offsets are known.
pub fn reserved_slot() -> String {
    ByteRange::new(0, 0, 0, 0).to_slot_string()
}

/// Zero-filled `/Contents` hex string with room for `signature_len` DER bytes.
pub fn contents_placeholder(signature_len: usize) -> String {
    format!("<{}>", "0".repeat(signature_len * 2))
}

/// Span of the value following `key` inside `data[within]`, for values
/// delimited by `open` and `close` (e.g. `<`/`>` or `[`/`]`).
///
/// Only a key of the outermost dictionary counts. Names inside strings,
/// comments, arrays and nested dictionaries are skipped.
fn find_value_span(data: &[u8], within: Range<usize>, key: &[u8], open: u8, close: u8) -> Option<Range<usize>> {
    let window = data.get(within.clone())?;
    let mut dict_depth = 0usize;
    let mut array_depth = 0usize;
    let mut i = 0;
    while i < window.len() {
        match window[i] {
            b'%' => {
                while window.get(i).is_some_and(|&c| c != b'\r' && c != b'\n') {
                    i += 1;
                }
                continue;
            },
            b'(' => {
                i = skip_literal_string(window, i)?;
                continue;
            },
            b'<' if window.get(i + 1) == Some(&b'<') => {
                dict_depth += 1;
                i += 2;
                continue;
            },
            b'>' if window.get(i + 1) == Some(&b'>') => {
                dict_depth = dict_depth.saturating_sub(1);
                i += 2;
                continue;
            },
            b'<' => {
                i += window[i..].iter().position(|&c| c == b'>')? + 1;
                continue;
            },
            b'[' => array_depth += 1,
            b']' => array_depth = array_depth.saturating_sub(1),
            b'/' => {
                let name_start = i;
                i += 1;
                while window.get(i).is_some_and(|&c| !is_whitespace(c) && !is_delimiter(c)) {
                    i += 1;
                }
                if dict_depth != 1 || array_depth != 0 || &window[name_start..i] != key {
                    continue;
                }
                while window.get(i).is_some_and(|&c| is_whitespace(c)) {
                    i += 1;
                }
                if window.get(i) != Some(&open) {
                    return None;
                }
                let close_at = window[i + 1..].iter().position(|&c| c == close)? + i + 1;
                return Some(within.start + i..within.start + close_at + 1);
            },
            _ => {},
        }
        i += 1;
    }
    None
}

/// Index just past the literal string opening at `start`, honouring nested
/// parentheses and backslash escapes. `None` when it is unterminated.
fn skip_literal_string(window: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i < window.len() {
        match window[i] {
            b'\\' => i += 1,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            },
            _ => {},
        }
        i += 1;
    }
    None
}

/// Span of the `/Contents <...>` hex string (delimiters included).
pub fn find_contents_span(data: &[u8], within: Range<usize>) -> Option<Range<usize>> {
    find_value_span(data, within, b"/Contents", b'<', b'>')
}

/// Span of the `/ByteRange [...]` array (brackets included).
pub fn find_byte_range_span(data: &[u8], within: Range<usize>) -> Option<Range<usize>> {
    find_value_span(data, within, b"/ByteRange", b'[', b']')
}

/// Overwrite the reserved ByteRange slot at `slot` with `range`.
pub fn write_byte_range(data: &mut [u8], slot: Range<usize>, range: &ByteRange) -> Result<()> {
    let text = range.to_slot_string();
    if text.len() != slot.len() {
        return Err(Error::Serialization(format!(
            "ByteRange {} needs {} bytes, slot has {}",
            range,
            text.len(),
            slot.len()
        )));
    }
    data[slot].copy_from_slice(text.as_bytes());
    Ok(())
}

/// Write `signature` as hex into the `/Contents` placeholder at `span`
/// (delimiters included). Unused digits stay `0`.
pub fn write_signature(data: &mut [u8], span: Range<usize>, signature: &[u8]) -> Result<()> {
    let available = span.len().saturating_sub(2);
    let hex = to_hex_upper(signature);
    if hex.len() > available {
        return Err(Error::PlaceholderOverflow {
            needed: hex.len(),
            available,
        });
    }
    let start = span.start + 1;
    data[start..start + hex.len()].copy_from_slice(hex.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_around_and_excluded() {
        let range = ByteRange::around(100..150, 400);
        assert_eq!(range, ByteRange::new(0, 100, 150, 250));
        assert_eq!(range.excluded(), 100..150);
        assert_eq!(range.end(), 400);
        assert!(range.covers(0) && range.covers(99) && range.covers(150) && range.covers(399));
        assert!(!range.covers(100) && !range.covers(149) && !range.covers(400));
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let len = 100;
        assert!(ByteRange::new(0, 10, 20, 80).validate(len).is_ok());
        assert!(matches!(
            ByteRange::new(0, 10, 20, 81).validate(len),
            Err(Error::MalformedRange(_))
        ));
        assert!(matches!(
            ByteRange::new(0, 30, 20, 10).validate(len),
            Err(Error::MalformedRange(_))
        ));
        assert!(matches!(
            ByteRange::new(0, 0, 50, 0).validate(len),
            Err(Error::MalformedRange(_))
        ));
        assert!(matches!(
            ByteRange::new(usize::MAX, 2, 0, 0).validate(len),
            Err(Error::MalformedRange(_))
        ));
    }

    #[test]
    fn test_digest_skips_excluded_bytes() {
        let mut data = b"HEAD<ABCD>TAIL".to_vec();
        let range = ByteRange::around(4..10, data.len());
        let before = digest(&data, &range).unwrap();

        data[6] = b'F';
        assert_eq!(digest(&data, &range).unwrap(), before);

        data[1] = b'x';
        assert_ne!(digest(&data, &range).unwrap(), before);

        let expected: [u8; 32] = Sha256::digest(b"HxADTAIL").into();
        assert_eq!(digest(&data, &range).unwrap(), expected);
    }

    #[test]
    fn test_from_object() {
        let obj = Object::Array(vec![
            Object::Integer(0),
            Object::Integer(10),
            Object::Integer(20),
            Object::Integer(5),
        ]);
        assert_eq!(ByteRange::from_object(&obj).unwrap(), ByteRange::new(0, 10, 20, 5));
        assert!(ByteRange::from_object(&Object::Array(vec![Object::Integer(-1); 4])).is_err());
        assert!(ByteRange::from_object(&Object::Array(vec![Object::Integer(1); 3])).is_err());
        assert!(ByteRange::from_object(&Object::Null).is_err());
    }

    #[test]
    fn test_slot_round_trip() {
        let sig_dict = format!(
            "<< /ByteRange {} /Contents {} /ContentsX 1 >>",
            reserved_slot(),
            contents_placeholder(4)
        );
        let mut data = sig_dict.into_bytes();
        let all = 0..data.len();

        let slot = find_byte_range_span(&data, all.clone()).unwrap();
        let contents = find_contents_span(&data, all.clone()).unwrap();
        assert_eq!(&data[contents.clone()], b"<00000000>");

        let range = ByteRange::around(contents.clone(), 123_456);
        write_byte_range(&mut data, slot.clone(), &range).unwrap();
        write_signature(&mut data, contents.clone(), &[0xAB, 0x01]).unwrap();

        let (_, parsed) = crate::parser::parse_object(&data).unwrap();
        let dict = parsed.as_dict().unwrap();
        assert_eq!(ByteRange::from_object(dict.get("ByteRange").unwrap()).unwrap(), range);
        assert_eq!(&data[contents], b"<AB010000>");
    }

    #[test]
    fn test_signature_overflow() {
        let mut data = contents_placeholder(2).into_bytes();
        let span = 0..data.len();
        assert!(matches!(
            write_signature(&mut data, span, &[1, 2, 3]),
            Err(Error::PlaceholderOverflow {
                needed: 6,
                available: 4
            })
        ));
    }

    #[test]
    fn test_contents_key_must_be_followed_by_hex() {
        let data = b"<< /Contents (literal) >>";
        assert_eq!(find_contents_span(data, 0..data.len()), None);
    }

    #[test]
    fn test_only_top_level_keys_match() {
        let data = b"7 0 obj\n<< /Type /Sig /Reason (see /Contents <00> \\) and (nested /Contents <01>)) \
% /Contents <02>\n/Prop_Build << /App << /Contents <AA> /ByteRange [9 9 9 9] >> >> \
/Refs [<< /Contents <BB> >>] /Contents <0000> /ByteRange [0 1 2 3] >>\nendobj\n";
        let all = 0..data.len();
        let contents = find_contents_span(data, all.clone()).unwrap();
        assert_eq!(&data[contents], b"<0000>");
        let byte_range = find_byte_range_span(data, all).unwrap();
        assert_eq!(&data[byte_range], b"[0 1 2 3]");
    }

    #[test]
    fn test_nested_key_alone_is_not_found() {
        let data = b"<< /Type /Sig /Prop_Build << /Contents <AA> >> /Name (/Contents <BB>) >>";
        assert_eq!(find_contents_span(data, 0..data.len()), None);
        let unterminated = b"<< /Reason (open /Contents <00> >>";
        assert_eq!(find_contents_span(unterminated, 0..unterminated.len()), None);
    }

    proptest! {
        #[test]
        fn prop_digest_ignores_only_excluded_span(
            data in proptest::collection::vec(any::<u8>(), 8..256),
            a in 0usize..1000,
            b in 0usize..1000,
            flip in 0usize..1000,
        ) {
            let len = data.len();
            let (start, end) = {
                let (x, y) = (a % len, b % len);
                (x.min(y), x.max(y))
            };
            let range = ByteRange::around(start..end, len);
            prop_assume!(range.validate(len).is_ok());

            let original = digest(&data, &range).unwrap();
            let idx = flip % len;
            let mut tampered = data.clone();
            tampered[idx] = tampered[idx].wrapping_add(1);

            let changed = digest(&tampered, &range).unwrap() != original;
            prop_assert_eq!(changed, range.covers(idx));
        }
    }
}
