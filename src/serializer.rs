//! PDF object serialization.
//!
//! Objects written into an incremental revision go through here. Output is
//! deterministic: dictionary keys are sorted, so serializing the same object
//! twice yields the same bytes.

use crate::object::{Dictionary, Object, ObjectRef};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Put each dictionary entry on its own line
    pretty: bool,
}

impl ObjectSerializer {
    /// Compact serializer (single-line dictionaries).
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializer that writes one dictionary entry per line.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an indirect object definition:
    /// `{id} {gen} obj\n{object}\nendobj\n`.
    pub fn serialize_indirect(&self, reference: ObjectRef, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", reference.id, reference.gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    fn write_object(&self, buf: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => buf.extend_from_slice(b"null"),
            Object::Boolean(b) => buf.extend_from_slice(if *b { &b"true"[..] } else { &b"false"[..] }),
            Object::Integer(i) => buf.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(buf, *r),
            Object::String(s) => write_string(buf, s),
            Object::Name(n) => write_name(buf, n),
            Object::Array(arr) => {
                buf.push(b'[');
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    self.write_object(buf, item);
                }
                buf.push(b']');
            },
            Object::Dictionary(dict) => self.write_dictionary(buf, dict),
            Object::Stream { dict, data } => {
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dictionary(buf, &dict);
                buf.extend_from_slice(b"\nstream\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => buf.extend_from_slice(r.to_string().as_bytes()),
        }
    }

    fn write_dictionary(&self, buf: &mut Vec<u8>, dict: &Dictionary) {
        let mut entries: Vec<_> = dict.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        buf.extend_from_slice(b"<<");
        for (key, value) in entries {
            buf.extend_from_slice(if self.pretty { b"\n" } else { b" " });
            write_name(buf, key);
            buf.push(b' ');
            self.write_object(buf, value);
        }
        buf.extend_from_slice(if self.pretty { b"\n>>" } else { b" >>" });
    }
}

/// Reals with at most five decimals, trailing zeros trimmed.
fn write_real(buf: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        buf.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        buf.extend_from_slice(trimmed.as_bytes());
    }
}

/// Literal string for printable ASCII, hex string otherwise.
fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    let printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

    if printable {
        buf.push(b'(');
        for &byte in data {
            match byte {
                b'(' | b')' | b'\\' => buf.extend_from_slice(&[b'\\', byte]),
                b'\n' => buf.extend_from_slice(b"\\n"),
                b'\r' => buf.extend_from_slice(b"\\r"),
                b'\t' => buf.extend_from_slice(b"\\t"),
                _ => buf.push(byte),
            }
        }
        buf.push(b')');
    } else {
        buf.push(b'<');
        buf.extend_from_slice(to_hex_upper(data).as_bytes());
        buf.push(b'>');
    }
}

/// Names escape delimiters, whitespace, `#` and non-printables as `#XX`.
fn write_name(buf: &mut Vec<u8>, name: &str) {
    buf.push(b'/');
    for byte in name.bytes() {
        let plain = (0x21..=0x7E).contains(&byte)
            && byte != b'#'
            && !crate::lexer::is_delimiter(byte);
        if plain {
            buf.push(byte);
        } else {
            buf.extend_from_slice(format!("#{:02X}", byte).as_bytes());
        }
    }
}

/// Uppercase hex encoding.
pub fn to_hex_upper(data: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(data.len() * 2);
    for &b in data {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0F) as usize] as char);
    }
    out
}
