//! PDF object types.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io::Read;

/// Dictionary of a PDF object, keyed by name without the leading slash.
pub type Dictionary = HashMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (starting with /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(Dictionary),
    /// Stream (dictionary + data)
    Stream {
        /// Stream dictionary
        dict: Dictionary,
        /// Raw (still encoded) stream data
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Human-readable type name, without data.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integer or real as `f64`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Mutable dictionary access for Dictionary and Stream objects.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Decode a PDF text string (UTF-16BE with BOM, otherwise byte-per-char).
    pub fn as_text(&self) -> Option<String> {
        self.as_string().map(decode_text_string)
    }

    /// Check if object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Value of `/Type` when this is a dictionary or stream.
    pub fn dict_type(&self) -> Option<&str> {
        self.as_dict()
            .and_then(|d| d.get("Type"))
            .and_then(|t| t.as_name())
    }

    /// Decode stream data.
    ///
    /// Only FlateDecode is needed for the object and cross-reference streams
    /// this crate reads; other filters are reported as unsupported.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        let (dict, data) = match self {
            Object::Stream { dict, data } => (dict, data),
            _ => {
                return Err(Error::InvalidObjectType {
                    expected: "Stream".to_string(),
                    found: self.type_name().to_string(),
                })
            },
        };

        let filters: Vec<&str> = match dict.get("Filter") {
            None => Vec::new(),
            Some(Object::Name(name)) => vec![name.as_str()],
            Some(Object::Array(arr)) => arr.iter().filter_map(|f| f.as_name()).collect(),
            Some(other) => {
                return Err(Error::InvalidObjectType {
                    expected: "Name or Array".to_string(),
                    found: other.type_name().to_string(),
                })
            },
        };

        let mut decoded = data.to_vec();
        for filter in filters {
            decoded = match filter {
                "FlateDecode" | "Fl" => {
                    let mut out = Vec::new();
                    flate2::read::ZlibDecoder::new(decoded.as_slice())
                        .read_to_end(&mut out)
                        .map_err(|e| Error::InvalidPdf(format!("FlateDecode failed: {}", e)))?;
                    out
                },
                other => return Err(Error::Unsupported(format!("stream filter /{}", other))),
            };
        }
        Ok(decoded)
    }
}

/// Decode a PDF text string to UTF-8.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_object_casts() {
        assert_eq!(Object::Integer(42).as_integer(), Some(42));
        assert_eq!(Object::Integer(42).as_number(), Some(42.0));
        assert_eq!(Object::Real(1.5).as_number(), Some(1.5));
        assert_eq!(Object::Name("Sig".to_string()).as_name(), Some("Sig"));
        assert!(Object::Null.is_null());
        assert!(Object::Integer(1).as_name().is_none());
    }

    #[test]
    fn test_stream_dict_access() {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::Name("ObjStm".to_string()));
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"data"),
        };
        assert_eq!(obj.dict_type(), Some("ObjStm"));
    }

    #[test]
    fn test_object_ref_display_and_order() {
        assert_eq!(format!("{}", ObjectRef::new(10, 0)), "10 0 R");
        assert!(ObjectRef::new(2, 0) < ObjectRef::new(10, 0));
    }

    #[test]
    fn test_text_string_utf16() {
        let obj = Object::String(vec![0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42]);
        assert_eq!(obj.as_text().as_deref(), Some("AB"));
        let plain = Object::String(b"FooterSig".to_vec());
        assert_eq!(plain.as_text().as_deref(), Some("FooterSig"));
    }

    #[test]
    fn test_decode_flate_stream() {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"1 0 2 5 ").unwrap();
        let compressed = enc.finish().unwrap();

        let mut dict = Dictionary::new();
        dict.insert("Filter".to_string(), Object::Name("FlateDecode".to_string()));
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from(compressed),
        };
        assert_eq!(obj.decode_stream_data().unwrap(), b"1 0 2 5 ");
    }

    #[test]
    fn test_decode_unsupported_filter() {
        let mut dict = Dictionary::new();
        dict.insert("Filter".to_string(), Object::Name("LZWDecode".to_string()));
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"x"),
        };
        assert!(matches!(obj.decode_stream_data(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_decode_not_a_stream() {
        match Object::Integer(42).decode_stream_data() {
            Err(Error::InvalidObjectType { expected, found }) => {
                assert_eq!(expected, "Stream");
                assert_eq!(found, "Integer");
            },
            _ => panic!("Expected InvalidObjectType error"),
        }
    }
}
