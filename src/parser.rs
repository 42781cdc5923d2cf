//! PDF object parser.
//!
//! Recursive descent over lexer tokens: one token decides the object kind,
//! composite objects recurse. The nom-level functions return `IResult`; the
//! `*_at` helpers wrap them with byte offsets for callers working on a whole
//! file.

use crate::error::{Error, Result};
use crate::lexer::{Token, is_whitespace, token};
use crate::object::{Dictionary, Object, ObjectRef};
use nom::IResult;

type ParseResult<'a, T> = IResult<&'a [u8], T>;

fn fail(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Decode escape sequences in PDF literal strings (ISO 32000-1, 7.3.4.2).
///
/// ```
/// # use pdf_seal::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"A\\(1\\)\\101"), b"A(1)A");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }

        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'(' | b')' | b'\\' => out.push(escaped),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut code = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match raw.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            code = code * 8 + u32::from(d - b'0');
                            i += 1;
                            digits += 1;
                        },
                        _ => break,
                    }
                }
                out.push((code & 0xFF) as u8);
            },
            other => out.push(other),
        }
    }

    out
}

/// Parse a PDF object (direct object, reference, or stream).
///
/// ```
/// use pdf_seal::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /ByteRange [0 10 20 5] >>").unwrap();
/// assert!(obj.as_dict().unwrap().contains_key("ByteRange"));
/// ```
pub fn parse_object(input: &[u8]) -> ParseResult<'_, Object> {
    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),
        Token::Integer(i) => {
            // `id gen R` lookahead
            if let Ok((after_gen, Token::Integer(gen))) = token(input) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if let (Ok(id), Ok(gen)) = (u32::try_from(i), u16::try_from(gen)) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(id, gen))));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },
        Token::Real(r) => Ok((input, Object::Real(r))),
        Token::LiteralString(raw) => Ok((input, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => match decode_hex(raw) {
            Ok(bytes) => Ok((input, Object::String(bytes))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::HexDigit,
            ))),
        },
        Token::Name(name) => Ok((input, Object::Name(name))),
        Token::ArrayStart => parse_array(input),
        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input)?;
            match token(remaining) {
                Ok((stream_input, Token::StreamStart)) => {
                    let (rest, data) = parse_stream_data(stream_input, &dict)?;
                    Ok((
                        rest,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::from(data),
                        },
                    ))
                },
                _ => Ok((remaining, Object::Dictionary(dict))),
            }
        },
        _ => Err(fail(input, nom::error::ErrorKind::Tag)),
    }
}

/// Parse `id gen obj <object> endobj`.
///
/// A missing `endobj` is tolerated; the returned input then starts right
/// after the object body.
pub fn parse_indirect_object(input: &[u8]) -> ParseResult<'_, (ObjectRef, Object)> {
    let (rest, id) = match token(input)? {
        (rest, Token::Integer(id)) if id >= 0 => (rest, id),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let (rest, gen) = match token(rest)? {
        (rest, Token::Integer(gen)) if (0..=i64::from(u16::MAX)).contains(&gen) => (rest, gen),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let rest = match token(rest)? {
        (rest, Token::ObjStart) => rest,
        _ => return Err(fail(input, nom::error::ErrorKind::Tag)),
    };
    let (rest, object) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => rest,
    };

    let id = u32::try_from(id).map_err(|_| fail(input, nom::error::ErrorKind::Digit))?;
    Ok((rest, (ObjectRef::new(id, gen as u16), object)))
}

/// Stream data after the `stream` keyword.
///
/// A direct `/Length` is trusted when `endstream` follows it; otherwise the
/// data runs to the next `endstream` keyword.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dictionary) -> ParseResult<'a, Vec<u8>> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(|l| l.as_integer()) {
        if let Ok(length) = usize::try_from(length) {
            if length <= input.len() {
                if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
                    return Ok((rest, input[..length].to_vec()));
                }
            }
        }
        log::debug!("stream /Length {} does not reach endstream, scanning", length);
    }

    match find_keyword(input, b"endstream") {
        Some(pos) => {
            let mut data = &input[..pos];
            if data.ends_with(b"\r\n") {
                data = &data[..data.len() - 2];
            } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
                data = &data[..data.len() - 1];
            }
            Ok((&input[pos + b"endstream".len()..], data.to_vec()))
        },
        None => Err(fail(input, nom::error::ErrorKind::Eof)),
    }
}

/// Position of the first occurrence of `keyword` in `input`.
pub fn find_keyword(input: &[u8], keyword: &[u8]) -> Option<usize> {
    input
        .windows(keyword.len())
        .position(|window| window == keyword)
}

fn parse_array(input: &[u8]) -> ParseResult<'_, Object> {
    let mut items = Vec::new();
    let mut remaining = input;

    loop {
        if let (rest, Token::ArrayEnd) = token(remaining)? {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object(remaining)?;
        items.push(item);
        remaining = rest;
    }
}

fn parse_dictionary(input: &[u8]) -> ParseResult<'_, Dictionary> {
    let mut dict = Dictionary::new();
    let mut remaining = input;

    loop {
        match token(remaining)? {
            (rest, Token::DictEnd) => return Ok((rest, dict)),
            (rest, Token::Name(key)) => {
                let (rest, value) = parse_object(rest)?;
                dict.insert(key, value);
                remaining = rest;
            },
            _ => return Err(fail(remaining, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Decode a hex string body to bytes. Whitespace is ignored and an odd
/// trailing digit is padded with 0.
///
/// ```
/// use pdf_seal::parser::decode_hex;
///
/// assert_eq!(decode_hex(b"48 65 6C6C6F").unwrap(), b"Hello");
/// assert_eq!(decode_hex(b"7").unwrap(), vec![0x70]);
/// ```
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    fn nibble(c: u8, offset: usize) -> Result<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(Error::ParseError {
                offset,
                reason: format!("invalid hex digit 0x{:02X}", c),
            }),
        }
    }

    let digits: Vec<(usize, u8)> = hex_bytes
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, c)| !is_whitespace(c))
        .collect();

    digits
        .chunks(2)
        .map(|pair| {
            let high = nibble(pair[0].1, pair[0].0)?;
            let low = match pair.get(1) {
                Some(&(offset, c)) => nibble(c, offset)?,
                None => 0,
            };
            Ok((high << 4) | low)
        })
        .collect()
}

fn to_parse_error(data: &[u8], err: nom::Err<nom::error::Error<&[u8]>>, what: &str) -> Error {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => Error::ParseError {
            offset: data.len() - e.input.len(),
            reason: format!("{} ({:?})", what, e.code),
        },
        nom::Err::Incomplete(_) => Error::ParseError {
            offset: data.len(),
            reason: format!("{} (incomplete input)", what),
        },
    }
}

/// Parse a direct object starting at `offset`; returns the object and the
/// offset just past it.
pub fn parse_object_at(data: &[u8], offset: usize) -> Result<(Object, usize)> {
    let input = data.get(offset..).ok_or(Error::ParseError {
        offset,
        reason: "offset beyond end of data".to_string(),
    })?;
    let (rest, obj) = parse_object(input).map_err(|e| to_parse_error(data, e, "object"))?;
    Ok((obj, data.len() - rest.len()))
}

/// Parse an indirect object definition starting at `offset`; returns the
/// reference, the object, and the offset just past `endobj`.
pub fn parse_indirect_at(data: &[u8], offset: usize) -> Result<(ObjectRef, Object, usize)> {
    let input = data.get(offset..).ok_or(Error::ParseError {
        offset,
        reason: "offset beyond end of data".to_string(),
    })?;
    let (rest, (reference, obj)) =
        parse_indirect_object(input).map_err(|e| to_parse_error(data, e, "indirect object"))?;
    Ok((reference, obj, data.len() - rest.len()))
}
