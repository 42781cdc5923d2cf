//! Object index over every revision of a document.
//!
//! Signed documents are read as a stack of revisions: each incremental update
//! re-defines some objects further down the file. Instead of walking the
//! cross-reference chain, the index scans the bytes for `N G obj` headers
//! (the same approach used to recover damaged files), parses each definition,
//! and keeps every one of them with its byte span. The latest definition of
//! an object is the one that appears last in the file.
//!
//! Objects stored inside object streams (`/Type /ObjStm`) are expanded and
//! attributed to the byte span of their container.

use crate::error::{Error, Result};
use crate::lexer::{is_delimiter, is_whitespace};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::parser::{parse_indirect_at, parse_object, parse_object_at};
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// "N G obj" object headers
    static ref RE_OBJ_HEADER: Regex = Regex::new(r"(\d+)\s+(\d+)\s+obj\b").unwrap();

    /// "trailer <<" keywords of classic cross-reference sections
    static ref RE_TRAILER: Regex = Regex::new(r"trailer\s*<<").unwrap();

    /// "startxref N" markers closing each revision
    static ref RE_STARTXREF: Regex = Regex::new(r"startxref\s+(\d+)").unwrap();
}

/// Reference chains longer than this are treated as malformed.
const MAX_RESOLVE_DEPTH: u32 = 32;

/// One definition of an indirect object.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedObject {
    /// Object number and generation
    pub reference: ObjectRef,
    /// Byte offset of the `N G obj` header (or of the containing object stream)
    pub offset: usize,
    /// Byte offset just past `endobj`
    pub end: usize,
    /// Parsed object
    pub object: Object,
    /// Object stream number, for compressed objects
    pub container: Option<u32>,
}

/// Document-level entries merged from all trailers, later revisions winning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trailer {
    /// Document catalog
    pub root: Option<ObjectRef>,
    /// Document information dictionary
    pub info: Option<Object>,
    /// File identifier array
    pub id: Option<Object>,
    /// Whether any trailer declares `/Encrypt`
    pub encrypted: bool,
    /// Largest `/Size` seen
    pub size: u32,
}

/// Index of all object definitions in a document.
#[derive(Debug, Clone)]
pub struct ObjectIndex {
    entries: Vec<IndexedObject>,
    latest: HashMap<u32, usize>,
    trailer: Trailer,
    startxref: Option<usize>,
}

impl ObjectIndex {
    /// Scan `data` and index every object definition.
    pub fn build(data: &[u8]) -> Result<Self> {
        let mut entries = scan_objects(data);

        let mut compressed = Vec::new();
        for entry in entries.iter().filter(|e| e.object.dict_type() == Some("ObjStm")) {
            match parse_object_stream(&entry.object) {
                Ok(objects) => {
                    compressed.extend(objects.into_iter().map(|(reference, object)| {
                        IndexedObject {
                            reference,
                            offset: entry.offset,
                            end: entry.end,
                            object,
                            container: Some(entry.reference.id),
                        }
                    }))
                },
                Err(e) => log::warn!(
                    "Skipping object stream {} at byte {}: {}",
                    entry.reference,
                    entry.offset,
                    e
                ),
            }
        }
        entries.extend(compressed);
        entries.sort_by_key(|e| e.offset);

        let mut latest = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            latest.insert(entry.reference.id, i);
        }

        let trailer = merge_trailers(data, &entries);
        let startxref = RE_STARTXREF
            .captures_iter(data)
            .last()
            .and_then(|c| c.get(1))
            .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
            .and_then(|s| s.parse().ok());

        log::debug!(
            "Indexed {} object definitions ({} distinct), startxref {:?}",
            entries.len(),
            latest.len(),
            startxref
        );

        Ok(Self {
            entries,
            latest,
            trailer,
            startxref,
        })
    }

    /// All definitions in file order.
    pub fn entries(&self) -> &[IndexedObject] {
        &self.entries
    }

    /// Latest definition of object `id`.
    pub fn entry(&self, id: u32) -> Option<&IndexedObject> {
        self.latest.get(&id).map(|&i| &self.entries[i])
    }

    /// Latest value of object `id`.
    pub fn get(&self, id: u32) -> Option<&Object> {
        self.entry(id).map(|e| &e.object)
    }

    /// Latest value of a referenced object.
    pub fn get_ref(&self, reference: ObjectRef) -> Result<&Object> {
        self.get(reference.id)
            .ok_or(Error::ObjectNotFound(reference.id, reference.gen))
    }

    /// Follow references until a direct object is reached.
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> Result<&'a Object> {
        let mut current = obj;
        let mut seen = HashSet::new();
        while let Object::Reference(r) = current {
            if !seen.insert(*r) {
                return Err(Error::CircularReference(*r));
            }
            if seen.len() as u32 > MAX_RESOLVE_DEPTH {
                return Err(Error::RecursionLimitExceeded(MAX_RESOLVE_DEPTH));
            }
            current = self.get_ref(*r)?;
        }
        Ok(current)
    }

    /// Merged trailer entries.
    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    /// Document catalog reference and dictionary.
    pub fn catalog(&self) -> Result<(ObjectRef, &Dictionary)> {
        let root = self
            .trailer
            .root
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root".to_string()))?;
        let dict = self
            .get_ref(root)?
            .as_dict()
            .ok_or_else(|| Error::InvalidPdf(format!("catalog {} is not a dictionary", root)))?;
        Ok((root, dict))
    }

    /// First object number not used by any revision.
    pub fn next_free_id(&self) -> u32 {
        let highest = self.latest.keys().copied().max().unwrap_or(0);
        self.trailer.size.max(highest + 1).max(1)
    }

    /// Offset recorded by the last `startxref` in the file.
    pub fn startxref(&self) -> Option<usize> {
        self.startxref
    }
}

fn scan_objects(data: &[u8]) -> Vec<IndexedObject> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while let Some(m) = RE_OBJ_HEADER.find_at(data, pos) {
        let start = m.start();
        if start > 0 && !is_whitespace(data[start - 1]) && !is_delimiter(data[start - 1]) {
            pos = m.end();
            continue;
        }

        match parse_indirect_at(data, start) {
            Ok((reference, object, end)) => {
                entries.push(IndexedObject {
                    reference,
                    offset: start,
                    end,
                    object,
                    container: None,
                });
                pos = end;
            },
            Err(e) => {
                log::debug!("Unparseable object header at byte {}: {}", start, e);
                pos = m.end();
            },
        }
    }

    entries
}

fn merge_trailers(data: &[u8], entries: &[IndexedObject]) -> Trailer {
    let mut dicts: Vec<(usize, Dictionary)> = RE_TRAILER
        .find_iter(data)
        .filter_map(|m| match parse_object_at(data, m.end() - 2) {
            Ok((Object::Dictionary(d), _)) => Some((m.start(), d)),
            _ => {
                log::warn!("Unparseable trailer dictionary at byte {}", m.start());
                None
            },
        })
        .collect();
    dicts.extend(
        entries
            .iter()
            .filter(|e| e.container.is_none() && e.object.dict_type() == Some("XRef"))
            .filter_map(|e| e.object.as_dict().map(|d| (e.offset, d.clone()))),
    );
    dicts.sort_by_key(|(offset, _)| *offset);

    let mut trailer = Trailer::default();
    for (_, dict) in dicts {
        if let Some(root) = dict.get("Root").and_then(|r| r.as_reference()) {
            trailer.root = Some(root);
        }
        if let Some(info) = dict.get("Info") {
            trailer.info = Some(info.clone());
        }
        if let Some(id) = dict.get("ID") {
            trailer.id = Some(id.clone());
        }
        if dict.contains_key("Encrypt") {
            trailer.encrypted = true;
        }
        if let Some(size) = dict.get("Size").and_then(|s| s.as_integer()) {
            trailer.size = trailer.size.max(u32::try_from(size).unwrap_or(0));
        }
    }
    trailer
}

/// Expand an object stream into its member objects.
///
/// Layout: `/N` pairs of `(object number, offset)` followed, from byte
/// `/First`, by the objects themselves.
pub fn parse_object_stream(stream: &Object) -> Result<Vec<(ObjectRef, Object)>> {
    let dict = stream.as_dict().ok_or_else(|| Error::InvalidObjectType {
        expected: "Stream".to_string(),
        found: stream.type_name().to_string(),
    })?;
    let count = dict
        .get("N")
        .and_then(|n| n.as_integer())
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| Error::InvalidPdf("object stream without valid /N".to_string()))?;
    let first = dict
        .get("First")
        .and_then(|n| n.as_integer())
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| Error::InvalidPdf("object stream without valid /First".to_string()))?;

    let data = stream.decode_stream_data()?;
    let header = data
        .get(..first)
        .ok_or_else(|| Error::InvalidPdf("object stream /First beyond data".to_string()))?;

    let mut numbers = Vec::with_capacity(count * 2);
    let mut rest = header;
    while numbers.len() < count * 2 {
        match parse_object(rest) {
            Ok((next, Object::Integer(n))) if n >= 0 => {
                numbers.push(n as usize);
                rest = next;
            },
            _ => return Err(Error::InvalidPdf("truncated object stream header".to_string())),
        }
    }

    numbers
        .chunks(2)
        .map(|pair| {
            let (id, rel) = (pair[0], pair[1]);
            let (object, _) = parse_object_at(&data, first + rel)?;
            let id = u32::try_from(id)
                .map_err(|_| Error::InvalidPdf(format!("object number {} out of range", id)))?;
            Ok((ObjectRef::new(id, 0), object))
        })
        .collect()
}
