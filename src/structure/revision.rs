//! Incremental revision writer.
//!
//! Appends new and updated objects after the existing bytes, followed by a
//! classic cross-reference section and a trailer chained to the previous one
//! with `/Prev`. The base bytes are copied unchanged.

use super::ObjectIndex;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::serializer::ObjectSerializer;
use std::collections::{BTreeMap, HashMap};

/// Bytes of a document with one appended revision.
#[derive(Debug, Clone)]
pub struct Revision {
    /// Full document: base bytes followed by the new revision
    pub bytes: Vec<u8>,
    /// Absolute offset of each written object's `N G obj` header
    pub offsets: HashMap<u32, usize>,
    /// Offset of the new revision's `xref` keyword
    pub xref_offset: usize,
}

/// Collects the objects of one incremental update.
#[derive(Debug)]
pub struct RevisionWriter<'a> {
    base: &'a [u8],
    objects: BTreeMap<u32, (u16, Vec<u8>)>,
    prev_xref: Option<usize>,
    root: Option<ObjectRef>,
    info: Option<Object>,
    file_id: Option<Object>,
    size: u32,
    serializer: ObjectSerializer,
}

impl<'a> RevisionWriter<'a> {
    /// Start a revision on top of `base`, inheriting trailer entries from its index.
    pub fn new(base: &'a [u8], index: &ObjectIndex) -> Self {
        let trailer = index.trailer();
        Self {
            base,
            objects: BTreeMap::new(),
            prev_xref: index.startxref(),
            root: trailer.root,
            info: trailer.info.clone(),
            file_id: trailer.id.clone(),
            size: index.next_free_id(),
            serializer: ObjectSerializer::pretty(),
        }
    }

    /// Add or replace an object, serialized normally.
    pub fn add_object(&mut self, reference: ObjectRef, object: &Object) -> Result<()> {
        let body = self.serializer.serialize(object);
        self.add_raw(reference, body)
    }

    /// Add an object whose body (the bytes between `obj` and `endobj`) was
    /// produced by the caller.
    pub fn add_raw(&mut self, reference: ObjectRef, body: Vec<u8>) -> Result<()> {
        if reference.id == 0 {
            return Err(Error::Serialization("object number 0 is reserved".to_string()));
        }
        if self.objects.contains_key(&reference.id) {
            return Err(Error::Serialization(format!(
                "object {} written twice in one revision",
                reference
            )));
        }
        self.objects.insert(reference.id, (reference.gen, body));
        Ok(())
    }

    /// Linearize the revision and append it to the base bytes.
    pub fn finish(self) -> Result<Revision> {
        let root = self
            .root
            .ok_or_else(|| Error::Serialization("document has no /Root to carry over".to_string()))?;
        let highest = match self.objects.keys().next_back() {
            Some(&id) => id,
            None => return Err(Error::Serialization("revision has no objects".to_string())),
        };

        let mut bytes = self.base.to_vec();
        if !bytes.ends_with(b"\n") && !bytes.ends_with(b"\r") {
            bytes.push(b'\n');
        }

        let mut offsets = HashMap::new();
        for (&id, (gen, body)) in &self.objects {
            offsets.insert(id, bytes.len());
            bytes.extend_from_slice(format!("{} {} obj\n", id, gen).as_bytes());
            bytes.extend_from_slice(body);
            bytes.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = bytes.len();
        bytes.extend_from_slice(b"xref\n");
        let ids: Vec<u32> = self.objects.keys().copied().collect();
        for run in consecutive_runs(&ids) {
            bytes.extend_from_slice(format!("{} {}\n", run[0], run.len()).as_bytes());
            for id in run {
                let gen = self.objects.get(id).map(|(g, _)| *g).unwrap_or(0);
                // 20-byte entries: 10-digit offset, 5-digit generation, 'n', 2-byte EOL
                bytes.extend_from_slice(format!("{:010} {:05} n \n", offsets[id], gen).as_bytes());
            }
        }

        let mut trailer = Dictionary::new();
        trailer.insert(
            "Size".to_string(),
            Object::Integer(i64::from(self.size.max(highest + 1))),
        );
        trailer.insert("Root".to_string(), Object::Reference(root));
        if let Some(prev) = self.prev_xref {
            trailer.insert("Prev".to_string(), Object::Integer(prev as i64));
        }
        if let Some(info) = self.info {
            trailer.insert("Info".to_string(), info);
        }
        if let Some(id) = self.file_id {
            trailer.insert("ID".to_string(), id);
        }

        bytes.extend_from_slice(b"trailer\n");
        bytes.extend_from_slice(&self.serializer.serialize(&Object::Dictionary(trailer)));
        bytes.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!(
            "Appended revision with {} object(s), xref at byte {}",
            self.objects.len(),
            xref_offset
        );

        Ok(Revision {
            bytes,
            offsets,
            xref_offset,
        })
    }
}

/// Split sorted ids into runs of consecutive numbers (one xref subsection each).
fn consecutive_runs(ids: &[u32]) -> Vec<&[u32]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=ids.len() {
        if i == ids.len() || ids[i] != ids[i - 1] + 1 {
            runs.push(&ids[start..i]);
            start = i;
        }
    }
    runs
}
