//! Classification of changes appended after a signed revision.
//!
//! The signed revision ends where the signature's ByteRange ends. Anything
//! after that is parsed as incremental updates and every added or redefined
//! object is compared against its signed state. The overall level is the
//! most severe change found; bytes that do not form an incremental update
//! are [`ModificationLevel::Other`].

use super::byterange::ByteRange;
use crate::error::Result;
use crate::object::{Dictionary, Object, ObjectRef};
use crate::parser::find_keyword;
use crate::structure::ObjectIndex;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref RE_XREF_SECTION: Regex = Regex::new(r"(?s)(?:^|[\r\n])xref\s(.*?)trailer").unwrap();
}

/// Catalog entries a form-filling or signing update may change.
const CATALOG_FORM_KEYS: &[&str] = &["AcroForm", "Perms", "DSS"];

/// Interactive form dictionary entries a form-filling update may change.
const ACROFORM_KEYS: &[&str] = &["Fields", "SigFlags", "NeedAppearances", "DR", "DA"];

/// Field and widget entries that carry a value or its appearance.
const FIELD_VALUE_KEYS: &[&str] = &["V", "AS", "AP"];

/// Severity of changes after signing, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModificationLevel {
    /// Nothing after the signed revision
    None,
    /// Field values, new fields or new signatures
    FormFilling,
    /// Annotations added, changed or removed
    Annotations,
    /// Anything else, including unparseable trailing bytes
    Other,
}

impl std::fmt::Display for ModificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ModificationLevel::None => "NONE",
            ModificationLevel::FormFilling => "FORM_FILLING",
            ModificationLevel::Annotations => "ANNOTATIONS",
            ModificationLevel::Other => "OTHER",
        })
    }
}

/// What was found after the signed revision.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModificationReport {
    /// Most severe change
    pub level: ModificationLevel,
    /// Bytes after the end of the ByteRange
    pub trailing_bytes: usize,
    /// Objects added or redefined after signing
    pub changed_objects: Vec<ObjectRef>,
    /// One line per change that raised the level
    pub notes: Vec<String>,
}

impl ModificationReport {
    fn raise(&mut self, level: ModificationLevel, note: impl Into<String>) {
        self.level = self.level.max(level);
        if level > ModificationLevel::None {
            self.notes.push(note.into());
        }
    }
}

/// Classify everything in `data` after the end of `range`.
pub fn classify(data: &[u8], range: &ByteRange) -> Result<ModificationReport> {
    range.validate(data.len())?;
    let end = range.end();
    let tail = &data[end..];
    let mut report = ModificationReport {
        level: ModificationLevel::None,
        trailing_bytes: tail.len(),
        changed_objects: Vec::new(),
        notes: Vec::new(),
    };
    if tail.is_empty() {
        return Ok(report);
    }

    let signed = ObjectIndex::build(&data[..end])?;
    let current = ObjectIndex::build(data)?;

    let tail_ids: BTreeSet<u32> = current
        .entries()
        .iter()
        .filter(|e| e.offset >= end)
        .map(|e| e.reference.id)
        .collect();
    if tail_ids.is_empty() || find_keyword(tail, b"startxref").is_none() {
        log::warn!("{} trailing byte(s) after the signed revision are not an incremental update", tail.len());
        report.raise(
            ModificationLevel::Other,
            format!("{} trailing byte(s) are not a parseable incremental update", tail.len()),
        );
        return Ok(report);
    }

    if signed.trailer().root != current.trailer().root {
        report.raise(ModificationLevel::Other, "document catalog replaced");
    }

    for entry in xref_entries(tail) {
        if !entry.in_use {
            if entry.id != 0 {
                report.raise(ModificationLevel::Other, format!("object {} deleted", entry.id));
            }
            continue;
        }
        if entry.offset >= end {
            continue;
        }
        // An in-use entry may only point into the signed part at the definition it already had there
        let signed_offset = signed.entry(entry.id).map(|e| e.offset);
        if signed_offset != Some(entry.offset) {
            log::warn!(
                "xref after signing points object {} at offset {} (signed definition at {:?})",
                entry.id,
                entry.offset,
                signed_offset
            );
            report.raise(
                ModificationLevel::Other,
                format!("object {} redirected to offset {} inside the signed revision", entry.id, entry.offset),
            );
        }
    }

    let context = Context::new(&signed, &current, range);
    for id in tail_ids {
        let Some(entry) = current.entry(id) else {
            continue;
        };
        let object = &entry.object;
        if matches!(object.dict_type(), Some("XRef") | Some("ObjStm")) {
            continue;
        }
        let prior = signed.get(id);
        if prior == Some(object) {
            continue;
        }
        report.changed_objects.push(entry.reference);

        let (level, note) = match prior {
            None => context.classify_new(entry.reference, object),
            Some(old) => context.classify_changed(entry.reference, old, object),
        };
        log::debug!("Object {} after signing: {} ({})", entry.reference, level, note);
        report.raise(level, note);
    }

    log::info!(
        "{} trailing byte(s), {} changed object(s), modification level {}",
        report.trailing_bytes,
        report.changed_objects.len(),
        report.level
    );
    Ok(report)
}

struct Context<'a> {
    signed: &'a ObjectIndex,
    current: &'a ObjectIndex,
    root: Option<ObjectRef>,
    acroform: Option<ObjectRef>,
    protected: BTreeSet<u32>,
}

impl<'a> Context<'a> {
    fn new(signed: &'a ObjectIndex, current: &'a ObjectIndex, range: &ByteRange) -> Self {
        let root = signed.trailer().root;
        let acroform = signed
            .catalog()
            .ok()
            .and_then(|(_, catalog)| catalog.get("AcroForm"))
            .and_then(|a| a.as_reference());

        // The signature dictionary this range belongs to and its field
        let mut protected = BTreeSet::new();
        let range_object = range_to_object(range);
        for entry in signed.entries() {
            if entry.object.as_dict().and_then(|d| d.get("ByteRange")) == Some(&range_object) {
                protected.insert(entry.reference.id);
            }
        }
        for entry in signed.entries() {
            let value = entry.object.as_dict().and_then(|d| d.get("V")).and_then(|v| v.as_reference());
            if value.is_some_and(|v| protected.contains(&v.id)) {
                protected.insert(entry.reference.id);
            }
        }

        Self {
            signed,
            current,
            root,
            acroform,
            protected,
        }
    }

    fn classify_new(&self, reference: ObjectRef, object: &Object) -> (ModificationLevel, String) {
        let dict = object.as_dict();
        let subtype = dict.and_then(|d| d.get("Subtype")).and_then(|s| s.as_name());
        match (object.dict_type(), subtype) {
            (Some("Sig") | Some("DocTimeStamp"), _) => {
                (ModificationLevel::FormFilling, format!("signature {} added", reference))
            },
            (_, Some("Widget")) => (ModificationLevel::FormFilling, format!("widget {} added", reference)),
            (Some("Annot"), _) => (ModificationLevel::Annotations, format!("annotation {} added", reference)),
            (Some("XObject") | None, Some("Form")) if matches!(object, Object::Stream { .. }) => (
                ModificationLevel::FormFilling,
                format!("appearance stream {} added", reference),
            ),
            (Some("Font") | Some("FontDescriptor") | Some("Encoding"), _) => (
                ModificationLevel::FormFilling,
                format!("appearance resource {} added", reference),
            ),
            _ if dict.is_some_and(is_field) => (ModificationLevel::FormFilling, format!("field {} added", reference)),
            (kind, _) => (
                ModificationLevel::Other,
                format!("{} {} added", kind.unwrap_or(object.type_name()), reference),
            ),
        }
    }

    fn classify_changed(&self, reference: ObjectRef, old: &Object, new: &Object) -> (ModificationLevel, String) {
        if self.protected.contains(&reference.id) {
            return (
                ModificationLevel::Other,
                format!("signed signature object {} changed", reference),
            );
        }

        if let (Object::Array(old_items), Object::Array(new_items)) = (old, new) {
            return match self.added_items(old_items, new_items) {
                Some(level) => (level, format!("array {} extended", reference)),
                None => (ModificationLevel::Other, format!("array {} rewritten", reference)),
            };
        }

        let (Some(old_dict), Some(new_dict)) = (old.as_dict(), new.as_dict()) else {
            return (ModificationLevel::Other, format!("object {} replaced", reference));
        };
        if matches!(old, Object::Stream { .. }) != matches!(new, Object::Stream { .. }) {
            return (ModificationLevel::Other, format!("object {} replaced", reference));
        }
        let keys = changed_keys(old_dict, new_dict);
        let only = |allowed: &[&str]| keys.iter().all(|k| allowed.contains(&k.as_str()));
        let subtype = old_dict.get("Subtype").and_then(|s| s.as_name());

        if Some(reference) == self.root {
            if only(CATALOG_FORM_KEYS) {
                return (ModificationLevel::FormFilling, format!("catalog {} form entries updated", reference));
            }
            return (ModificationLevel::Other, format!("catalog {} changed: {}", reference, keys.join(", ")));
        }

        if Some(reference) == self.acroform || old_dict.contains_key("Fields") {
            if only(ACROFORM_KEYS) {
                return (ModificationLevel::FormFilling, format!("form {} updated", reference));
            }
            return (ModificationLevel::Other, format!("form {} changed: {}", reference, keys.join(", ")));
        }

        if old.dict_type() == Some("Page") {
            if keys.iter().all(|k| k == "Annots") {
                let level = self.annots_change(old_dict.get("Annots"), new_dict.get("Annots"));
                return (level, format!("annotations of page {} updated", reference));
            }
            return (ModificationLevel::Other, format!("page {} changed: {}", reference, keys.join(", ")));
        }

        if subtype == Some("Widget") || is_field(old_dict) {
            if only(FIELD_VALUE_KEYS) {
                return (ModificationLevel::FormFilling, format!("field {} filled", reference));
            }
            return (ModificationLevel::Other, format!("field {} changed: {}", reference, keys.join(", ")));
        }

        if old.dict_type() == Some("Annot") {
            return (ModificationLevel::Annotations, format!("annotation {} changed", reference));
        }

        (
            ModificationLevel::Other,
            format!(
                "{} {} changed",
                old.dict_type().unwrap_or(old.type_name()),
                reference
            ),
        )
    }

    /// Level for a page's `/Annots` going from `old` to `new` (each direct or
    /// indirect).
    fn annots_change(&self, old: Option<&Object>, new: Option<&Object>) -> ModificationLevel {
        let old_items = old
            .and_then(|o| self.signed.resolve(o).ok())
            .and_then(|o| o.as_array())
            .cloned()
            .unwrap_or_default();
        let new_items = new
            .and_then(|o| self.current.resolve(o).ok())
            .and_then(|o| o.as_array())
            .cloned()
            .unwrap_or_default();
        // An indirect array that stayed in place is classified on its own
        if old.and_then(|o| o.as_reference()).is_some() && old == new {
            return ModificationLevel::None;
        }
        self.added_items(&old_items, &new_items)
            .unwrap_or(ModificationLevel::Annotations)
    }

    /// Level for an array whose old items are all kept, from the items added.
    /// `None` when items were removed or non-annotation items added.
    fn added_items(&self, old: &[Object], new: &[Object]) -> Option<ModificationLevel> {
        if !old.iter().all(|item| new.contains(item)) {
            return None;
        }
        let mut level = ModificationLevel::None;
        for item in new.iter().filter(|item| !old.contains(item)) {
            let object = self.current.resolve(item).ok()?;
            let dict = object.as_dict()?;
            let item_level = if dict.get("Subtype").and_then(|s| s.as_name()) == Some("Widget") || is_field(dict) {
                ModificationLevel::FormFilling
            } else if object.dict_type() == Some("Annot") || dict.contains_key("Subtype") {
                ModificationLevel::Annotations
            } else {
                return None;
            };
            level = level.max(item_level);
        }
        Some(level)
    }
}

fn is_field(dict: &Dictionary) -> bool {
    dict.contains_key("FT") || (dict.contains_key("T") && (dict.contains_key("Kids") || dict.contains_key("V")))
}

fn range_to_object(range: &ByteRange) -> Object {
    Object::Array(
        [range.offset1, range.length1, range.offset2, range.length2]
            .iter()
            .map(|&v| Object::Integer(v as i64))
            .collect(),
    )
}

/// Keys added, removed or changed between two dictionaries, sorted.
fn changed_keys(old: &Dictionary, new: &Dictionary) -> Vec<String> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect()
}

/// One row of a classic cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct XrefEntry {
    id: u32,
    offset: usize,
    in_use: bool,
}

/// Rows of the classic xref sections in `tail`, in file order.
fn xref_entries(tail: &[u8]) -> Vec<XrefEntry> {
    let mut entries = Vec::new();
    for caps in RE_XREF_SECTION.captures_iter(tail) {
        let Some(section) = caps.get(1) else {
            continue;
        };
        let text = String::from_utf8_lossy(section.as_bytes());
        let mut next_id: Option<u32> = None;
        for line in text.split(['\r', '\n']) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [start, _count] => next_id = start.parse().ok(),
                [offset, _gen, kind] => {
                    let Some(id) = next_id else {
                        continue;
                    };
                    if let Ok(offset) = offset.parse() {
                        entries.push(XrefEntry {
                            id,
                            offset,
                            in_use: *kind == "n",
                        });
                    }
                    next_id = Some(id + 1);
                },
                _ => {},
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A signed revision (object 4 is the signature) and helpers to append
    /// updates after it.
    fn signed_doc() -> (Vec<u8>, ByteRange) {
        signed_doc_with("")
    }

    /// Like [`signed_doc`] with `before_contents` written ahead of the page
    /// content stream, still inside the signed revision.
    fn signed_doc_with(before_contents: &str) -> (Vec<u8>, ByteRange) {
        let data = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [5 0 R] /SigFlags 3 >> >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /Annots [5 0 R] /Contents 6 0 R >>\nendobj\n\
4 0 obj\n<< /Type /Sig /ByteRange [0 10 20 0000] /Contents <00> >>\nendobj\n\
5 0 obj\n<< /Type /Annot /Subtype /Widget /FT /Sig /T (Sig1) /V 4 0 R /P 3 0 R >>\nendobj\n\
6 0 obj\n<< /Length 0 >>\nstream\n\nendstream\nendobj\n\
trailer\n<< /Size 7 /Root 1 0 R >>\nstartxref\n0\n%%EOF\n"
            .to_vec();
        let at = find_keyword(&data, b"6 0 obj").unwrap();
        let mut data = [&data[..at], before_contents.as_bytes(), &data[at..]].concat();
        let range = ByteRange::new(0, 10, 20, data.len() - 20);
        let slot = find_keyword(&data, b"20 0000]").unwrap() + 3;
        data[slot..slot + 4].copy_from_slice(format!("{:04}", range.length2).as_bytes());
        (data, range)
    }

    fn append(mut data: Vec<u8>, objects: &str) -> Vec<u8> {
        data.extend_from_slice(objects.as_bytes());
        data.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 12 /Root 1 0 R >>\nstartxref\n0\n%%EOF\n");
        data
    }

    fn level(data: &[u8], range: &ByteRange) -> ModificationLevel {
        classify(data, range).unwrap().level
    }

    #[test]
    fn test_no_trailing_bytes() {
        let (data, range) = signed_doc();
        let report = classify(&data, &range).unwrap();
        assert_eq!(report.level, ModificationLevel::None);
        assert_eq!(report.trailing_bytes, 0);
    }

    #[test]
    fn test_garbage_tail_is_other() {
        let (mut data, range) = signed_doc();
        data.extend_from_slice(b"%% appended by someone else\n");
        let report = classify(&data, &range).unwrap();
        assert_eq!(report.level, ModificationLevel::Other);
        assert_eq!(report.trailing_bytes, 28);
        assert_eq!(report.notes.len(), 1);
    }

    #[test]
    fn test_new_annotation() {
        let (data, range) = signed_doc();
        let data = append(
            data,
            "7 0 obj\n<< /Type /Annot /Subtype /Text /Contents (note) >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /Annots [5 0 R 7 0 R] /Contents 6 0 R >>\nendobj\n",
        );
        let report = classify(&data, &range).unwrap();
        assert_eq!(report.level, ModificationLevel::Annotations);
        assert_eq!(report.changed_objects, vec![ObjectRef::new(3, 0), ObjectRef::new(7, 0)]);
    }

    #[test]
    fn test_second_signature_is_form_filling() {
        let (data, range) = signed_doc();
        let data = append(
            data,
            "7 0 obj\n<< /Type /Sig /ByteRange [0 0 0 0] /Contents <00> >>\nendobj\n\
8 0 obj\n<< /Type /Annot /Subtype /Widget /FT /Sig /T (Sig2) /V 7 0 R /P 3 0 R >>\nendobj\n\
9 0 obj\n<< /Type /XObject /Subtype /Form /BBox [0 0 1 1] /Length 0 >>\nstream\n\nendstream\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /Annots [5 0 R 8 0 R] /Contents 6 0 R >>\nendobj\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [5 0 R 8 0 R] /SigFlags 3 >> >>\nendobj\n",
        );
        assert_eq!(level(&data, &range), ModificationLevel::FormFilling);
    }

    #[test]
    fn test_content_change_is_other() {
        let (data, range) = signed_doc();
        let data = append(
            data,
            "6 0 obj\n<< /Length 9 >>\nstream\nBT ET q Q\nendstream\nendobj\n",
        );
        assert_eq!(level(&data, &range), ModificationLevel::Other);
    }

    #[test]
    fn test_touching_signed_field_is_other() {
        let (data, range) = signed_doc();
        let data = append(
            data,
            "5 0 obj\n<< /Type /Annot /Subtype /Widget /FT /Sig /T (Sig1) /P 3 0 R >>\nendobj\n",
        );
        assert_eq!(level(&data, &range), ModificationLevel::Other);
    }

    #[test]
    fn test_identical_rewrite_ignored() {
        let (data, range) = signed_doc();
        let data = append(data, "2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
        let report = classify(&data, &range).unwrap();
        assert_eq!(report.level, ModificationLevel::None);
        assert!(report.changed_objects.is_empty());
        assert!(report.trailing_bytes > 0);
    }

    #[test]
    fn test_freed_object_is_other() {
        let (mut data, range) = signed_doc();
        data.extend_from_slice(
            b"7 0 obj\n<< /Type /Annot /Subtype /Text >>\nendobj\n\
xref\n0 1\n0000000000 65535 f \n6 2\n0000000000 00001 f \n0000000100 00000 n \n\
trailer\n<< /Size 8 /Root 1 0 R >>\nstartxref\n0\n%%EOF\n",
        );
        let report = classify(&data, &range).unwrap();
        assert_eq!(report.level, ModificationLevel::Other);
        assert!(report.notes.iter().any(|n| n.contains("object 6 deleted")));
    }

    #[test]
    fn test_xref_entries_parser() {
        let tail = b"\nxref\n0 2\n0000000000 65535 f \n0000000017 00000 n \n9 1\n0000000000 00002 f \ntrailer\n";
        let entries = xref_entries(tail);
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[1],
            XrefEntry {
                id: 1,
                offset: 17,
                in_use: true
            }
        );
        assert_eq!(entries[2].id, 9);
        assert!(!entries[2].in_use);
        assert!(xref_entries(b"startxref\n123\n").is_empty());
    }

    /// The page content is defined twice before signing; the later, visible
    /// definition is the one a reader of the signed revision sees.
    const SHADOWED_CONTENTS: &str = "6 0 obj\n<< /Length 11 >>\nstream\nPAY 1000000\nendstream\nendobj\n";

    fn annotation_update(data: &[u8], contents_offset: usize) -> Vec<u8> {
        let mut data = data.to_vec();
        let page = data.len();
        data.extend_from_slice(b"3 0 obj\n<< /Type /Page /Parent 2 0 R /Annots [5 0 R 7 0 R] /Contents 6 0 R >>\nendobj\n");
        let annot = data.len();
        data.extend_from_slice(b"7 0 obj\n<< /Type /Annot /Subtype /Text /Contents (note) >>\nendobj\n");
        let xref = data.len();
        data.extend_from_slice(
            format!(
                "xref\n0 1\n0000000000 65535 f \n3 1\n{:010} 00000 n \n6 2\n{:010} 00000 n \n{:010} 00000 n \n\
trailer\n<< /Size 8 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                page, contents_offset, annot, xref
            )
            .as_bytes(),
        );
        data
    }

    #[test]
    fn test_xref_redirect_to_shadowed_definition_is_other() {
        let (data, range) = signed_doc_with(SHADOWED_CONTENTS);
        let hidden = find_keyword(&data, b"6 0 obj").unwrap();
        let index = ObjectIndex::build(&data).unwrap();
        assert_ne!(index.entry(6).unwrap().offset, hidden);

        let updated = annotation_update(&data, hidden);
        let report = classify(&updated, &range).unwrap();
        assert_eq!(report.level, ModificationLevel::Other);
        assert!(report.notes.iter().any(|n| n.contains("object 6 redirected")));
    }

    #[test]
    fn test_xref_repeating_signed_offset_is_allowed() {
        let (data, range) = signed_doc_with(SHADOWED_CONTENTS);
        let visible = ObjectIndex::build(&data).unwrap().entry(6).unwrap().offset;
        let updated = annotation_update(&data, visible);
        assert_eq!(level(&updated, &range), ModificationLevel::Annotations);
    }

    #[test]
    fn test_changed_keys() {
        let mut old = Dictionary::new();
        old.insert("A".to_string(), Object::Integer(1));
        old.insert("B".to_string(), Object::Integer(2));
        let mut new = old.clone();
        new.insert("B".to_string(), Object::Integer(3));
        new.insert("C".to_string(), Object::Null);
        new.remove("A");
        assert_eq!(changed_keys(&old, &new), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(ModificationLevel::None < ModificationLevel::FormFilling);
        assert!(ModificationLevel::FormFilling < ModificationLevel::Annotations);
        assert!(ModificationLevel::Annotations < ModificationLevel::Other);
        assert_eq!(ModificationLevel::FormFilling.to_string(), "FORM_FILLING");
    }
}
