//! PDF signing.
//!
//! Signing appends one incremental revision holding the signature field,
//! its widget and the signature dictionary. The dictionary is written with a
//! zero-filled `/Contents` placeholder and a fixed-width `/ByteRange` slot;
//! once the revision is linearized both are filled in place, so no byte
//! outside the placeholder changes after the digest is taken.

use super::byterange::{
    contents_placeholder, digest, find_byte_range_span, find_contents_span, reserved_slot, write_byte_range,
    write_signature, ByteRange,
};
use super::container::SignedMessage;
use super::types::{format_pdf_date, SignOptions, SignatureFieldSpec, SigningIdentity, FILTER, SUB_FILTER};
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::parser::find_keyword;
use crate::serializer::ObjectSerializer;
use crate::structure::{page_refs, ObjectIndex, RevisionWriter};
use chrono::Utc;

/// Maximum nesting of `/Kids` in the field tree.
const MAX_FIELD_DEPTH: u32 = 32;

/// Annotation flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;

/// SignatureExists | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// PDF signer.
#[derive(Debug, Clone)]
pub struct PdfSigner {
    identity: SigningIdentity,
    options: SignOptions,
}

impl PdfSigner {
    /// Create a new PDF signer.
    pub fn new(identity: SigningIdentity, options: SignOptions) -> Self {
        Self { identity, options }
    }

    /// Get the signing options.
    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Get the signing identity.
    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Bytes reserved for the encoded signature.
    pub fn placeholder_size(&self) -> usize {
        self.options
            .estimated_size
            .unwrap_or_else(|| self.identity.estimated_signature_size())
    }

    /// Sign `document`, returning the document with one appended revision.
    ///
    /// The first `document.len()` bytes of the result equal `document`.
    pub fn sign(&self, document: &[u8], field: &SignatureFieldSpec) -> Result<Vec<u8>> {
        if document.is_empty() {
            return Err(Error::EmptyDocument);
        }
        let index = ObjectIndex::build(document)?;
        if index.trailer().encrypted {
            return Err(Error::Unsupported("signing encrypted documents".to_string()));
        }

        let pages = page_refs(&index)?;
        let page_ref = pages.get(field.page_index).copied().ok_or(Error::InvalidPage {
            index: field.page_index,
            count: pages.len(),
        })?;

        let (root_ref, catalog) = index.catalog()?;
        let mut catalog = catalog.clone();
        let acroform = FormUpdate::load(&index, &catalog)?;
        if acroform.field_names(&index)?.iter().any(|n| n == &field.name) {
            return Err(Error::InvalidPdf(format!("signature field '{}' already exists", field.name)));
        }

        let first_id = index.next_free_id();
        let sig_ref = ObjectRef::new(first_id, 0);
        let widget_ref = ObjectRef::new(first_id + 1, 0);
        let appearance_ref = ObjectRef::new(first_id + 2, 0);
        let signing_time = self.options.signing_time.unwrap_or_else(Utc::now);
        log::debug!(
            "Signing field '{}' on page {} ({}), signature object {}",
            field.name,
            field.page_index,
            page_ref,
            sig_ref
        );

        let mut writer = RevisionWriter::new(document, &index);
        writer.add_raw(sig_ref, self.signature_dictionary(signing_time))?;
        writer.add_object(widget_ref, &widget(field, sig_ref, page_ref, appearance_ref))?;
        writer.add_object(appearance_ref, &appearance_stream(&field.rect))?;

        // Page /Annots
        let mut page = index.get_ref(page_ref)?.clone();
        let page_dict = page.as_dict_mut().ok_or_else(|| Error::InvalidObjectType {
            expected: "Dictionary".to_string(),
            found: "page".to_string(),
        })?;
        match page_dict.get("Annots") {
            Some(Object::Reference(annots_ref)) => {
                let annots_ref = *annots_ref;
                let mut annots = array_at(&index, annots_ref)?;
                annots.push(Object::Reference(widget_ref));
                writer.add_object(annots_ref, &Object::Array(annots))?;
            },
            Some(Object::Array(annots)) => {
                let mut annots = annots.clone();
                annots.push(Object::Reference(widget_ref));
                page_dict.insert("Annots".to_string(), Object::Array(annots));
                writer.add_object(page_ref, &page)?;
            },
            _ => {
                page_dict.insert("Annots".to_string(), Object::Array(vec![Object::Reference(widget_ref)]));
                writer.add_object(page_ref, &page)?;
            },
        }

        // Catalog /AcroForm
        let catalog_changed = acroform.add_field(&mut writer, &mut catalog, widget_ref)?;
        if catalog_changed {
            writer.add_object(root_ref, &Object::Dictionary(catalog))?;
        }

        let revision = writer.finish()?;
        let mut bytes = revision.bytes;

        let sig_start = revision
            .offsets
            .get(&sig_ref.id)
            .copied()
            .ok_or_else(|| Error::Serialization("signature object was not written".to_string()))?;
        let sig_end = find_keyword(&bytes[sig_start..], b"endobj")
            .map(|p| sig_start + p)
            .ok_or_else(|| Error::Serialization("signature object is not terminated".to_string()))?;
        let contents_span = find_contents_span(&bytes, sig_start..sig_end)
            .ok_or_else(|| Error::Serialization("/Contents placeholder not found".to_string()))?;
        let slot = find_byte_range_span(&bytes, sig_start..sig_end)
            .ok_or_else(|| Error::Serialization("/ByteRange slot not found".to_string()))?;

        let range = ByteRange::around(contents_span.clone(), bytes.len());
        write_byte_range(&mut bytes, slot, &range)?;
        let signed_digest = digest(&bytes, &range)?;

        let message = SignedMessage::build(&signed_digest, &self.identity, signing_time)?;
        write_signature(&mut bytes, contents_span, message.to_der())?;

        log::info!(
            "Signed field '{}' as {}: {} byte signature, ByteRange {}, {} -> {} bytes",
            field.name,
            self.identity.certificate().subject(),
            message.to_der().len(),
            range,
            document.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    /// Body of the signature dictionary with both placeholders.
    fn signature_dictionary(&self, signing_time: chrono::DateTime<Utc>) -> Vec<u8> {
        let serializer = ObjectSerializer::new();
        let mut body = format!(
            "<<\n/Type /Sig\n/Filter /{}\n/SubFilter /{}\n/ByteRange {}\n/Contents {}\n",
            FILTER,
            SUB_FILTER,
            reserved_slot(),
            contents_placeholder(self.placeholder_size())
        )
        .into_bytes();

        let mut entry = |key: &str, value: &str| {
            body.extend_from_slice(format!("/{} ", key).as_bytes());
            body.extend_from_slice(&serializer.serialize(&text_string(value)));
            body.push(b'\n');
        };
        entry("M", &format_pdf_date(signing_time));
        let optional = [
            ("Name", &self.options.signer_name),
            ("Reason", &self.options.reason),
            ("Location", &self.options.location),
            ("ContactInfo", &self.options.contact_info),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                entry(key, value);
            }
        }
        body.extend_from_slice(b">>");
        body
    }
}

/// Sign with default options.
pub fn sign(document: &[u8], field: &SignatureFieldSpec, identity: &SigningIdentity) -> Result<Vec<u8>> {
    PdfSigner::new(identity.clone(), SignOptions::default()).sign(document, field)
}

/// Where the interactive form dictionary and its `/Fields` live.
struct FormUpdate {
    /// Indirect `/AcroForm`, when not direct in the catalog
    form_ref: Option<ObjectRef>,
    form: Dictionary,
    /// Indirect `/Fields` array
    fields_ref: Option<ObjectRef>,
    fields: Vec<Object>,
}

impl FormUpdate {
    fn load(index: &ObjectIndex, catalog: &Dictionary) -> Result<Self> {
        let (form_ref, form) = match catalog.get("AcroForm") {
            Some(Object::Reference(r)) => {
                let form = index
                    .get_ref(*r)?
                    .as_dict()
                    .cloned()
                    .ok_or_else(|| Error::InvalidPdf(format!("/AcroForm {} is not a dictionary", r)))?;
                (Some(*r), form)
            },
            Some(Object::Dictionary(d)) => (None, d.clone()),
            _ => (None, Dictionary::new()),
        };
        let (fields_ref, fields) = match form.get("Fields") {
            Some(Object::Reference(r)) => (Some(*r), array_at(index, *r)?),
            Some(Object::Array(items)) => (None, items.clone()),
            _ => (None, Vec::new()),
        };
        Ok(Self {
            form_ref,
            form,
            fields_ref,
            fields,
        })
    }

    /// Fully qualified names of every field in the form.
    fn field_names(&self, index: &ObjectIndex) -> Result<Vec<String>> {
        let mut names = Vec::new();
        collect_field_names(index, &self.fields, None, 0, &mut names)?;
        Ok(names)
    }

    /// Register `widget` and set `/SigFlags`. Returns whether the catalog
    /// itself has to be rewritten.
    fn add_field(mut self, writer: &mut RevisionWriter<'_>, catalog: &mut Dictionary, widget: ObjectRef) -> Result<bool> {
        self.fields.push(Object::Reference(widget));
        match self.fields_ref {
            Some(r) => writer.add_object(r, &Object::Array(self.fields))?,
            None => {
                self.form.insert("Fields".to_string(), Object::Array(self.fields));
            },
        }
        self.form.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));

        match self.form_ref {
            Some(r) => {
                writer.add_object(r, &Object::Dictionary(self.form))?;
                Ok(false)
            },
            None => {
                catalog.insert("AcroForm".to_string(), Object::Dictionary(self.form));
                Ok(true)
            },
        }
    }
}

fn collect_field_names(
    index: &ObjectIndex,
    fields: &[Object],
    prefix: Option<&str>,
    depth: u32,
    names: &mut Vec<String>,
) -> Result<()> {
    if depth > MAX_FIELD_DEPTH {
        return Err(Error::RecursionLimitExceeded(MAX_FIELD_DEPTH));
    }
    for field in fields {
        let Some(dict) = index.resolve(field).ok().and_then(|f| f.as_dict()) else {
            continue;
        };
        let name = match (prefix, dict.get("T").and_then(|t| t.as_text())) {
            (Some(p), Some(t)) => Some(format!("{}.{}", p, t)),
            (None, Some(t)) => Some(t),
            (p, None) => p.map(str::to_string),
        };
        if let Some(name) = &name {
            names.push(name.clone());
        }
        if let Some(kids) = dict.get("Kids").and_then(|k| index.resolve(k).ok()).and_then(|k| k.as_array()) {
            collect_field_names(index, kids, name.as_deref(), depth + 1, names)?;
        }
    }
    Ok(())
}

fn array_at(index: &ObjectIndex, reference: ObjectRef) -> Result<Vec<Object>> {
    index
        .get_ref(reference)?
        .as_array()
        .cloned()
        .ok_or_else(|| Error::InvalidObjectType {
            expected: "Array".to_string(),
            found: format!("object {}", reference),
        })
}

fn widget(field: &SignatureFieldSpec, sig_ref: ObjectRef, page_ref: ObjectRef, appearance: ObjectRef) -> Object {
    let mut ap = Dictionary::new();
    ap.insert("N".to_string(), Object::Reference(appearance));

    let mut dict = Dictionary::new();
    dict.insert("Type".to_string(), Object::Name("Annot".to_string()));
    dict.insert("Subtype".to_string(), Object::Name("Widget".to_string()));
    dict.insert("FT".to_string(), Object::Name("Sig".to_string()));
    dict.insert("T".to_string(), text_string(&field.name));
    dict.insert("V".to_string(), Object::Reference(sig_ref));
    dict.insert("P".to_string(), Object::Reference(page_ref));
    dict.insert(
        "Rect".to_string(),
        Object::Array(field.rect.iter().map(|&v| Object::Real(v)).collect()),
    );
    dict.insert("F".to_string(), Object::Integer(WIDGET_FLAGS));
    dict.insert("AP".to_string(), Object::Dictionary(ap));
    Object::Dictionary(dict)
}

/// Empty form XObject sized to the widget.
fn appearance_stream(rect: &[f64; 4]) -> Object {
    let width = (rect[2] - rect[0]).abs();
    let height = (rect[3] - rect[1]).abs();
    let mut dict = Dictionary::new();
    dict.insert("Type".to_string(), Object::Name("XObject".to_string()));
    dict.insert("Subtype".to_string(), Object::Name("Form".to_string()));
    dict.insert(
        "BBox".to_string(),
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(width),
            Object::Real(height),
        ]),
    );
    Object::Stream {
        dict,
        data: bytes::Bytes::new(),
    }
}

/// PDF text string: bytes for ASCII, UTF-16BE with BOM otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec());
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes)
}
