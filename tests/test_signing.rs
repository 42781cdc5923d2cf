//! Signing tests: incremental output layout, field placement and input checks.

mod common;

use common::*;
use pdf_seal::signatures::{
    find_signatures, sign, PdfSigner, SignOptions, SignatureFieldSpec, SigningIdentity, DEFAULT_FIELD_NAME,
    SUB_FILTER,
};
use pdf_seal::structure::{page_count, page_refs, ObjectIndex};
use pdf_seal::Error;

#[test]
fn test_fixture_document() {
    let doc = create_test_pdf(3);
    assert!(doc.len() > 9_000, "fixture is {} bytes", doc.len());
    assert_eq!(page_count(&doc).unwrap(), 3);
    assert!(find_signatures(&doc).unwrap().is_empty());
}

#[test]
fn test_signed_output_extends_input() {
    let doc = create_test_pdf(3);
    let identity = chained_identity();
    let signer = PdfSigner::new(identity.clone(), options_within_validity(&identity));
    let signed = signer.sign(&doc, &SignatureFieldSpec::footer(2)).unwrap();

    assert!(signed.len() > doc.len());
    assert_eq!(&signed[..doc.len()], &doc[..]);
    assert!(signed.ends_with(b"%%EOF\n"));
}

#[test]
fn test_signature_dictionary_contents() {
    let doc = create_test_pdf(2);
    let identity = chained_identity();
    let signed = PdfSigner::new(identity.clone(), options_within_validity(&identity))
        .sign(&doc, &SignatureFieldSpec::footer(1))
        .unwrap();

    let found = find_signatures(&signed).unwrap();
    assert_eq!(found.len(), 1);
    let location = &found[0];
    assert!(location.offset >= doc.len());
    assert_eq!(location.info.field_name.as_deref(), Some(DEFAULT_FIELD_NAME));
    assert_eq!(location.info.sub_filter.as_deref(), Some(SUB_FILTER));
    assert_eq!(location.info.reason.as_deref(), Some("Approved"));
    assert_eq!(location.info.location.as_deref(), Some("Test Lab"));
    assert!(location.info.signing_time.is_some());

    let range = location.byte_range.unwrap();
    assert_eq!(range.offset1, 0);
    assert_eq!(range.end(), signed.len());
    assert_eq!(location.contents_span.clone(), Some(range.excluded()));
}

#[test]
fn test_widget_lands_on_requested_page() {
    let doc = create_test_pdf(3);
    let identity = self_signed_identity();
    let signed = sign(&doc, &SignatureFieldSpec::new("Approval", 1, [10.0, 10.0, 200.0, 60.0]), &identity).unwrap();

    let index = ObjectIndex::build(&signed).unwrap();
    let pages = page_refs(&index).unwrap();
    assert_eq!(pages.len(), 3);

    let annots = |page: usize| {
        index
            .get_ref(pages[page])
            .unwrap()
            .as_dict()
            .and_then(|d| d.get("Annots"))
            .cloned()
    };
    assert!(annots(0).is_none());
    assert!(annots(2).is_none());
    let second = annots(1).unwrap();
    let items = index.resolve(&second).unwrap().as_array().unwrap().clone();
    assert_eq!(items.len(), 1);
    let widget = index.resolve(&items[0]).unwrap().as_dict().unwrap().clone();
    assert_eq!(widget.get("Subtype").and_then(|s| s.as_name()), Some("Widget"));
    assert_eq!(widget.get("FT").and_then(|s| s.as_name()), Some("Sig"));

    let (_, catalog) = index.catalog().unwrap();
    let form = index.resolve(catalog.get("AcroForm").unwrap()).unwrap().as_dict().unwrap().clone();
    assert_eq!(form.get("SigFlags").and_then(|f| f.as_integer()), Some(3));
}

#[test]
fn test_invalid_page_leaves_no_output() {
    let doc = create_test_pdf(3);
    let identity = self_signed_identity();
    let err = sign(&doc, &SignatureFieldSpec::footer(3), &identity).unwrap_err();
    assert!(matches!(err, Error::InvalidPage { index: 3, count: 3 }));
}

#[test]
fn test_empty_document() {
    let identity = self_signed_identity();
    let err = sign(b"", &SignatureFieldSpec::footer(0), &identity).unwrap_err();
    assert!(matches!(err, Error::EmptyDocument));
}

#[test]
fn test_duplicate_field_name() {
    let doc = create_test_pdf(1);
    let identity = self_signed_identity();
    let signed = sign(&doc, &SignatureFieldSpec::footer(0), &identity).unwrap();
    let err = sign(&signed, &SignatureFieldSpec::footer(0), &identity).unwrap_err();
    assert!(matches!(err, Error::InvalidPdf(_)));
}

#[test]
fn test_pkcs1_key() {
    let doc = create_test_pdf(1);
    let identity = SigningIdentity::from_pem(SELF_SIGNED_KEY_PKCS1, SELF_SIGNED_CERT).unwrap();
    let cert = identity.certificate().clone();
    let signed = PdfSigner::new(identity.clone(), options_within_validity(&identity))
        .sign(&doc, &SignatureFieldSpec::footer(0))
        .unwrap();
    let result = pdf_seal::signatures::verify(&signed, &[cert]);
    assert!(result.status.is_valid(), "{:?}", result.problems);
}

#[test]
fn test_key_certificate_mismatch() {
    let err = SigningIdentity::from_pem(SIGNER_KEY, SELF_SIGNED_CERT).unwrap_err();
    assert!(matches!(err, Error::Credentials(_)));
    assert!(SigningIdentity::from_pem(b"not a key", SELF_SIGNED_CERT).is_err());
}

#[test]
fn test_placeholder_fits_estimate() {
    let identity = chained_identity();
    let signer = PdfSigner::new(identity.clone(), SignOptions::new());
    assert!(signer.placeholder_size() >= identity.estimated_signature_size());

    let too_small = PdfSigner::new(identity, SignOptions::new().with_estimated_size(16));
    let err = too_small
        .sign(&create_test_pdf(1), &SignatureFieldSpec::footer(0))
        .unwrap_err();
    assert!(matches!(err, Error::PlaceholderOverflow { .. }));
}

#[test]
fn test_optional_entries_round_trip() {
    let doc = create_test_pdf(1);
    let identity = self_signed_identity();
    let options = options_within_validity(&identity)
        .with_contact_info("signing@example.com")
        .with_signer_name("Zoë Müller");
    let signed = PdfSigner::new(identity, options)
        .sign(&doc, &SignatureFieldSpec::footer(0))
        .unwrap();

    let info = find_signatures(&signed).unwrap().remove(0).info;
    assert_eq!(info.contact_info.as_deref(), Some("signing@example.com"));
    assert_eq!(info.signer_name.as_deref(), Some("Zoë Müller"));
}
