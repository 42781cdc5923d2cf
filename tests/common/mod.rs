//! Shared fixtures for integration tests.

#![allow(dead_code)]

use pdf_seal::signatures::{Certificate, SignOptions, SigningIdentity};

pub const SIGNER_KEY: &[u8] = include_bytes!("../fixtures/signer-key.pem");
pub const SIGNER_CERT: &[u8] = include_bytes!("../fixtures/signer-cert.pem");
pub const INTERMEDIATE_CERT: &[u8] = include_bytes!("../fixtures/intermediate-cert.pem");
pub const ROOT_CERT: &[u8] = include_bytes!("../fixtures/root-cert.pem");
pub const SELF_SIGNED_KEY: &[u8] = include_bytes!("../fixtures/selfsigned-key.pem");
pub const SELF_SIGNED_KEY_PKCS1: &[u8] = include_bytes!("../fixtures/selfsigned-key-pkcs1.pem");
pub const SELF_SIGNED_CERT: &[u8] = include_bytes!("../fixtures/selfsigned-cert.pem");

/// Create a text PDF with `pages` pages and a classic xref table.
///
/// Each page carries a content stream with a few lines of text so a
/// three page document is close to 10 KB.
pub fn create_test_pdf(pages: usize) -> Vec<u8> {
    let mut pdf = Vec::new();
    let mut offsets = Vec::new();
    pdf.extend_from_slice(b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n");

    // 1: catalog, 2: pages, 3: font, then (page, content) pairs
    let page_id = |i: usize| 4 + 2 * i as u32;
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", page_id(i))).collect();

    let mut objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages).into_bytes(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
    ];
    for i in 0..pages {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                page_id(i) + 1
            )
            .into_bytes(),
        );
        let mut content = String::from("BT\n/F1 11 Tf\n72 720 Td\n14 TL\n");
        for line in 0..45 {
            content.push_str(&format!(
                "(Page {} line {:02}: The parties agree to the terms set out in this agreement.) '\n",
                i + 1,
                line
            ));
        }
        content.push_str("ET\n");
        let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
        stream.extend_from_slice(content.as_bytes());
        stream.extend_from_slice(b"\nendstream");
        objects.push(stream);
    }

    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        pdf.extend_from_slice(body);
        pdf.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    pdf
}

/// Signer issued by the test intermediate, with the intermediate embedded.
pub fn chained_identity() -> SigningIdentity {
    let intermediate = Certificate::from_pem(INTERMEDIATE_CERT).unwrap();
    SigningIdentity::from_pem(SIGNER_KEY, SIGNER_CERT)
        .unwrap()
        .with_chain(intermediate)
}

pub fn self_signed_identity() -> SigningIdentity {
    SigningIdentity::from_pem(SELF_SIGNED_KEY, SELF_SIGNED_CERT).unwrap()
}

pub fn root_anchor() -> Vec<Certificate> {
    Certificate::from_pem(ROOT_CERT).unwrap()
}

/// Options with a signing time inside the validity of every fixture
/// certificate.
pub fn options_within_validity(identity: &SigningIdentity) -> SignOptions {
    let not_before = identity.certificate().summary().not_before;
    SignOptions::new()
        .with_reason("Approved")
        .with_location("Test Lab")
        .with_signing_time(not_before + chrono::Duration::days(1))
}
