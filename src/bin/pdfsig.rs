//! pdfsig - sign and verify PDF documents
//!
//! Usage:
//!   pdfsig sign --key key.pem --cert cert.pem --input in.pdf --output out.pdf
//!   pdfsig verify --input out.pdf --trust root.pem --report report.txt
//!   pdfsig tamper --input out.pdf --out-dir tampered/
//!
//! `verify` exits 0 for VALID, 1 for VALID_WITH_WARNINGS and 2 for INVALID.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use pdf_seal::signatures::{
    append_trailer, flip_byte, Certificate, PdfSigner, RevocationList, SignOptions, SignatureFieldSpec,
    SignatureVerifier, SigningIdentity, VerificationStatus, DEFAULT_FIELD_NAME, DEFAULT_RECT,
};
use pdf_seal::structure::page_count;
use pdf_seal::VerifyConfig;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pdfsig")]
#[command(about = "Incremental PDF signing and signature verification")]
#[command(long_about = "
pdfsig - detached PKCS#7 signatures for PDF documents

EXAMPLES:
    # Sign the last page with the default footer field
    pdfsig sign --key signer-key.pem --cert signer-cert.pem --input contract.pdf --output signed.pdf

    # Verify against a trust anchor and write a report
    pdfsig verify --input signed.pdf --trust root.pem --report report.txt

    # Produce corrupted variants for negative testing
    pdfsig tamper --input signed.pdf --out-dir tampered

EXIT CODES (verify):
    0 = VALID
    1 = VALID_WITH_WARNINGS
    2 = INVALID

ENVIRONMENT VARIABLES:
    RUST_LOG        Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a PDF with an RSA key and X.509 certificate
    Sign {
        /// Private key (PKCS#8 or PKCS#1 PEM)
        #[arg(long, value_name = "KEY_PEM")]
        key: PathBuf,

        /// Signer certificate PEM, optionally followed by its chain
        #[arg(long, value_name = "CERT_PEM")]
        cert: PathBuf,

        /// Additional chain certificates to embed
        #[arg(long, value_name = "CHAIN_PEM")]
        chain: Option<PathBuf>,

        /// PDF to sign
        #[arg(short, long, value_name = "INPUT_FILE")]
        input: PathBuf,

        /// Where to write the signed PDF
        #[arg(short, long, value_name = "OUTPUT_FILE")]
        output: PathBuf,

        /// Signature field name
        #[arg(long, default_value = DEFAULT_FIELD_NAME)]
        field: String,

        /// Zero-based page index (defaults to the last page)
        #[arg(long)]
        page: Option<usize>,

        /// Widget rectangle as x1,y1,x2,y2
        #[arg(long, value_name = "RECT")]
        rect: Option<String>,

        /// Reason for signing
        #[arg(long)]
        reason: Option<String>,

        /// Signing location
        #[arg(long)]
        location: Option<String>,

        /// Signer contact information
        #[arg(long)]
        contact: Option<String>,
    },

    /// Verify the signatures in a PDF
    Verify {
        /// Signed PDF
        #[arg(short, long, value_name = "INPUT_FILE")]
        input: PathBuf,

        /// Trust anchor certificates (PEM, may repeat)
        #[arg(long, value_name = "ROOT_PEM")]
        trust: Vec<PathBuf>,

        /// Certificates to treat as revoked (PEM, may repeat)
        #[arg(long, value_name = "CERT_PEM")]
        revoked: Vec<PathBuf>,

        /// Write a plain text report to this file
        #[arg(long, value_name = "REPORT_FILE")]
        report: Option<PathBuf>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Verify every signature instead of only the first
        #[arg(long)]
        all: bool,

        /// Revocation query timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },

    /// Write corrupted copies of a signed PDF
    Tamper {
        /// Signed PDF
        #[arg(short, long, value_name = "INPUT_FILE")]
        input: PathBuf,

        /// Directory for the corrupted copies
        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,

        /// Bytes appended for the trailer variant
        #[arg(long, default_value = "\n%tampered\n")]
        marker: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Sign {
            key,
            cert,
            chain,
            input,
            output,
            field,
            page,
            rect,
            reason,
            location,
            contact,
        } => {
            let options = SignOptions {
                reason,
                location,
                contact_info: contact,
                ..SignOptions::default()
            };
            run_sign(&key, &cert, chain.as_deref(), &input, &output, field, page, rect.as_deref(), options)
                .map(|_| 0)
        },
        Commands::Verify {
            input,
            trust,
            revoked,
            report,
            json,
            all,
            timeout,
        } => run_verify(&input, &trust, &revoked, report.as_deref(), json, all, timeout),
        Commands::Tamper {
            input,
            out_dir,
            marker,
        } => run_tamper(&input, &out_dir, marker.as_bytes()).map(|_| 0),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(VerificationStatus::Invalid.exit_code());
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn run_sign(
    key: &Path,
    cert: &Path,
    chain: Option<&Path>,
    input: &Path,
    output: &Path,
    field: String,
    page: Option<usize>,
    rect: Option<&str>,
    options: SignOptions,
) -> Result<()> {
    let key_pem = fs::read(key).with_context(|| format!("reading key {}", key.display()))?;
    let cert_pem = fs::read(cert).with_context(|| format!("reading certificate {}", cert.display()))?;
    let mut identity = SigningIdentity::from_pem(&key_pem, &cert_pem).context("loading signing identity")?;
    if let Some(chain) = chain {
        let pem = fs::read(chain).with_context(|| format!("reading chain {}", chain.display()))?;
        let mut certs = identity.chain().to_vec();
        certs.extend(Certificate::from_pem(&pem).context("parsing chain certificates")?);
        identity = identity.with_chain(certs);
    }

    let document = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let page_index = match page {
        Some(index) => index,
        None => page_count(&document)
            .context("counting pages")?
            .checked_sub(1)
            .context("document has no pages")?,
    };
    let rect = match rect {
        Some(text) => parse_rect(text)?,
        None => DEFAULT_RECT,
    };

    let signer = PdfSigner::new(identity, options);
    let signed = signer
        .sign(&document, &SignatureFieldSpec::new(field, page_index, rect))
        .context("signing document")?;
    fs::write(output, &signed).with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Signed {} -> {} ({} bytes appended)",
        input.display(),
        output.display(),
        signed.len() - document.len()
    );
    Ok(())
}

fn run_verify(
    input: &Path,
    trust: &[PathBuf],
    revoked: &[PathBuf],
    report: Option<&Path>,
    json: bool,
    all: bool,
    timeout: u64,
) -> Result<i32> {
    let data = fs::read(input).with_context(|| format!("reading {}", input.display()))?;

    let mut anchors = Vec::new();
    for path in trust {
        let pem = fs::read(path).with_context(|| format!("reading trust anchor {}", path.display()))?;
        anchors.extend(Certificate::from_pem(&pem).with_context(|| format!("parsing {}", path.display()))?);
    }
    let mut list = RevocationList::new();
    for path in revoked {
        let pem = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        for cert in Certificate::from_pem(&pem)? {
            list.revoke(&cert, Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now));
        }
    }

    let config = VerifyConfig::new().with_revocation_timeout(Duration::from_secs(timeout));
    let mut verifier = SignatureVerifier::new(anchors).with_config(config);
    if !list.is_empty() {
        verifier = verifier.with_oracle(Arc::new(list));
    }
    let results = if all {
        verifier.verify_all(&data)
    } else {
        vec![verifier.verify(&data)]
    };
    if results.is_empty() {
        bail!("{} contains no signatures", input.display());
    }

    if let Some(path) = report {
        let mut file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        for result in &results {
            result.write_report(&mut file)?;
        }
        file.flush()?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for result in &results {
            result.write_report(&mut out)?;
        }
    }

    let worst = results
        .iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(VerificationStatus::Invalid);
    Ok(worst.exit_code())
}

fn run_tamper(input: &Path, out_dir: &Path, marker: &[u8]) -> Result<()> {
    let data = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let flipped = out_dir.join(format!("{}-flipped.pdf", stem));
    let appended = out_dir.join(format!("{}-appended.pdf", stem));

    fs::write(&flipped, flip_byte(&data)?)?;
    fs::write(&appended, append_trailer(&data, marker)?)?;
    println!("Wrote {}", flipped.display());
    println!("Wrote {}", appended.display());
    Ok(())
}

fn parse_rect(text: &str) -> Result<[f64; 4]> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid rectangle '{}'", text))?;
    match values.as_slice() {
        [x1, y1, x2, y2] => Ok([*x1, *y1, *x2, *y2]),
        _ => bail!("rectangle needs four comma separated numbers, got '{}'", text),
    }
}
