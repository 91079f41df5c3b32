//! AWS Signature Version 4 request signing for R2.
//!
//! Produces signed requests against an S3-compatible endpoint without an
//! SDK.  Every request signs the same three headers (`host`,
//! `x-amz-content-sha256`, `x-amz-date`) with an unsigned payload, so the
//! output is a pure function of the account, method, path and clock.
//!
//! The core algorithm follows the AWS SigV4 specification:
//! 1. Build a canonical request
//! 2. Build a string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Compute the signature and compose the Authorization header

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// R2 ignores the region but SigV4 requires one.
pub const REGION: &str = "auto";

/// Service name in the credential scope.
pub const SERVICE: &str = "s3";

/// Payload hash sentinel; bodies are never hashed.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Signed header names, lowercase and sorted.
pub const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Errors raised while signing.
#[derive(Debug, Error)]
pub enum SignError {
    /// The HMAC primitive rejected the key.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Credentials and location of one S3-compatible account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account ID, used as the first label of the endpoint host.
    pub account_id: String,
    /// Access key ID.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

/// A fully signed request, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// `https://{account}.{domain}/{path}`
    pub url: String,
    /// Headers to attach, lowercase names.
    pub headers: Vec<(&'static str, String)>,
}

impl SignedRequest {
    /// Return the value of a header by (lowercase) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

// ── Entry point ─────────────────────────────────────────────────────

/// Sign `method path` for `credentials` at time `now`.
///
/// `path` is the object path without a leading slash (`bucket/dir/file`);
/// it is URI-encoded with S3 rules (slashes kept) before signing.
pub fn sign_request(
    credentials: &Credentials,
    domain: &str,
    method: &str,
    path: &str,
    now: DateTime<Utc>,
) -> Result<SignedRequest, SignError> {
    let host = format!("{}.{}", credentials.account_id, domain);
    let amz_date = format_amz_date(now);
    let date_stamp = &amz_date[..8];
    let encoded_path = s3_uri_encode(path.trim_start_matches('/'), false);
    let canonical_uri = format!("/{encoded_path}");

    let canonical_request = build_canonical_request(method, &canonical_uri, &host, &amz_date);
    let credential_scope = build_credential_scope(date_stamp);
    let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
    let signing_key =
        derive_signing_key(&credentials.secret_access_key, date_stamp, REGION, SERVICE)?;
    let signature = compute_signature(&signing_key, &string_to_sign)?;

    let authorization = format!(
        "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        credentials.access_key_id
    );

    Ok(SignedRequest {
        url: format!("https://{host}{canonical_uri}"),
        headers: vec![
            ("authorization", authorization),
            ("x-amz-content-sha256", UNSIGNED_PAYLOAD.to_string()),
            ("x-amz-date", amz_date),
            ("host", host),
        ],
    })
}

/// Format a timestamp as ISO-8601 basic (`YYYYMMDDTHHMMSSZ`).
pub fn format_amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `date/region/service/aws4_request`
pub fn build_credential_scope(date_stamp: &str) -> String {
    format!("{date_stamp}/{REGION}/{SERVICE}/aws4_request")
}

// ── Canonical request construction ──────────────────────────────────

/// Build the canonical request string.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString (always empty) + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
pub fn build_canonical_request(
    method: &str,
    canonical_uri: &str,
    host: &str,
    amz_date: &str,
) -> String {
    let canonical_headers = format!(
        "host:{host}\nx-amz-content-sha256:{UNSIGNED_PAYLOAD}\nx-amz-date:{amz_date}\n"
    );
    format!(
        "{method}\n{canonical_uri}\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}"
    )
}

// ── String to sign ──────────────────────────────────────────────────

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{hash}")
}

// ── Signing key derivation ──────────────────────────────────────────

/// Derive the signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, service)
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, SignError> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Compute HMAC-SHA256.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SignError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SignError::InvalidKey(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Compute the signature: HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> Result<String, SignError> {
    let sig = hmac_sha256(signing_key, string_to_sign.as_bytes())?;
    Ok(hex::encode(sig))
}

// ── URI encoding ────────────────────────────────────────────────────

/// URI-encode a string per S3 SigV4 rules.
///
/// Unreserved characters (`A-Z a-z 0-9 - _ . ~`) pass through; everything
/// else is `%XX` encoded. When `encode_slash` is false, `/` is kept.
pub fn s3_uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
