//! AWS Signature Version 4 request signing.
//!
//! Canonical request string, `HMAC-SHA256` derived signing key chain
//! (`kDate -> kRegion -> kService -> kSigning`), and the rolling chunk
//! signer used for `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` chunked uploads.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 hash of an empty payload, used as the `x-amz-content-sha256`
/// value when signing the initial (headers-only) `PUT_MEDIA` request —
/// the body itself is streamed and signed chunk-by-chunk afterward.
pub const EMPTY_PAYLOAD_SHA256_HEX: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub const STREAMING_ALGORITHM: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Builds the canonical request string per SigV4 §Task 1.
pub fn canonical_request(
    method: &str,
    path: &str,
    canonical_query: &str,
    canonical_headers: &str,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    )
}

/// Builds the string-to-sign per SigV4 §Task 2.
pub fn string_to_sign(timestamp: &str, date: &str, region: &str, service: &str, canonical_request: &str) -> String {
    let scope = format!("{date}/{region}/{service}/aws4_request");
    let hashed = sha256_hex(canonical_request.as_bytes());
    format!("AWS4-HMAC-SHA256\n{timestamp}\n{scope}\n{hashed}")
}

/// Derives the final signing key: `kDate -> kRegion -> kService -> kSigning`.
pub fn derive_signing_key(secret_access_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_access_key}");
    let k_date = hmac(k_secret.as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// Signs a request, returning the lowercase-hex signature.
pub fn sign(secret_access_key: &str, date: &str, region: &str, service: &str, string_to_sign: &str) -> String {
    let signing_key = derive_signing_key(secret_access_key, date, region, service);
    hex::encode(hmac(&signing_key, string_to_sign.as_bytes()))
}

/// Signs one chunk of the `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` body. The
/// rolling key input is the *previous* chunk's signature (or the initial
/// request's seed signature for the first chunk), per the chunked signing
/// spec.
#[allow(clippy::too_many_arguments)]
pub fn sign_chunk(
    secret_access_key: &str,
    date: &str,
    region: &str,
    service: &str,
    timestamp: &str,
    previous_signature: &str,
    chunk_data: &[u8],
) -> String {
    let scope = format!("{date}/{region}/{service}/aws4_request");
    let empty_hash = sha256_hex(&[]);
    let chunk_hash = sha256_hex(chunk_data);
    let string_to_sign = format!(
        "{STREAMING_ALGORITHM}\n{timestamp}\n{scope}\n{previous_signature}\n{empty_hash}\n{chunk_hash}"
    );
    let signing_key = derive_signing_key(secret_access_key, date, region, service);
    hex::encode(hmac(&signing_key, string_to_sign.as_bytes()))
}

/// Builds the canonical-headers block and signed-headers list from a
/// caller-supplied header set, sorted and lower-cased per SigV4 rules.
pub fn canonicalize_headers(headers: &[(String, String)]) -> (String, String) {
    let mut sorted: Vec<(String, String)> =
        headers.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string())).collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical = sorted.iter().map(|(k, v)| format!("{k}:{v}\n")).collect::<String>();
    let signed = sorted.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");
    (canonical, signed)
}

/// Full request-level signer, bound to one set of (possibly short-lived)
/// AWS credentials.
pub struct SigV4Signer {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
    pub service: String,
}

impl SigV4Signer {
    /// Computes the `Authorization` header value for a request whose
    /// headers (including `host` and `x-amz-date`) are already finalized.
    pub fn authorization_header(
        &self,
        method: &str,
        path: &str,
        canonical_query: &str,
        headers: &[(String, String)],
        payload_hash: &str,
        timestamp: &str,
        date: &str,
    ) -> String {
        let (canonical_headers, signed_headers) = canonicalize_headers(headers);
        let creq = canonical_request(method, path, canonical_query, &canonical_headers, &signed_headers, payload_hash);
        let sts = string_to_sign(timestamp, date, &self.region, &self.service, &creq);
        let signature = sign(&self.secret_access_key, date, &self.region, &self.service, &sts);

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{}/{}/{}/aws4_request, SignedHeaders={}, Signature={}",
            self.access_key_id, date, self.region, self.service, signed_headers, signature
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_hash_matches_known_constant() {
        assert_eq!(sha256_hex(&[]), EMPTY_PAYLOAD_SHA256_HEX);
    }

    #[test]
    fn canonicalize_headers_sorts_and_lowercases() {
        let headers = vec![
            ("Host".to_string(), "example.com".to_string()),
            ("X-Amz-Date".to_string(), "20150830T123600Z".to_string()),
        ];
        let (canonical, signed) = canonicalize_headers(&headers);
        assert_eq!(canonical, "host:example.com\nx-amz-date:20150830T123600Z\n");
        assert_eq!(signed, "host;x-amz-date");
    }

    #[test]
    fn derived_signing_key_is_32_bytes() {
        let key = derive_signing_key("secret", "20150830", "us-east-1", "kinesisvideo");
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn signature_is_deterministic() {
        let sig1 = sign("secret", "20150830", "us-east-1", "kinesisvideo", "abc");
        let sig2 = sign("secret", "20150830", "us-east-1", "kinesisvideo", "abc");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
    }

    #[test]
    fn chunk_signature_changes_with_previous_signature() {
        let sig_a = sign_chunk("secret", "20150830", "us-east-1", "kinesisvideo", "20150830T123600Z", "seed", b"chunk1");
        let sig_b = sign_chunk("secret", "20150830", "us-east-1", "kinesisvideo", "20150830T123600Z", &sig_a, b"chunk2");
        assert_ne!(sig_a, sig_b);
    }
}
