// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request signatures for the data plane.
//!
//! The canonical string is `METHOD\nPATH\nTIMESTAMP\nNONCE\nBODY`, joined
//! with U+000A line feeds, where BODY is the exact byte sequence the parser
//! received. The signature is HMAC-SHA256 over that string keyed with the
//! tenant's API secret, hex-encoded.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Assemble the canonical byte string a signature covers.
pub fn canonical_request(
    method: &str,
    path: &str,
    timestamp_ms: i64,
    nonce: &str,
    body: &[u8],
) -> Vec<u8> {
    let mut canonical = Vec::with_capacity(method.len() + path.len() + nonce.len() + body.len() + 24);
    canonical.extend_from_slice(method.as_bytes());
    canonical.push(b'\n');
    canonical.extend_from_slice(path.as_bytes());
    canonical.push(b'\n');
    canonical.extend_from_slice(timestamp_ms.to_string().as_bytes());
    canonical.push(b'\n');
    canonical.extend_from_slice(nonce.as_bytes());
    canonical.push(b'\n');
    canonical.extend_from_slice(body);
    canonical
}

/// Hex-encoded HMAC-SHA256 of the canonical request.
pub fn sign(secret: &str, canonical: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against the canonical request in constant time.
pub fn verify(
    secret: &str,
    method: &str,
    path: &str,
    timestamp_ms: i64,
    nonce: &str,
    body: &[u8],
    provided_hex: &str,
) -> bool {
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    let canonical = canonical_request(method, path, timestamp_ms, nonce, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(&canonical);
    let expected = mac.finalize().into_bytes();
    expected.ct_eq(provided.as_slice()).into()
}

/// Constant-time equality for API secrets.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0badcafe";

    #[test]
    fn canonical_request_joins_with_line_feeds() {
        let canonical = canonical_request("POST", "/v1/notify", 1700000000000, "n-1", b"{}");
        assert_eq!(canonical, b"POST\n/v1/notify\n1700000000000\nn-1\n{}");
    }

    #[test]
    fn sign_verify_round_trip() {
        let body = br#"{"appId":"com.acme.app"}"#;
        let signature = sign(SECRET, &canonical_request("POST", "/v1/notify", 42, "n", body));
        assert!(verify(SECRET, "POST", "/v1/notify", 42, "n", body, &signature));
    }

    #[test]
    fn verification_is_byte_exact_over_the_body() {
        // Semantically identical JSON with different whitespace must not verify.
        let signed = br#"{"a":1,"b":2}"#;
        let reshaped = br#"{"a": 1, "b": 2}"#;
        let signature = sign(SECRET, &canonical_request("POST", "/v1/notify", 42, "n", signed));
        assert!(verify(SECRET, "POST", "/v1/notify", 42, "n", signed, &signature));
        assert!(!verify(SECRET, "POST", "/v1/notify", 42, "n", reshaped, &signature));
    }

    #[test]
    fn rejects_wrong_key_timestamp_or_nonce() {
        let body = b"payload";
        let signature = sign(SECRET, &canonical_request("POST", "/v1/notify", 42, "n", body));
        assert!(!verify("other", "POST", "/v1/notify", 42, "n", body, &signature));
        assert!(!verify(SECRET, "POST", "/v1/notify", 43, "n", body, &signature));
        assert!(!verify(SECRET, "POST", "/v1/notify", 42, "m", body, &signature));
        assert!(!verify(SECRET, "POST", "/v1/other", 42, "n", body, &signature));
    }

    #[test]
    fn rejects_non_hex_signatures() {
        assert!(!verify(SECRET, "POST", "/v1/notify", 42, "n", b"x", "zz-not-hex"));
    }

    #[test]
    fn secrets_match_requires_exact_equality() {
        assert!(secrets_match("abc123", "abc123"));
        assert!(!secrets_match("abc123", "abc124"));
        assert!(!secrets_match("abc123", "abc12"));
    }
}
