//! Request signing shared with the downstream relay.
//!
//! `sign = urlencode(base64(HMAC-SHA256(key = secret, timestamp + "\n" + secret)))`
//! where only `A-Z a-z 0-9 - _ . ~` survive the URL encoding.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGN_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn generate_sign(timestamp: &str, secret: &str) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(timestamp.as_bytes());
    mac.update(b"\n");
    mac.update(secret.as_bytes());
    let digest = mac.finalize().into_bytes();
    let encoded = BASE64_STANDARD.encode(digest);
    utf8_percent_encode(&encoded, SIGN_ENCODE_SET).to_string()
}

pub fn validate_sign(timestamp: &str, sign: &str, secret: &str) -> bool {
    generate_sign(timestamp, secret) == sign
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_signatures() {
        assert_eq!(
            generate_sign("24/05/01,10:00:00+32", "secret"),
            "4j4m5NPBJ2etEAIymtdMcioRUHK0GoIfmXC8yY3HYTQ%3D"
        );
        assert_eq!(
            generate_sign("1700000000004", "relay-secret"),
            "RX%2B%2Fa6H5znDh4s0hhyJ1qte3CQ3xZM5BDlgwv6MJanI%3D"
        );
    }

    #[test]
    fn validate_accepts_only_matching_sign() {
        let sign = generate_sign("1700000000000", "SEC123");
        assert!(validate_sign("1700000000000", &sign, "SEC123"));
        assert!(!validate_sign("1700000000001", &sign, "SEC123"));
        assert!(!validate_sign("1700000000000", &sign, "other"));
    }
}
