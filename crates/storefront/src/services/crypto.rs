//! Random tokens, PKCE pairs and HMAC signatures.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// RFC 7636 unreserved characters.
const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated PKCE verifiers (RFC 7636 allows 43..=128).
pub const VERIFIER_LENGTH: usize = 64;

fn random_from(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..alphabet.len());
            alphabet.get(idx).map_or('0', |&b| char::from(b))
        })
        .collect()
}

/// Random alphanumeric string, used for nonces and one-time tokens.
#[must_use]
pub fn random_token(len: usize) -> String {
    random_from(ALPHANUMERIC, len)
}

/// A PKCE code verifier and its S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_from(UNRESERVED, VERIFIER_LENGTH);
        let challenge = s256_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// `BASE64URL(SHA256(verifier))` without padding.
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Short stable fingerprint of a secret, safe to keep in the session.
#[must_use]
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    URL_SAFE_NO_PAD.encode(digest.get(..16).unwrap_or(&digest))
}

/// HMAC-SHA256 signer keyed by the session secret.
#[derive(Clone)]
pub struct Signer {
    key: SecretString,
}

impl Signer {
    #[must_use]
    pub const fn new(key: SecretString) -> Self {
        Self { key }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length, so this cannot fail.
        <HmacSha256 as Mac>::new_from_slice(self.key.expose_secret().as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"))
    }

    /// Base64url signature over `payload`.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of a base64url signature.
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(raw) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&raw).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc7636_appendix_b_vector() {
        assert_eq!(
            s256_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn generated_verifier_is_unreserved() {
        let pair = PkcePair::generate();
        assert_eq!(pair.verifier.len(), VERIFIER_LENGTH);
        assert!(pair.verifier.bytes().all(|b| UNRESERVED.contains(&b)));
        assert_eq!(pair.challenge, s256_challenge(&pair.verifier));
        assert_ne!(PkcePair::generate().verifier, pair.verifier);
    }

    #[test]
    fn signatures_verify_and_reject_tampering() {
        let signer = Signer::new(SecretString::from("k".repeat(32)));
        let sig = signer.sign(b"payload");
        assert!(signer.verify(b"payload", &sig));
        assert!(!signer.verify(b"payload2", &sig));
        assert!(!signer.verify(b"payload", "not base64 !"));

        let other = Signer::new(SecretString::from("j".repeat(32)));
        assert!(!other.verify(b"payload", &sig));
    }

    #[test]
    fn tokens_are_alphanumeric() {
        let t = random_token(32);
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
