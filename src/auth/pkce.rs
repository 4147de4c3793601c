//! PKCE S256 challenge and anti-CSRF state generation
//!
//! Implements the Proof Key for Code Exchange (PKCE) extension to OAuth 2.0
//! as defined in RFC 7636, using the `S256` challenge method.
//!
//! 1. The client generates a high-entropy random `code_verifier`.
//! 2. The `code_challenge` is `BASE64URL(SHA256(ASCII(code_verifier)))`,
//!    unpadded.
//! 3. The authorization request carries the challenge; the token exchange
//!    carries the verifier, proving possession.
//!
//! Verifier and state values are secrets for the lifetime of one login
//! attempt and must never be logged.

use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

/// The only challenge method this crate emits.
pub const S256: &str = "S256";

/// A PKCE verifier and its derived S256 challenge.
///
/// `Debug` is intentionally not derived so the verifier cannot end up in
/// log output.
///
/// # Examples
///
/// ```
/// use lmi::auth::pkce::generate;
///
/// let pkce = generate();
/// assert_eq!(pkce.verifier.len(), 86);
/// assert_eq!(pkce.challenge.len(), 43);
/// assert_ne!(pkce.verifier, pkce.challenge);
/// ```
#[derive(Clone)]
pub struct PkceChallenge {
    /// Base64url (no padding) encoding of 64 random bytes: 86 characters,
    /// inside the 43..=128 range allowed by RFC 7636.
    pub verifier: String,

    /// Base64url (no padding) SHA-256 digest of [`Self::verifier`].
    pub challenge: String,
}

/// Generates a fresh PKCE S256 verifier/challenge pair.
pub fn generate() -> PkceChallenge {
    let mut random_bytes = [0u8; 64];
    rand::rng().fill_bytes(&mut random_bytes);

    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
    let challenge = challenge_for(&verifier);

    PkceChallenge {
        verifier,
        challenge,
    }
}

/// Computes the S256 challenge for `verifier`.
///
/// # Examples
///
/// ```
/// use lmi::auth::pkce::challenge_for;
///
/// // RFC 7636 Appendix B
/// assert_eq!(
///     challenge_for("dBjftJeZ4CVP-mJ92K9MPXgS6TsbJKqSVM3n8f3tLiA"),
///     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM",
/// );
/// ```
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Generates a random anti-CSRF `state` value.
///
/// 32 random bytes encoded as base64url without padding.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_base64url_no_pad(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_verifier_length_within_rfc_bounds() {
        let pkce = generate();
        assert!((43..=128).contains(&pkce.verifier.len()));
    }

    #[test]
    fn test_challenge_matches_recomputed_digest() {
        let pkce = generate();
        assert_eq!(pkce.challenge, challenge_for(&pkce.verifier));
    }

    #[test]
    fn test_outputs_are_unpadded_base64url() {
        let pkce = generate();
        assert!(is_base64url_no_pad(&pkce.verifier));
        assert!(is_base64url_no_pad(&pkce.challenge));
        assert!(is_base64url_no_pad(&generate_state()));
    }

    #[test]
    fn test_successive_values_differ() {
        assert_ne!(generate().verifier, generate().verifier);
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mJ92K9MPXgS6TsbJKqSVM3n8f3tLiA"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }
}
