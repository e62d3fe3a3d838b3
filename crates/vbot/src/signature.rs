//! Travis CI webhook signature verification.
//!
//! Travis signs the raw `payload` form field with RSASSA-PKCS1-v1_5 over
//! SHA-1 and sends the base64 signature in the `Signature` header. The
//! signature covers the exact payload bytes, so verification must run on the
//! string as received and never on re-serialized JSON.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha1::Sha1;
use tracing::debug;

use crate::error::SignatureError;

/// Verify a base64 signature over `payload` with a PEM-encoded RSA public key.
///
/// Accepts SPKI (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`)
/// encodings. Every failure collapses into [`SignatureError`]; the reason is
/// only logged.
pub fn verify_signature(
    public_key_pem: &str,
    payload: &[u8],
    signature_b64: &str,
) -> Result<(), SignatureError> {
    let key = parse_public_key(public_key_pem)?;

    let Ok(signature_bytes) = STANDARD.decode(signature_b64.trim()) else {
        debug!("Signature is not valid base64");
        return Err(SignatureError);
    };

    let Ok(signature) = Signature::try_from(signature_bytes.as_slice()) else {
        debug!("Signature has an invalid length");
        return Err(SignatureError);
    };

    VerifyingKey::<Sha1>::new(key)
        .verify(payload, &signature)
        .map_err(|_| {
            debug!("Signature does not match payload");
            SignatureError
        })
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, SignatureError> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| {
            debug!("Public key is not a valid RSA PEM");
            SignatureError
        })
}
