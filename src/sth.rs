//! Signed tree heads: the self-validating `(size, root, timestamp)`
//! commitment a CT log makes to its current state.

use base64::Engine;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Public};
use openssl::sign::Verifier;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::jsons;

/// Signature algorithm a log declares in the log-list metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SthSignatureAlgorithm {
    EcdsaP256Sha256,
    RsaPkcs1Sha256,
}

/// A log's signed commitment to its current tree state.
///
/// Equality is defined by `(tree_size, root_hash)` only — two STHs with
/// equal size but different roots are a *split view*, not "different STHs
/// that happen to both be true"; comparing timestamps would hide that.
#[derive(Clone, Debug)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp: u64,
    pub root_hash: [u8; 32],
    /// Raw `DigitallySigned` struct bytes, as returned by the log.
    pub signature: Vec<u8>,
}

impl PartialEq for SignedTreeHead {
    fn eq(&self, other: &Self) -> bool {
        self.tree_size == other.tree_size && self.root_hash == other.root_hash
    }
}
impl Eq for SignedTreeHead {}

impl SignedTreeHead {
    pub fn from_json(j: &jsons::STH) -> Result<Self, Error> {
        let root_hash_vec = base64::engine::general_purpose::STANDARD
            .decode(&j.sha256_root_hash)
            .map_err(|e| Error::MalformedResponseBody(format!("bad sha256_root_hash: {}", e)))?;
        let root_hash: [u8; 32] = root_hash_vec.as_slice().try_into().map_err(|_| {
            Error::MalformedResponseBody("sha256_root_hash is not 32 bytes".to_owned())
        })?;
        let signature = base64::engine::general_purpose::STANDARD
            .decode(&j.tree_head_signature)
            .map_err(|e| Error::MalformedResponseBody(format!("bad tree_head_signature: {}", e)))?;
        Ok(SignedTreeHead {
            tree_size: j.tree_size,
            timestamp: j.timestamp,
            root_hash,
            signature,
        })
    }

    /// The `TreeHeadSignature` input per RFC 6962 §3.5: version(1) ‖
    /// signature_type(1)=tree_hash ‖ timestamp(8) ‖ tree_size(8) ‖
    /// root_hash(32).
    fn signed_data(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 1 + 8 + 8 + 32);
        buf.push(0u8); // version: v1
        buf.push(1u8); // signature_type: tree_hash
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.tree_size.to_be_bytes());
        buf.extend_from_slice(&self.root_hash);
        buf
    }
}

/// Splits a TLS 1.2 `DigitallySigned` struct (`hash_alg(1) ‖ sig_alg(1) ‖
/// length(2) ‖ signature`) into its signature bytes, checking the declared
/// algorithm matches what we expect for this log.
fn digitally_signed_payload<'a>(
    blob: &'a [u8],
    expect: SthSignatureAlgorithm,
) -> Result<&'a [u8], Error> {
    if blob.len() < 4 {
        return Err(Error::InvalidSignature("signature blob too short".to_owned()));
    }
    let hash_alg = blob[0];
    let sig_alg = blob[1];
    let len = u16::from_be_bytes([blob[2], blob[3]]) as usize;
    let expected_sig_alg = match expect {
        SthSignatureAlgorithm::EcdsaP256Sha256 => 3u8, // ecdsa
        SthSignatureAlgorithm::RsaPkcs1Sha256 => 1u8,  // rsa
    };
    if hash_alg != 4 {
        // sha256
        return Err(Error::InvalidSignature(format!(
            "unexpected hash algorithm {}",
            hash_alg
        )));
    }
    if sig_alg != expected_sig_alg {
        return Err(Error::InvalidSignature(format!(
            "unexpected signature algorithm {}",
            sig_alg
        )));
    }
    let sig = blob
        .get(4..4 + len)
        .ok_or_else(|| Error::InvalidSignature("signature length does not match blob".to_owned()))?;
    Ok(sig)
}

/// Verifies an STH's signature against the log's public key.
pub fn verify_sth_signature(
    sth: &SignedTreeHead,
    pub_key: &PKey<Public>,
    alg: SthSignatureAlgorithm,
) -> Result<(), Error> {
    let sig = digitally_signed_payload(&sth.signature, alg)?;
    let mut verifier = Verifier::new(MessageDigest::sha256(), pub_key)
        .map_err(|e| Error::InvalidSignature(format!("could not create verifier: {}", e)))?;
    verifier
        .update(&sth.signed_data())
        .map_err(|e| Error::InvalidSignature(format!("verifier update failed: {}", e)))?;
    let ok = verifier
        .verify(sig)
        .map_err(|e| Error::InvalidSignature(format!("verification failed: {}", e)))?;
    if !ok {
        return Err(Error::InvalidSignature(
            "STH signature does not verify against the log's public key".to_owned(),
        ));
    }
    Ok(())
}
