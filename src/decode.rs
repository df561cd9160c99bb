//! Parses a `MerkleTreeLeaf` (RFC 6962 §3.4) into a certificate or
//! pre-certificate and extracts the identities used for watch-list
//! matching.
//!
//! Malformed entries never abort the log: the leaf hash is computed from
//! the raw bytes before any parsing is attempted, so a decode failure here
//! still lets the caller advance the collapsed tree correctly and report
//! the failure as an observation (`notify_malformed_entry`), not a loss.

use std::collections::BTreeSet;

use openssl::x509::X509;

use crate::certutils;
use crate::error::Error;
use crate::merkle::leaf_hash;

/// A byte cursor for the TLS presentation-language encoding RFC 6962 uses
/// for leaves and extra data (fixed-width integers, `opaque<N>` length
/// prefixes).
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| Error::MalformedResponseBody("leaf truncated".to_owned()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    /// `opaque<0..2^24-1>`: a 3-byte big-endian length prefix.
    fn opaque_u24(&mut self) -> Result<&'a [u8], Error> {
        let len_bytes = self.take(3)?;
        let len = ((len_bytes[0] as usize) << 16) | ((len_bytes[1] as usize) << 8) | (len_bytes[2] as usize);
        self.take(len)
    }

    /// `opaque<0..2^16-1>`: a 2-byte big-endian length prefix.
    fn opaque_u16(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// `LogEntryType` (RFC 6962 §3.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    X509,
    PreCert,
}

/// A fully decoded CT log entry, ready for watch-list matching.
#[derive(Clone, Debug)]
pub struct DecodedEntry {
    pub entry_type: EntryType,
    pub timestamp: u64,
    /// Leaf certificate (x509_entry) or pre-certificate (precert_entry),
    /// DER-encoded.
    pub certificate_der: Vec<u8>,
    /// Issuer chain, DER-encoded, as provided in `extra_data`.
    pub chain_der: Vec<Vec<u8>>,
    pub serial: Vec<u8>,
    pub not_before: u64,
    pub not_after: u64,
    pub issuer_dn: String,
    pub subject_dn: String,
    pub pubkey_hash: [u8; 32],
    /// `{CN if DNS-label-shaped} ∪ {all SAN dNSName values}`, lowercased.
    pub dns_identities: BTreeSet<String>,
}

fn x509_chain_entry(extra_data: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let mut outer = Cursor::new(extra_data);
    let body = outer.opaque_u24()?;
    if !outer.is_empty() {
        return Err(Error::MalformedResponseBody(
            "trailing bytes after X509ChainEntry".to_owned(),
        ));
    }
    let mut cur = Cursor::new(body);
    let mut chain = Vec::new();
    while !cur.is_empty() {
        chain.push(cur.opaque_u24()?.to_vec());
    }
    Ok(chain)
}

fn precert_chain_entry(extra_data: &[u8]) -> Result<(Vec<u8>, Vec<Vec<u8>>), Error> {
    let mut cur = Cursor::new(extra_data);
    let pre_certificate = cur.opaque_u24()?.to_vec();
    let chain = x509_chain_entry(&extra_data[cur.pos..])?;
    Ok((pre_certificate, chain))
}

/// Decodes a `MerkleTreeLeaf` and its accompanying `extra_data`. The leaf
/// hash should be computed by the caller from `raw_leaf` *before* calling
/// this, since it must be recorded even when decoding fails.
pub fn decode_entry(raw_leaf: &[u8], extra_data: &[u8]) -> Result<DecodedEntry, Error> {
    let mut cur = Cursor::new(raw_leaf);
    let version = cur.u8()?;
    if version != 0 {
        return Err(Error::MalformedResponseBody(format!(
            "unsupported leaf version {}",
            version
        )));
    }
    let leaf_type = cur.u8()?;
    if leaf_type != 0 {
        return Err(Error::MalformedResponseBody(format!(
            "unsupported leaf type {}",
            leaf_type
        )));
    }
    let timestamp = cur.u64()?;
    let entry_type_raw = cur.u16()?;

    let (entry_type, certificate_der, chain_der) = match entry_type_raw {
        0 => {
            let cert = cur.opaque_u24()?.to_vec();
            let _ = cur.opaque_u16()?; // CtExtensions, unused
            if !cur.is_empty() {
                return Err(Error::MalformedResponseBody(
                    "trailing bytes after TimestampedEntry".to_owned(),
                ));
            }
            let chain = x509_chain_entry(extra_data)?;
            (EntryType::X509, cert, chain)
        }
        1 => {
            let _issuer_key_hash = cur.take(32)?;
            let _tbs = cur.opaque_u24()?;
            let _ = cur.opaque_u16()?; // CtExtensions, unused
            if !cur.is_empty() {
                return Err(Error::MalformedResponseBody(
                    "trailing bytes after TimestampedEntry".to_owned(),
                ));
            }
            let (pre_cert, chain) = precert_chain_entry(extra_data)?;
            (EntryType::PreCert, pre_cert, chain)
        }
        other => {
            return Err(Error::MalformedResponseBody(format!(
                "unknown log entry type {}",
                other
            )));
        }
    };

    let x509 = X509::from_der(&certificate_der)
        .map_err(|e| Error::BadCertificate(format!("could not parse certificate: {}", e)))?;

    let not_before = certutils::asn1_time_to_unix(x509.not_before())?;
    let not_after = certutils::asn1_time_to_unix(x509.not_after())?;
    let serial = x509
        .serial_number()
        .to_bn()
        .map_err(|e| Error::BadCertificate(format!("could not read serial: {}", e)))?
        .to_vec();

    Ok(DecodedEntry {
        entry_type,
        timestamp,
        issuer_dn: certutils::dn_to_string(x509.issuer_name()),
        subject_dn: certutils::dn_to_string(x509.subject_name()),
        pubkey_hash: certutils::pubkey_hash(&x509)?,
        dns_identities: certutils::identities_of(&x509)?,
        serial,
        not_before,
        not_after,
        certificate_der,
        chain_der,
    })
}

/// Computes the leaf hash that must be recorded for every entry
/// regardless of whether decoding succeeds.
pub fn entry_leaf_hash(raw_leaf: &[u8]) -> [u8; 32] {
    leaf_hash(raw_leaf)
}
