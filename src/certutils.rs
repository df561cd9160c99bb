//! X.509 helpers built on `openssl::x509`. Deliberately thin: this crate
//! does not re-implement ASN.1 parsing, it reads the handful of fields a
//! CT monitor actually needs from whatever `openssl` already parsed.

use std::collections::BTreeSet;

use openssl::nid::Nid;
use openssl::x509::{GeneralName, X509, X509NameRef};

use crate::error::Error;

/// All `commonName` RDN values in a certificate's subject.
pub fn get_common_names(cert: &X509) -> Result<Vec<String>, Error> {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .map(|e| {
            e.data()
                .as_utf8()
                .map(|s| s.to_string())
                .map_err(|e| Error::BadCertificate(format!("non-UTF8 commonName: {}", e)))
        })
        .collect()
}

/// All `dNSName` values in a certificate's `subjectAltName` extension.
/// Empty (not an error) if the certificate has no SAN extension.
pub fn get_dns_names(cert: &X509) -> Result<Vec<String>, Error> {
    let Some(sans) = cert.subject_alt_names() else {
        return Ok(Vec::new());
    };
    Ok(sans
        .iter()
        .filter_map(|name| GeneralName::dnsname(&name).map(|s| s.to_owned()))
        .collect())
}

/// Looks label-shaped enough to be a DNS name worth matching (contains at
/// least one dot, no whitespace). Syntactic sanity check, not full RFC 1035
/// validation — a CN that fails it is simply excluded from the identity
/// set, not treated as an error.
fn looks_dns_label_shaped(s: &str) -> bool {
    !s.is_empty()
        && s.contains('.')
        && !s.contains(char::is_whitespace)
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '*')
}

/// `{CN if DNS-label-shaped} ∪ {all SAN dNSName values}`, lowercased —
/// the identity set a discovered certificate is matched against a
/// watch list with.
pub fn identities_of(cert: &X509) -> Result<BTreeSet<String>, Error> {
    let mut out: BTreeSet<String> = get_dns_names(cert)?
        .into_iter()
        .map(|s| s.to_ascii_lowercase())
        .collect();
    for cn in get_common_names(cert)? {
        if looks_dns_label_shaped(&cn) {
            out.insert(cn.to_ascii_lowercase());
        }
    }
    Ok(out)
}

pub fn dn_to_string(name: &X509NameRef) -> String {
    name.entries()
        .map(|e| {
            format!(
                "{}={}",
                e.object().nid().short_name().unwrap_or("?"),
                e.data().as_utf8().map(|s| s.to_string()).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn asn1_time_to_unix(t: &openssl::asn1::Asn1TimeRef) -> Result<u64, Error> {
    let epoch = openssl::asn1::Asn1Time::from_unix(0)
        .map_err(|e| Error::BadCertificate(format!("could not build unix epoch: {}", e)))?;
    let diff = epoch
        .diff(t)
        .map_err(|e| Error::BadCertificate(format!("could not diff certificate time: {}", e)))?;
    Ok((diff.days as i64 * 86_400 + diff.secs as i64).max(0) as u64)
}

pub fn pubkey_hash(cert: &X509) -> Result<[u8; 32], Error> {
    let pubkey = cert
        .public_key()
        .map_err(|e| Error::BadCertificate(format!("could not read public key: {}", e)))?;
    let spki_der = pubkey
        .public_key_to_der()
        .map_err(|e| Error::BadCertificate(format!("could not encode public key: {}", e)))?;
    Ok(crate::utils::sha256(&spki_der))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::extension::SubjectAlternativeName;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn build_cert(cn: &str, sans: &[&str]) -> X509 {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(1_700_000_000).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(1_800_000_000).unwrap())
            .unwrap();
        builder.set_pubkey(&pkey).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        let name = name.build();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        if !sans.is_empty() {
            let mut san_ext = SubjectAlternativeName::new();
            for s in sans {
                san_ext.dns(s);
            }
            let ctx = builder.x509v3_context(None, None);
            let ext = san_ext.build(&ctx).unwrap();
            builder.append_extension(ext).unwrap();
        }
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn extracts_common_names_and_dns_names() {
        let cert = build_cert("Example CA", &["foo.example.com", "bar.example.com"]);
        assert_eq!(get_common_names(&cert).unwrap(), vec!["Example CA".to_owned()]);
        let mut dns = get_dns_names(&cert).unwrap();
        dns.sort();
        assert_eq!(dns, vec!["bar.example.com".to_owned(), "foo.example.com".to_owned()]);
    }

    #[test]
    fn identities_merges_san_and_dns_shaped_cn() {
        let cert = build_cert("foo.example.com", &["bar.example.com"]);
        let ids = identities_of(&cert).unwrap();
        assert!(ids.contains("foo.example.com"));
        assert!(ids.contains("bar.example.com"));
    }

    #[test]
    fn organization_shaped_cn_is_excluded() {
        let cert = build_cert("Example Org", &[]);
        let ids = identities_of(&cert).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn no_san_extension_is_not_an_error() {
        let cert = build_cert("plain.example.com", &[]);
        assert_eq!(get_dns_names(&cert).unwrap(), Vec::<String>::new());
    }
}
