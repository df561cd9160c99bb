//! Small helpers used throughout the crate.

use openssl::sha::sha256 as openssl_sha256;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    openssl_sha256(data)
}

pub fn u8_to_hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{:02x}", b));
    }
    s
}
