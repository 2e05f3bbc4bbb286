//! Hashing helpers shared by the auth schemes, over BoringSSL.

use crate::base::neterror::NetError;
use boring::hash::{hash, MessageDigest};
use boring::nid::Nid;
use std::fmt::Write;

/// Block size of MD4, MD5, SHA-1 and SHA-256.
const HMAC_BLOCK: usize = 64;

pub(crate) fn digest(md: MessageDigest, data: &[u8]) -> Result<Vec<u8>, NetError> {
    hash(md, data)
        .map(|d| d.to_vec())
        .map_err(|_| NetError::SslProtocolError)
}

pub(crate) fn hex_digest(md: MessageDigest, data: &[u8]) -> Result<String, NetError> {
    Ok(to_hex(&digest(md, data)?))
}

pub(crate) fn md4(data: &[u8]) -> Result<Vec<u8>, NetError> {
    let md = MessageDigest::from_nid(Nid::MD4).ok_or(NetError::SslProtocolError)?;
    digest(md, data)
}

/// RFC 2104 HMAC for any 64-byte-block digest.
pub(crate) fn hmac(md: MessageDigest, key: &[u8], data: &[u8]) -> Result<Vec<u8>, NetError> {
    let mut block = [0u8; HMAC_BLOCK];
    if key.len() > HMAC_BLOCK {
        let hashed = digest(md, key)?;
        block[..hashed.len()].copy_from_slice(&hashed);
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Vec::with_capacity(HMAC_BLOCK + data.len());
    inner.extend(block.iter().map(|b| b ^ 0x36));
    inner.extend_from_slice(data);
    let inner_hash = digest(md, &inner)?;

    let mut outer = Vec::with_capacity(HMAC_BLOCK + inner_hash.len());
    outer.extend(block.iter().map(|b| b ^ 0x5c));
    outer.extend_from_slice(&inner_hash);
    digest(md, &outer)
}

pub(crate) fn random_bytes(len: usize) -> Result<Vec<u8>, NetError> {
    let mut buf = vec![0u8; len];
    boring::rand::rand_bytes(&mut buf).map_err(|_| NetError::SslProtocolError)?;
    Ok(buf)
}

pub(crate) fn random_hex(len: usize) -> Result<String, NetError> {
    Ok(to_hex(&random_bytes(len)?))
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}
