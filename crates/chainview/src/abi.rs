//! ABI encoding and decoding for the name registry contract.
//!
//! `resolveName(address) returns (bytes32)` and `resolveAddr(bytes32) returns (address)`.
//! Names are stored as UTF-8, right-padded with zeros to 32 bytes; an all-zero word means unset.

use alloy::primitives::Address;
use anyhow::Result;
use sha3::{Digest, Keccak256};

pub const RESOLVE_NAME_SIG: &str = "resolveName(address)";
pub const RESOLVE_ADDR_SIG: &str = "resolveAddr(bytes32)";

/// First 4 bytes of keccak256 of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for `resolveName(addr)`.
pub fn encode_resolve_name(addr: &Address) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&selector(RESOLVE_NAME_SIG));
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(addr.as_slice());
    out
}

/// Calldata for `resolveAddr(name)`. Fails for names longer than 32 bytes.
pub fn encode_resolve_addr(name: &str) -> Result<Vec<u8>> {
    let word = name_to_word(name)?;
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&selector(RESOLVE_ADDR_SIG));
    out.extend_from_slice(&word);
    Ok(out)
}

/// Right-pad a name into a bytes32 word.
pub fn name_to_word(name: &str) -> Result<[u8; 32]> {
    let bytes = name.as_bytes();
    if bytes.len() > 32 {
        anyhow::bail!("name longer than 32 bytes: {}", bytes.len());
    }
    let mut word = [0u8; 32];
    word[..bytes.len()].copy_from_slice(bytes);
    Ok(word)
}

/// Decode `resolveName` return data. Zero word is None.
pub fn decode_name_return(data: &[u8]) -> Result<Option<String>> {
    if data.len() < 32 {
        anyhow::bail!("resolveName() return too short: {} bytes", data.len());
    }
    let word = &data[..32];
    let end = word.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    if end == 0 {
        return Ok(None);
    }
    let name = std::str::from_utf8(&word[..end])
        .map_err(|e| anyhow::anyhow!("resolveName() returned non-UTF-8 name: {e}"))?;
    Ok(Some(name.to_string()))
}

/// Decode `resolveAddr` return data. Zero address is None.
pub fn decode_addr_return(data: &[u8]) -> Result<Option<Address>> {
    if data.len() < 32 {
        anyhow::bail!("resolveAddr() return too short: {} bytes", data.len());
    }
    if data[..12].iter().any(|b| *b != 0) {
        anyhow::bail!("resolveAddr() return is not a padded address");
    }
    let addr = Address::from_slice(&data[12..32]);
    if addr == Address::ZERO {
        return Ok(None);
    }
    Ok(Some(addr))
}
