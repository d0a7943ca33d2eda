use std::fmt;

use crate::error::TrackerError;

/// 20-byte SHA-1 info-hash; the identity key of a torrent.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

/// 20-byte client-chosen identifier for a swarm member.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl InfoHash {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// True if `prefix` is a prefix of this peer id's raw bytes.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        prefix.len() <= self.0.len() && self.0[..prefix.len()] == *prefix
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(bytes: [u8; 20]) -> Self {
        InfoHash(bytes)
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(bytes: [u8; 20]) -> Self {
        PeerId(bytes)
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Decodes a percent-escaped query value into a raw 20-byte identifier.
///
/// Bytes are copied verbatim except `%XX` triplets, which are
/// hex-unescaped. The expected decoded length is checked up front by
/// counting percent signs, the same shape as the teacher's
/// `urlencoded_to_bytes`, before any decoding work happens.
pub fn percent_decode_20(value: &[u8]) -> Result<[u8; 20], TrackerError> {
    let percent_count = memchr::memchr_iter(b'%', value).count();
    if value.len() != 20 + 2 * percent_count {
        return Err(TrackerError::InvalidInfoHashOrPeerId);
    }

    let decoded = percent_decode(value)?;
    decoded
        .try_into()
        .map_err(|_| TrackerError::InvalidInfoHashOrPeerId)
}

/// Percent-decodes a query value of arbitrary length: bytes are copied
/// verbatim except `%XX` triplets, which are hex-unescaped. Used both for
/// the fixed-20-byte info-hash/peer-id case and for control-plane actions
/// that ship a concatenation of several 20-byte hashes in one value
/// (`update_torrents`).
pub fn percent_decode(value: &[u8]) -> Result<Vec<u8>, TrackerError> {
    let mut out = Vec::with_capacity(value.len());
    let mut pos = 0;

    while pos < value.len() {
        if value[pos] == b'%' {
            let hi = *value.get(pos + 1).ok_or(TrackerError::InvalidUrlEncoding)?;
            let lo = *value.get(pos + 2).ok_or(TrackerError::InvalidUrlEncoding)?;
            out.push(hex_decode_byte(hi, lo)?);
            pos += 3;
        } else {
            out.push(value[pos]);
            pos += 1;
        }
    }

    Ok(out)
}

fn hex_decode_byte(hi: u8, lo: u8) -> Result<u8, TrackerError> {
    let hi = hex_nibble(hi)?;
    let lo = hex_nibble(lo)?;

    Ok((hi << 4) | lo)
}

fn hex_nibble(c: u8) -> Result<u8, TrackerError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 0xA),
        b'A'..=b'F' => Ok(c - b'A' + 0xA),
        _ => Err(TrackerError::InvalidUrlEncoding),
    }
}
