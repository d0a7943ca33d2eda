use super::ids::PeerId;
use crate::error::TrackerError;

/// A single swarm member, as tracked for one (torrent, peer_id) pair.
#[derive(Clone, Debug)]
pub struct Peer {
    pub user_id: u32,
    pub peer_id: PeerId,
    pub user_agent: String,
    pub ip: String,
    pub port: u16,
    pub ip_port: [u8; 6],
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub first_announced: i64,
    pub last_announced: i64,
    pub announces: u32,
}

/// Parses a dotted-quad IPv4 string and a port into the 6-byte compact
/// peer blob (BEP-23): 4 octets big-endian followed by the port split
/// high-byte then low-byte.
///
/// Mirrors the byte-by-byte accumulation in the original, which rejects
/// any non-digit, non-dot character rather than delegating to a general
/// IPv4 parser, so malformed `ip`/`ipv4` overrides surface as the same
/// "bad IP characters" error the original produces.
pub fn compute_ip_port(ip: &str, port: u16) -> Result<[u8; 6], TrackerError> {
    let mut octets: Vec<u8> = Vec::with_capacity(4);
    let mut acc: u32 = 0;

    for c in ip.chars() {
        if c == '.' {
            octets.push(u8::try_from(acc).map_err(|_| TrackerError::BadIpLength)?);
            acc = 0;
        } else if c.is_ascii_digit() {
            acc = acc * 10 + (c as u32 - '0' as u32);
        } else {
            return Err(TrackerError::BadIpCharacters);
        }
    }
    octets.push(u8::try_from(acc).map_err(|_| TrackerError::BadIpLength)?);

    if octets.len() != 4 {
        return Err(TrackerError::BadIpLength);
    }

    Ok([
        octets[0],
        octets[1],
        octets[2],
        octets[3],
        (port >> 8) as u8,
        (port & 0xFF) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_dotted_quad() {
        let blob = compute_ip_port("192.168.1.2", 6881).unwrap();
        assert_eq!(blob, [192, 168, 1, 2, 0x1A, 0xE1]);
    }

    #[test]
    fn rejects_bad_characters() {
        assert_eq!(
            compute_ip_port("192.168.x.2", 80),
            Err(TrackerError::BadIpCharacters)
        );
    }

    #[test]
    fn rejects_bad_length() {
        assert_eq!(
            compute_ip_port("192.168.1", 80),
            Err(TrackerError::BadIpLength)
        );
        assert_eq!(
            compute_ip_port("1.2.3.4.5", 80),
            Err(TrackerError::BadIpLength)
        );
    }

    #[test]
    fn rejects_octet_overflow() {
        assert_eq!(
            compute_ip_port("256.1.1.1", 80),
            Err(TrackerError::BadIpLength)
        );
    }
}
