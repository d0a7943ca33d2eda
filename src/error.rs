use thiserror::Error;

/// Every user-facing failure the tracker can return. Each variant's
/// [`Display`] implementation is the exact reason string bencoded back to
/// the client (`d14:failure reason<len>:<msg>e`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerError {
    #[error("GET string too short")]
    RequestTooShort,
    #[error("Malformed announce")]
    MalformedRequest,
    #[error("invalid action")]
    InvalidAction,
    #[error("The tracker is temporarily unavailable.")]
    TrackerUnavailable,
    #[error("passkey not found")]
    PasskeyNotFound,
    #[error("unregistered torrent")]
    TorrentNotFound,
    #[error("Your client does not support compact announces")]
    CompactNotSupported,
    #[error("no peer id")]
    MissingPeerId,
    #[error("Invalid 'info_hash' or 'peer_id' (must be 20 bytes long).")]
    InvalidInfoHashOrPeerId,
    #[error("Invalid URL encoding.")]
    InvalidUrlEncoding,
    #[error("Your client is blacklisted!")]
    ClientBlacklisted,
    #[error("Access denied, leeching forbidden")]
    LeechingForbidden,
    #[error("Unexpected character in IP address. Only IPv4 is currently supported")]
    BadIpCharacters,
    #[error("Specified IP address is of a bad length")]
    BadIpLength,
    #[error("Authentication failure")]
    AuthenticationFailure,
    #[error("missing required parameter")]
    MissingParameter,
    #[error("invalid parameter value")]
    InvalidParameterValue,
}

impl TrackerError {
    /// Renders the bencoded failure response for this error, as specified
    /// by `worker::error` in the original: `d14:failure reason<len>:<msg>e`.
    pub fn to_bencoded(self) -> Vec<u8> {
        let msg = self.to_string();
        let mut out = Vec::with_capacity(32 + msg.len());
        out.extend_from_slice(b"d14:failure reason");
        out.extend_from_slice(msg.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(msg.as_bytes());
        out.push(b'e');
        out
    }
}
