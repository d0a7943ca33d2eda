use crate::state::{InfoHash, State};

/// Builds a multi-info-hash scrape response. Unknown hashes are silently
/// skipped rather than erroring, since scrape is a read-only diagnostic
/// and a stale/mistyped hash shouldn't fail the whole batch.
pub fn scrape(state: &State, info_hashes: &[[u8; 20]]) -> Vec<u8> {
    let torrents = state.torrents.lock();

    let mut out = Vec::with_capacity(32 + info_hashes.len() * 64);
    out.extend_from_slice(b"d5:filesd");

    for hash in info_hashes {
        let Some(torrent) = torrents.get(&InfoHash(*hash)) else {
            continue;
        };

        out.extend_from_slice(b"20:");
        out.extend_from_slice(hash);
        out.extend_from_slice(b"d8:completei");
        out.extend_from_slice(torrent.seeders.len().to_string().as_bytes());
        out.extend_from_slice(b"e10:downloadedi");
        out.extend_from_slice(torrent.completed.to_string().as_bytes());
        out.extend_from_slice(b"e10:incompletei");
        out.extend_from_slice(torrent.leechers.len().to_string().as_bytes());
        out.extend_from_slice(b"ee");
    }

    out.extend_from_slice(b"ee");
    out
}
