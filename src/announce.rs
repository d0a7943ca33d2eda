use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::TrackerError;
use crate::state::ids::percent_decode_20;
use crate::state::peer::compute_ip_port;
use crate::state::torrent::{FreeTorrent, Torrent};
use crate::state::user::User;
use crate::state::{ids::PeerId, peer::Peer};
use crate::tracker::Tracker;
use crate::utils::{now, sql_quote};

const MAX_BYTES: i64 = 999_999_999_999_999;
const PERSONAL_FREELEECH_PERMISSION_ID: i32 = 20;

fn parse_i64(params: &HashMap<String, String>, key: &str) -> i64 {
    params.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn parse_u16(params: &HashMap<String, String>, key: &str) -> u16 {
    params.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn empty_peer() -> Peer {
    Peer {
        user_id: 0,
        peer_id: PeerId([0u8; 20]),
        user_agent: String::new(),
        ip: String::new(),
        port: 0,
        ip_port: [0u8; 6],
        uploaded: 0,
        downloaded: 0,
        left: 0,
        first_announced: 0,
        last_announced: 0,
        announces: 0,
    }
}

/// Runs a single announce against an already-located torrent and user.
/// Caller must hold the torrent-table lock around this call and around
/// the lookup that produced `torrent` (mirrors `torrent_list_mutex`
/// scoping the whole `worker::announce` call in the original).
pub fn announce(
    tracker: &Tracker,
    torrent: &mut Torrent,
    user: &User,
    params: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    client_ip: &str,
) -> Result<Vec<u8>, TrackerError> {
    let cur_time = now();

    if params.get("compact").map(String::as_str) != Some("1") {
        return Err(TrackerError::CompactNotSupported);
    }

    let left = parse_i64(params, "left");
    let mut uploaded = parse_i64(params, "uploaded").max(0);
    let mut downloaded = parse_i64(params, "downloaded").max(0);

    let peer_id_raw = params.get("peer_id").ok_or(TrackerError::MissingPeerId)?;
    let peer_id = PeerId(percent_decode_20(peer_id_raw.as_bytes())?);

    {
        let blacklist = tracker.state.blacklist.read();
        if blacklist.iter().any(|prefix| peer_id.starts_with(prefix)) {
            return Err(TrackerError::ClientBlacklisted);
        }
    }

    let event = params.get("event").map(String::as_str).unwrap_or("");
    let is_leecher = left > 0 || event == "completed";

    if is_leecher && !user.can_leech {
        return Err(TrackerError::LeechingForbidden);
    }

    if !is_leecher {
        torrent.last_seeded = cur_time;
    }

    let target_map: &mut IndexMap<PeerId, Peer> = if is_leecher {
        &mut torrent.leechers
    } else {
        &mut torrent.seeders
    };

    let inserted = !target_map.contains_key(&peer_id);
    let (prev_uploaded, prev_downloaded, prev_last_announced) = target_map
        .get(&peer_id)
        .map(|p| (p.uploaded as i64, p.downloaded as i64, p.last_announced))
        .unwrap_or((0, 0, 0));

    let peer = target_map.entry(peer_id).or_insert_with(empty_peer);
    peer.left = left.max(0) as u64;

    let mut upspeed: i64 = 0;
    let mut downspeed: i64 = 0;
    let mut real_uploaded_change: i64 = 0;
    let mut real_downloaded_change: i64 = 0;
    let mut update_torrent = false;

    let fresh_epoch =
        inserted || event == "started" || uploaded < prev_uploaded || downloaded < prev_downloaded;

    if fresh_epoch {
        update_torrent = true;
        peer.user_id = user.id;
        peer.peer_id = peer_id;
        peer.user_agent = headers.get("user-agent").cloned().unwrap_or_default();
        peer.first_announced = cur_time;
        peer.last_announced = 0;
        uploaded = uploaded.min(MAX_BYTES);
        downloaded = downloaded.min(MAX_BYTES);
        peer.uploaded = uploaded as u64;
        peer.downloaded = downloaded as u64;
        peer.announces = 1;
    } else {
        peer.announces += 1;

        let mut uploaded_change: i64 = 0;
        let mut downloaded_change: i64 = 0;

        if uploaded != prev_uploaded {
            uploaded_change = (uploaded - prev_uploaded).min(MAX_BYTES);
            real_uploaded_change = uploaded_change;
            peer.uploaded = uploaded as u64;
        }
        if downloaded != prev_downloaded {
            downloaded_change = (downloaded - prev_downloaded).min(MAX_BYTES);
            real_downloaded_change = downloaded_change;
            peer.downloaded = downloaded as u64;
        }

        if uploaded_change != 0 || downloaded_change != 0 {
            let corrupt = parse_i64(params, "corrupt");
            torrent.balance += uploaded_change;
            torrent.balance -= downloaded_change;
            torrent.balance -= corrupt;
            update_torrent = true;

            if cur_time > prev_last_announced && prev_last_announced != 0 {
                let elapsed = cur_time - prev_last_announced;
                upspeed = uploaded_change / elapsed;
                downspeed = downloaded_change / elapsed;
            }

            let token = torrent.tokened_users.get(&user.id).copied();

            if token.is_some() {
                let record = format!(
                    "({},{},{},{})",
                    user.id, torrent.id, downloaded_change, uploaded_change
                );
                tracker.buffers.tokens.record(&record);
            }

            // Policy algebra, applied in order.
            if torrent.free_torrent == FreeTorrent::Neutral {
                downloaded_change = 0;
                uploaded_change = 0;
            } else if torrent.free_torrent == FreeTorrent::Free
                || tracker.state.site_options.read().freeleech_until >= cur_time
                || token.is_some_and(|t| t.free_leech >= cur_time)
                || user.personal_freeleech_until >= cur_time
                || user.permission_id == PERSONAL_FREELEECH_PERMISSION_ID
            {
                downloaded_change = 0;
            }

            if torrent.double_seed || token.is_some_and(|t| t.double_seed >= cur_time) {
                uploaded_change = uploaded_change.min(MAX_BYTES) * 2;
            }

            if uploaded_change != 0
                || downloaded_change != 0
                || real_uploaded_change != 0
                || real_downloaded_change != 0
            {
                let record = format!(
                    "({},{},{},{},{})",
                    user.id, uploaded_change, downloaded_change, real_uploaded_change, real_downloaded_change
                );
                tracker.buffers.users.record(&record);
            }
        }
    }

    let peer_id_for_events = peer_id;
    peer.last_announced = cur_time;

    let ip = params
        .get("ip")
        .or_else(|| params.get("ipv4"))
        .map(String::as_str)
        .unwrap_or(client_ip)
        .to_string();

    let port = parse_u16(params, "port");

    if inserted || port != peer.port || ip != peer.ip {
        let ip_port = compute_ip_port(&ip, port)?;
        peer.port = port;
        peer.ip = ip.clone();
        peer.ip_port = ip_port;
    }

    let requester_ip_port = peer.ip_port;
    // Snapshot the peer's final announce-time fields before any event
    // handling below removes or relocates it: the record emitted further
    // down always reflects this announce, even for a "stopped" event that
    // erases the map entry.
    let final_peer = peer.clone();

    let mut snatched_delta = 0u32;
    let mut active = 1u8;
    let mut numwant = params
        .get("numwant")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(tracker.config.numwant_default)
        .min(tracker.config.numwant_max);

    match event {
        "stopped" => {
            update_torrent = true;
            active = 0;
            numwant = 0;

            let target_map: &mut IndexMap<PeerId, Peer> = if is_leecher {
                &mut torrent.leechers
            } else {
                &mut torrent.seeders
            };
            if target_map.swap_remove(&peer_id_for_events).is_none() {
                tracing::warn!(
                    "Tried and failed to remove peer from torrent {} on stop.",
                    torrent.id
                );
            }
        }
        "completed" => {
            snatched_delta = 1;
            update_torrent = true;
            torrent.completed += 1;

            let record = format!("({},{},{},{})", user.id, torrent.id, cur_time, sql_quote(&ip));
            tracker.buffers.snatches.record(&record);

            if torrent.leechers.swap_remove(&peer_id_for_events).is_some() {
                torrent.seeders.insert(peer_id_for_events, final_peer.clone());
            }
        }
        _ => {}
    }

    let mut peers_blob = Vec::new();
    if numwant > 0 {
        if left > 0 {
            for blob in torrent.select_seeders(numwant) {
                peers_blob.extend_from_slice(&blob);
            }
            let found = peers_blob.len() / 6;
            if found < numwant && torrent.leechers.len() > 1 {
                for blob in torrent.select_leechers(numwant - found, Some(requester_ip_port)) {
                    peers_blob.extend_from_slice(&blob);
                }
            }
        } else if !torrent.leechers.is_empty() {
            for blob in torrent.select_leechers(numwant, None) {
                peers_blob.extend_from_slice(&blob);
            }
        }
    }

    if update_torrent || torrent.last_flushed + 3600 < cur_time {
        torrent.last_flushed = cur_time;
        let record = format!(
            "({},{},{},{},{})",
            torrent.id,
            torrent.seeders.len(),
            torrent.leechers.len(),
            snatched_delta,
            torrent.balance
        );
        tracker.buffers.torrents.record(&record);
    }

    let peer_record = format!(
        "({},{},{},{},{},{},{},{},{},{},",
        user.id,
        torrent.id,
        active,
        final_peer.uploaded,
        final_peer.downloaded,
        upspeed,
        downspeed,
        left,
        cur_time - final_peer.first_announced,
        final_peer.announces,
    );
    let peer_record = format!(
        "{peer_record}{},{port},{},{},{cur_time})",
        sql_quote(&ip),
        sql_quote(&String::from_utf8_lossy(peer_id_for_events.as_bytes())),
        sql_quote(&final_peer.user_agent),
    );
    tracker.buffers.peers.record(&peer_record);

    if upspeed as u64 >= tracker.config.keep_speed {
        let hist_record = format!(
            "({},{},{},{},{},{},{},",
            user.id,
            real_downloaded_change,
            left,
            real_uploaded_change,
            upspeed,
            downspeed,
            cur_time - final_peer.first_announced,
        );
        let hist_record = format!(
            "{hist_record}{},{},{},{cur_time})",
            sql_quote(&String::from_utf8_lossy(peer_id_for_events.as_bytes())),
            sql_quote(&ip),
            torrent.id,
        );
        tracker.buffers.peer_history.record(&hist_record);
    }

    Ok(encode_response(torrent, &peers_blob, tracker.announce_interval()))
}

fn encode_response(torrent: &Torrent, peers_blob: &[u8], announce_interval: u32) -> Vec<u8> {
    let interval = announce_interval as u64 + (torrent.seeders.len() as u64).min(600);

    let mut out = Vec::with_capacity(64 + peers_blob.len());
    out.extend_from_slice(b"d8:completei");
    out.extend_from_slice(torrent.seeders.len().to_string().as_bytes());
    out.extend_from_slice(b"e10:downloadedi");
    out.extend_from_slice(torrent.completed.to_string().as_bytes());
    out.extend_from_slice(b"e10:incompletei");
    out.extend_from_slice(torrent.leechers.len().to_string().as_bytes());
    out.extend_from_slice(b"e8:intervali");
    out.extend_from_slice(interval.to_string().as_bytes());
    out.extend_from_slice(b"e12:min intervali");
    out.extend_from_slice(announce_interval.to_string().as_bytes());
    out.extend_from_slice(b"e5:peers");
    out.extend_from_slice(peers_blob.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(peers_blob);
    out.push(b'e');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::State;

    fn test_config() -> Config {
        Config {
            listen_addr: "127.0.0.1:0".to_string(),
            database_url: "mysql://localhost/test".to_string(),
            site_password: "secret".to_string(),
            peers_timeout: 3_600,
            reap_interval: 1_800,
            flush_interval: 3,
            numwant_default: 50,
            numwant_max: 50,
            announce_interval: 1_800,
            keep_speed: 1_024,
            max_bytes_transferred: 999_999_999_999_999,
        }
    }

    fn test_user() -> User {
        User {
            id: 1,
            can_leech: true,
            personal_freeleech_until: 0,
            permission_id: 0,
        }
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn peer_id_str(byte: u8) -> String {
        let mut raw = [b'p'; 20];
        raw[0] = byte;
        String::from_utf8_lossy(&raw).into_owned()
    }

    #[test]
    fn fresh_announce_inserts_leecher_and_emits_no_user_record() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let mut torrent = Torrent::new(1, FreeTorrent::Normal, false, 0);
        let user = test_user();
        let peer_id = peer_id_str(1);

        let p = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "0"),
            ("downloaded", "0"),
            ("left", "1000"),
        ]);

        let response = announce(&tracker, &mut torrent, &user, &p, &HashMap::new(), "127.0.0.1").unwrap();
        let text = String::from_utf8_lossy(&response);

        assert!(text.starts_with("d8:completei0e10:downloadedi0e10:incompletei1e"));
        assert!(text.contains("5:peers0:"));
        assert_eq!(torrent.leechers.len(), 1);
        assert!(tracker.buffers.users.is_empty());
    }

    #[test]
    fn delta_announce_without_freeleech_emits_user_record_and_updates_balance() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let mut torrent = Torrent::new(1, FreeTorrent::Normal, false, 0);
        let user = test_user();
        let peer_id = peer_id_str(1);

        let first = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "0"),
            ("downloaded", "0"),
            ("left", "1000"),
        ]);
        announce(&tracker, &mut torrent, &user, &first, &HashMap::new(), "127.0.0.1").unwrap();

        let second = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "2000"),
            ("downloaded", "500"),
            ("left", "500"),
        ]);
        announce(&tracker, &mut torrent, &user, &second, &HashMap::new(), "127.0.0.1").unwrap();

        assert_eq!(torrent.balance, 1500);
        assert!(!tracker.buffers.users.is_empty());
    }

    #[test]
    fn neutral_torrent_zeroes_both_deltas() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let mut torrent = Torrent::new(1, FreeTorrent::Neutral, false, 0);
        let user = test_user();
        let peer_id = peer_id_str(1);

        let first = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "0"),
            ("downloaded", "0"),
            ("left", "1000"),
        ]);
        announce(&tracker, &mut torrent, &user, &first, &HashMap::new(), "127.0.0.1").unwrap();

        let second = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "2000"),
            ("downloaded", "500"),
            ("left", "500"),
        ]);
        announce(&tracker, &mut torrent, &user, &second, &HashMap::new(), "127.0.0.1").unwrap();

        assert_eq!(torrent.balance, 0);
        assert!(tracker.buffers.users.is_empty());
    }

    #[test]
    fn stopped_event_removes_peer_from_its_map() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let mut torrent = Torrent::new(1, FreeTorrent::Normal, false, 0);
        let user = test_user();
        let peer_id = peer_id_str(1);

        let start = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "0"),
            ("downloaded", "0"),
            ("left", "1000"),
        ]);
        announce(&tracker, &mut torrent, &user, &start, &HashMap::new(), "127.0.0.1").unwrap();
        assert_eq!(torrent.leechers.len(), 1);

        let stop = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "0"),
            ("downloaded", "0"),
            ("left", "1000"),
            ("event", "stopped"),
        ]);
        let response = announce(&tracker, &mut torrent, &user, &stop, &HashMap::new(), "127.0.0.1").unwrap();

        assert!(torrent.leechers.is_empty());
        assert!(String::from_utf8_lossy(&response).contains("5:peers0:"));
    }

    #[test]
    fn completed_event_moves_leecher_to_seeder_and_emits_snatch() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let mut torrent = Torrent::new(1, FreeTorrent::Normal, false, 0);
        let user = test_user();
        let peer_id = peer_id_str(1);

        let start = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "0"),
            ("downloaded", "0"),
            ("left", "1000"),
        ]);
        announce(&tracker, &mut torrent, &user, &start, &HashMap::new(), "127.0.0.1").unwrap();

        let complete = params(&[
            ("compact", "1"),
            ("peer_id", &peer_id),
            ("port", "6881"),
            ("uploaded", "0"),
            ("downloaded", "0"),
            ("left", "0"),
            ("event", "completed"),
        ]);
        announce(&tracker, &mut torrent, &user, &complete, &HashMap::new(), "127.0.0.1").unwrap();

        assert!(torrent.leechers.is_empty());
        assert_eq!(torrent.seeders.len(), 1);
        assert_eq!(torrent.completed, 1);
        assert!(!tracker.buffers.snatches.is_empty());
    }

    #[test]
    fn rejects_requests_missing_compact() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let mut torrent = Torrent::new(1, FreeTorrent::Normal, false, 0);
        let user = test_user();

        let p = params(&[("peer_id", &peer_id_str(1)), ("left", "1000")]);
        let err = announce(&tracker, &mut torrent, &user, &p, &HashMap::new(), "127.0.0.1").unwrap_err();
        assert_eq!(err, TrackerError::CompactNotSupported);
    }
}
