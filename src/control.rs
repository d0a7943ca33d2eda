use std::collections::HashMap;

use crate::error::TrackerError;
use crate::state::ids::percent_decode;
use crate::state::torrent::{FreeTorrent, TokenSlot, Torrent};
use crate::state::user::User;
use crate::state::InfoHash;
use crate::tracker::Tracker;

const SUCCESS: &[u8] = b"success";

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, TrackerError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or(TrackerError::MissingParameter)
}

fn parse_param<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str) -> Result<T, TrackerError> {
    param(params, key)?
        .parse()
        .map_err(|_| TrackerError::InvalidParameterValue)
}

fn decode_hash(params: &HashMap<String, String>, key: &str) -> Result<InfoHash, TrackerError> {
    let raw = param(params, key)?;
    let bytes = percent_decode(raw.as_bytes())?;
    let array: [u8; 20] = bytes.try_into().map_err(|_| TrackerError::InvalidParameterValue)?;
    Ok(InfoHash(array))
}

fn parse_freetorrent(flag: &str) -> FreeTorrent {
    FreeTorrent::from_flag(flag)
}

/// Runs a control-plane action, authorized by the passkey in the URL
/// matching the configured admin secret. Every successful action returns
/// the literal string `success`; anything else is a bencoded failure.
pub fn update(tracker: &Tracker, passkey: &str, params: &HashMap<String, String>) -> Result<Vec<u8>, TrackerError> {
    if passkey != tracker.config.site_password {
        return Err(TrackerError::AuthenticationFailure);
    }

    let action = param(params, "action")?;

    match action {
        "site_option" => {
            if param(params, "set")? == "freeleech" {
                let time: i64 = parse_param(params, "time")?;
                tracker.state.site_options.write().freeleech_until = time;
            }
        }
        "change_passkey" => {
            let old_passkey = param(params, "oldpasskey")?;
            let new_passkey = param(params, "newpasskey")?;
            let mut users = tracker.state.users.write();
            if let Some(user) = users.remove(old_passkey) {
                tracing::info!(
                    "Changed passkey from {old_passkey} to {new_passkey} for user {}.",
                    user.id
                );
                users.insert(new_passkey.to_string(), user);
            } else {
                tracing::warn!("No user with passkey {old_passkey} exists.");
            }
        }
        "add_torrent" => {
            let id: u32 = parse_param(params, "id")?;
            let info_hash = decode_hash(params, "info_hash")?;
            let free_torrent = parse_freetorrent(param(params, "freetorrent").unwrap_or(""));
            let torrent = Torrent::new(id, free_torrent, false, 0);
            tracker.state.torrents.lock().insert(info_hash, torrent);
        }
        "update_torrent" => {
            let info_hash = decode_hash(params, "info_hash")?;
            let free_torrent = parse_freetorrent(param(params, "freetorrent").unwrap_or(""));
            if let Some(torrent) = tracker.state.torrents.lock().get_mut(&info_hash) {
                torrent.free_torrent = free_torrent;
            } else {
                tracing::warn!("Failed to find torrent {info_hash:?} to update freetorrent flag.");
            }
        }
        "update_torrents" => {
            let raw = param(params, "info_hashes")?;
            let bytes = percent_decode(raw.as_bytes())?;
            if bytes.len() % 20 != 0 {
                return Err(TrackerError::InvalidParameterValue);
            }
            let free_torrent = parse_freetorrent(param(params, "freetorrent").unwrap_or(""));
            let mut torrents = tracker.state.torrents.lock();
            for chunk in bytes.chunks_exact(20) {
                let mut array = [0u8; 20];
                array.copy_from_slice(chunk);
                if let Some(torrent) = torrents.get_mut(&InfoHash(array)) {
                    torrent.free_torrent = free_torrent;
                }
            }
        }
        "add_token_fl" | "add_token_ds" => {
            let user_id: u32 = parse_param(params, "userid")?;
            let info_hash = decode_hash(params, "info_hash")?;
            let expiry: i64 = parse_param(params, "time")?;
            let mut torrents = tracker.state.torrents.lock();
            if let Some(torrent) = torrents.get_mut(&info_hash) {
                let slot = torrent.tokened_users.entry(user_id).or_default();
                if action == "add_token_fl" {
                    slot.free_leech = expiry;
                } else {
                    slot.double_seed = expiry;
                }
            }
        }
        "remove_tokens" => {
            let user_id: u32 = parse_param(params, "userid")?;
            let info_hash = decode_hash(params, "info_hash")?;
            if let Some(torrent) = tracker.state.torrents.lock().get_mut(&info_hash) {
                torrent.tokened_users.remove(&user_id);
            }
        }
        "delete_torrent" => {
            let info_hash = decode_hash(params, "info_hash")?;
            tracker.state.torrents.lock().shift_remove(&info_hash);
        }
        "add_user" => {
            let passkey = param(params, "passkey")?;
            if passkey.len() != 32 {
                return Err(TrackerError::InvalidParameterValue);
            }
            let id: u32 = parse_param(params, "id")?;
            let can_leech = param(params, "can_leech").unwrap_or("1") != "0";
            tracker.state.users.write().insert(
                passkey.to_string(),
                User {
                    id,
                    can_leech,
                    personal_freeleech_until: 0,
                    permission_id: 0,
                },
            );
        }
        "remove_user" => {
            let passkey = param(params, "passkey")?;
            tracker.state.users.write().remove(passkey);
        }
        "remove_users" => {
            let raw = param(params, "passkeys")?;
            if raw.len() % 32 != 0 {
                return Err(TrackerError::InvalidParameterValue);
            }
            let mut users = tracker.state.users.write();
            for pos in (0..raw.len()).step_by(32) {
                users.remove(&raw[pos..pos + 32]);
            }
        }
        "update_user" => {
            let passkey = param(params, "passkey")?;
            let can_leech = param(params, "can_leech")? != "0";
            if let Some(user) = tracker.state.users.write().get_mut(passkey) {
                user.can_leech = can_leech;
            }
        }
        "set_personal_freeleech" => {
            let passkey = param(params, "passkey")?;
            let time: i64 = parse_param(params, "time")?;
            if let Some(user) = tracker.state.users.write().get_mut(passkey) {
                user.personal_freeleech_until = time;
            }
        }
        "set_permissionid" => {
            let passkey = param(params, "passkey")?;
            let permission_id: i32 = parse_param(params, "permissionid")?;
            if let Some(user) = tracker.state.users.write().get_mut(passkey) {
                user.permission_id = permission_id;
            }
        }
        "add_blacklist" => {
            let raw = param(params, "peer_id")?;
            let prefix = percent_decode(raw.as_bytes())?;
            tracker.state.blacklist.write().push(prefix);
        }
        "remove_blacklist" => {
            let raw = param(params, "peer_id")?;
            let prefix = percent_decode(raw.as_bytes())?;
            tracker.state.blacklist.write().retain(|p| p != &prefix);
        }
        "edit_blacklist" => {
            let old_raw = param(params, "oldpeer_id")?;
            let new_raw = param(params, "newpeer_id")?;
            let old_prefix = percent_decode(old_raw.as_bytes())?;
            let new_prefix = percent_decode(new_raw.as_bytes())?;
            let mut blacklist = tracker.state.blacklist.write();
            if let Some(entry) = blacklist.iter_mut().find(|p| **p == old_prefix) {
                *entry = new_prefix;
            }
        }
        "update_announce_interval" => {
            let interval: u32 = parse_param(params, "interval")?;
            tracker.set_announce_interval(interval);
        }
        "info_torrent" => {
            // Diagnostic no-op: kept for admin-panel compatibility.
        }
        _ => return Err(TrackerError::InvalidParameterValue),
    }

    Ok(SUCCESS.to_vec())
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

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn rejects_wrong_passkey() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let p = params(&[("action", "info_torrent")]);
        let err = update(&tracker, "wrong", &p).unwrap_err();
        assert_eq!(err, TrackerError::AuthenticationFailure);
    }

    #[test]
    fn add_torrent_then_update_torrent_sets_freetorrent() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let hash = "a".repeat(20);

        let add = params(&[
            ("action", "add_torrent"),
            ("id", "7"),
            ("info_hash", &hash),
            ("freetorrent", "0"),
        ]);
        update(&tracker, "secret", &add).unwrap();
        assert_eq!(
            tracker.state.torrents.lock().get(&InfoHash([b'a'; 20])).unwrap().free_torrent,
            FreeTorrent::Normal
        );

        let set_free = params(&[
            ("action", "update_torrent"),
            ("info_hash", &hash),
            ("freetorrent", "1"),
        ]);
        update(&tracker, "secret", &set_free).unwrap();
        assert_eq!(
            tracker.state.torrents.lock().get(&InfoHash([b'a'; 20])).unwrap().free_torrent,
            FreeTorrent::Free
        );
    }

    #[test]
    fn add_token_fl_upserts_a_token_slot() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let hash = "b".repeat(20);
        tracker
            .state
            .torrents
            .lock()
            .insert(InfoHash([b'b'; 20]), Torrent::new(1, FreeTorrent::Normal, false, 0));

        let p = params(&[
            ("action", "add_token_fl"),
            ("userid", "42"),
            ("info_hash", &hash),
            ("time", "999999999"),
        ]);
        update(&tracker, "secret", &p).unwrap();

        let torrents = tracker.state.torrents.lock();
        let slot = torrents.get(&InfoHash([b'b'; 20])).unwrap().tokened_users.get(&42).unwrap();
        assert_eq!(slot.free_leech, 999999999);
        assert_eq!(slot.double_seed, 0);
    }

    #[test]
    fn unknown_action_is_invalid_parameter() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let p = params(&[("action", "not_a_real_action")]);
        let err = update(&tracker, "secret", &p).unwrap_err();
        assert_eq!(err, TrackerError::InvalidParameterValue);
    }

    #[test]
    fn update_announce_interval_changes_the_live_value() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let p = params(&[("action", "update_announce_interval"), ("interval", "900")]);
        update(&tracker, "secret", &p).unwrap();
        assert_eq!(tracker.announce_interval(), 900);
    }

    #[test]
    fn remove_users_chunks_fixed_width_passkeys_without_a_separator() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let first = "a".repeat(32);
        let second = "b".repeat(32);
        {
            let mut users = tracker.state.users.write();
            users.insert(
                first.clone(),
                User { id: 1, can_leech: true, personal_freeleech_until: 0, permission_id: 0 },
            );
            users.insert(
                second.clone(),
                User { id: 2, can_leech: true, personal_freeleech_until: 0, permission_id: 0 },
            );
        }

        let concatenated = format!("{first}{second}");
        let p = params(&[("action", "remove_users"), ("passkeys", &concatenated)]);
        update(&tracker, "secret", &p).unwrap();

        let users = tracker.state.users.read();
        assert!(users.get(&first).is_none());
        assert!(users.get(&second).is_none());
    }

    #[test]
    fn remove_users_rejects_a_length_not_a_multiple_of_32() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let p = params(&[("action", "remove_users"), ("passkeys", "short")]);
        let err = update(&tracker, "secret", &p).unwrap_err();
        assert_eq!(err, TrackerError::InvalidParameterValue);
    }

    #[test]
    fn add_torrent_without_freetorrent_param_defaults_to_neutral() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let hash = "c".repeat(20);
        let p = params(&[("action", "add_torrent"), ("id", "9"), ("info_hash", &hash)]);
        update(&tracker, "secret", &p).unwrap();
        assert_eq!(
            tracker.state.torrents.lock().get(&InfoHash([b'c'; 20])).unwrap().free_torrent,
            FreeTorrent::Neutral
        );
    }
}
