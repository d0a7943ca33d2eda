use anyhow::{Context, Result};
use sqlx::{MySqlPool, Row};

use crate::state::torrent::FreeTorrent;
use crate::state::{InfoHash, State, Torrent, TokenSlot, User};

/// Runs the initial-load queries (C3) that seed the in-memory state from
/// the authoritative store. Torrents and users are loaded with empty
/// peer maps; this tracker does not persist peers of its own, so a
/// restart always starts with empty swarms (clients re-announce quickly).
pub async fn load(pool: &MySqlPool) -> Result<State> {
    let state = State::new();

    tracing::info!("Loading site options...");
    let freeleech_until: i64 = sqlx::query("SELECT FreeLeech FROM site_options LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed loading site options.")?
        .map(|row| row.try_get::<i64, _>("FreeLeech").unwrap_or(0))
        .unwrap_or(0);
    state.site_options.write().freeleech_until = freeleech_until;

    tracing::info!("Loading torrents...");
    let torrent_rows = sqlx::query(
        "SELECT ID, info_hash, freetorrent, double_seed, Snatched FROM torrents ORDER BY ID",
    )
    .fetch_all(pool)
    .await
    .context("Failed loading torrents.")?;

    {
        let mut torrents = state.torrents.lock();
        for row in &torrent_rows {
            let id: u32 = row.try_get("ID")?;
            let info_hash_bytes: Vec<u8> = row.try_get("info_hash")?;
            let freetorrent_flag: String = row
                .try_get::<i64, _>("freetorrent")
                .map(|v| v.to_string())
                .unwrap_or_else(|_| "0".to_string());
            let double_seed: bool = row.try_get::<i64, _>("double_seed").unwrap_or(0) != 0;
            let completed: u32 = row.try_get("Snatched")?;

            let info_hash = InfoHash::from(to_array20(&info_hash_bytes)?);
            let torrent = Torrent::new(
                id,
                FreeTorrent::from_flag(&freetorrent_flag),
                double_seed,
                completed,
            );
            torrents.insert(info_hash, torrent);
        }
    }
    tracing::info!("Loaded {} torrents.", torrent_rows.len());

    tracing::info!("Loading users...");
    let user_rows = sqlx::query(
        "SELECT ID, can_leech, torrent_pass, personal_freeleech, PermissionID \
         FROM users_main WHERE Enabled = '1'",
    )
    .fetch_all(pool)
    .await
    .context("Failed loading users.")?;

    {
        let mut users = state.users.write();
        for row in &user_rows {
            let id: u32 = row.try_get("ID")?;
            let can_leech: bool = row.try_get::<i64, _>("can_leech").unwrap_or(1) != 0;
            let passkey: String = row.try_get("torrent_pass")?;
            let personal_freeleech_until: i64 =
                row.try_get::<i64, _>("personal_freeleech").unwrap_or(0);
            let permission_id: i32 = row.try_get("PermissionID").unwrap_or(0);

            users.insert(
                passkey,
                User {
                    id,
                    can_leech,
                    personal_freeleech_until,
                    permission_id,
                },
            );
        }
    }
    tracing::info!("Loaded {} users.", user_rows.len());

    tracing::info!("Loading tokens...");
    let token_rows = sqlx::query(
        "SELECT us.UserID, us.FreeLeech, us.DoubleSeed, t.info_hash \
         FROM users_slots AS us JOIN torrents AS t ON t.ID = us.TorrentID",
    )
    .fetch_all(pool)
    .await
    .context("Failed loading tokens.")?;

    {
        let mut torrents = state.torrents.lock();
        for row in &token_rows {
            let user_id: u32 = row.try_get("UserID")?;
            let free_leech: i64 = row.try_get("FreeLeech").unwrap_or(0);
            let double_seed: i64 = row.try_get("DoubleSeed").unwrap_or(0);
            let info_hash_bytes: Vec<u8> = row.try_get("info_hash")?;
            let info_hash = InfoHash::from(to_array20(&info_hash_bytes)?);

            if let Some(torrent) = torrents.get_mut(&info_hash) {
                torrent.tokened_users.insert(
                    user_id,
                    TokenSlot {
                        free_leech,
                        double_seed,
                    },
                );
            }
        }
    }
    tracing::info!("Loaded {} tokens.", token_rows.len());

    tracing::info!("Loading blacklist...");
    let blacklist_rows = sqlx::query("SELECT peer_id FROM xbt_client_blacklist")
        .fetch_all(pool)
        .await
        .context("Failed loading blacklist.")?;

    {
        let mut blacklist = state.blacklist.write();
        for row in &blacklist_rows {
            let prefix: Vec<u8> = row.try_get("peer_id")?;
            blacklist.push(prefix);
        }
    }
    tracing::info!("Loaded {} blacklisted peer-id prefixes.", blacklist_rows.len());

    Ok(state)
}

fn to_array20(bytes: &[u8]) -> Result<[u8; 20]> {
    if bytes.len() != 20 {
        anyhow::bail!("Expected a 20-byte info-hash, got {} bytes.", bytes.len());
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(bytes);
    Ok(out)
}
