use std::sync::Arc;
use std::time::Duration;

use sqlx::Connection;

use crate::buffers::RecordKind;
use crate::tracker::Tracker;

const BINLOG_OFF: &str = "SET session sql_log_bin = 0";
const PEER_QUEUE_CAP: usize = 1000;

/// Triggers a flush of every kind, in the order the original does its
/// per-interval sweep: users, torrents, snatches, peers, peer-history,
/// tokens. Each call only enqueues a batch and (at most) spawns one
/// worker per kind; it never blocks on the store.
pub fn flush_all(tracker: &Arc<Tracker>) {
    flush_users(tracker);
    flush_torrents(tracker);
    flush_snatches(tracker);
    flush_peers(tracker);
    flush_peer_history(tracker);
    flush_tokens(tracker);
}

pub fn flush_users(tracker: &Arc<Tracker>) {
    let outcome = tracker.buffers.users.flush_simple(
        "INSERT INTO users_main (ID, Uploaded, Downloaded, UploadedDaily, DownloadedDaily) VALUES ",
        " ON DUPLICATE KEY UPDATE \
         Uploaded = Uploaded + VALUES(Uploaded), \
         Downloaded = Downloaded + VALUES(Downloaded), \
         UploadedDaily = UploadedDaily + VALUES(UploadedDaily), \
         DownloadedDaily = DownloadedDaily + VALUES(DownloadedDaily)",
    );
    spawn_if_needed(tracker, outcome, |t| &t.buffers.users, "users");
}

pub fn flush_torrents(tracker: &Arc<Tracker>) {
    let outcome = tracker.buffers.torrents.flush_with_extra(
        "INSERT INTO torrents (ID, Seeders, Leechers, Snatched, Balance) VALUES ",
        " ON DUPLICATE KEY UPDATE \
         Seeders = VALUES(Seeders), \
         Leechers = VALUES(Leechers), \
         Snatched = Snatched + VALUES(Snatched), \
         Balance = VALUES(Balance), \
         last_action = IF(VALUES(Seeders) > 0, NOW(), last_action)",
        "DELETE FROM torrents WHERE info_hash = ''",
    );
    spawn_if_needed(tracker, outcome, |t| &t.buffers.torrents, "torrents");
}

pub fn flush_snatches(tracker: &Arc<Tracker>) {
    let outcome = tracker
        .buffers
        .snatches
        .flush_simple("INSERT INTO xbt_snatched (uid, fid, tstamp, IP) VALUES ", "");
    spawn_if_needed(tracker, outcome, |t| &t.buffers.snatches, "snatches");
}

pub fn flush_peers(tracker: &Arc<Tracker>) {
    let outcome = tracker.buffers.peers.flush_capped(
        "INSERT INTO xbt_files_users \
         (uid, fid, active, uploaded, downloaded, upspeed, downspeed, remaining, timespent, \
          announced, ip, port, peer_id, useragent, mtime) VALUES ",
        " ON DUPLICATE KEY UPDATE \
         active = VALUES(active), uploaded = VALUES(uploaded), downloaded = VALUES(downloaded), \
         upspeed = VALUES(upspeed), downspeed = VALUES(downspeed), remaining = VALUES(remaining), \
         timespent = VALUES(timespent), announced = VALUES(announced), mtime = VALUES(mtime), \
         port = VALUES(port)",
        PEER_QUEUE_CAP,
        BINLOG_OFF,
    );
    spawn_if_needed(tracker, outcome, |t| &t.buffers.peers, "peers");
}

pub fn flush_peer_history(tracker: &Arc<Tracker>) {
    let outcome = tracker.buffers.peer_history.flush_with_binlog(
        "INSERT IGNORE INTO xbt_peers_history \
         (uid, downloaded, remaining, uploaded, upspeed, downspeed, timespent, peer_id, ip, fid, mtime) VALUES ",
        "",
        BINLOG_OFF,
    );
    spawn_if_needed(tracker, outcome, |t| &t.buffers.peer_history, "peer_history");
}

pub fn flush_tokens(tracker: &Arc<Tracker>) {
    let outcome = tracker.buffers.tokens.flush_simple(
        "INSERT INTO users_freeleeches (UserID, TorrentID, Downloaded, Uploaded) VALUES ",
        " ON DUPLICATE KEY UPDATE \
         Downloaded = Downloaded + VALUES(Downloaded), \
         Uploaded = Uploaded + VALUES(Uploaded)",
    );
    spawn_if_needed(tracker, outcome, |t| &t.buffers.tokens, "tokens");
}

fn spawn_if_needed(
    tracker: &Arc<Tracker>,
    outcome: Option<crate::buffers::FlushOutcome>,
    get_kind: fn(&Tracker) -> &RecordKind,
    name: &'static str,
) {
    if let Some(outcome) = outcome {
        if outcome.should_spawn {
            tokio::spawn(run_worker(tracker.clone(), get_kind, name));
        }
    }
}

/// Opens one dedicated store connection (not pool-shared, so a slow or
/// stuck batch never starves announces of a pool connection) and drains
/// the kind's queue, retrying a failed statement after a 3s sleep rather
/// than skipping or dropping it. Clears the active flag once the queue
/// is empty.
async fn run_worker(tracker: Arc<Tracker>, get_kind: fn(&Tracker) -> &RecordKind, name: &'static str) {
    let mut conn = match sqlx::MySqlConnection::connect(&tracker.config.database_url).await {
        Ok(conn) => conn,
        Err(error) => {
            tracing::error!("Failed to open a dedicated {name} flush connection: {error}");
            get_kind(&tracker).mark_idle();
            return;
        }
    };

    loop {
        let Some(stmt) = get_kind(&tracker).peek_front() else {
            break;
        };

        match sqlx::query(&stmt).execute(&mut conn).await {
            Ok(_) => {
                let remaining = get_kind(&tracker).pop_front();
                tracing::debug!("Flushed a {name} batch ({remaining} statements remaining).");
            }
            Err(error) => {
                tracing::warn!("Failed to flush {name} batch, retrying in 3s: {error}");
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }

    get_kind(&tracker).mark_idle();
}
