use crate::tracker::Tracker;
use crate::utils::now;

/// Evicts peers that have gone silent for longer than `peers_timeout`.
///
/// Takes `now` once for the whole sweep so every torrent is judged against
/// the same instant. The torrent table lives behind one coarse mutex
/// (`State::torrents`), so scanning and erasing stale peers necessarily
/// holds that lock for the sweep's duration — there is no finer-grained
/// lock to take per erase once the whole table shares a single mutex. The
/// sweep itself does no I/O, so the hold time is bounded by table size.
pub fn reap(tracker: &Tracker) {
    let cur_time = now();
    let timeout = tracker.config.peers_timeout;
    let mut reaped = 0usize;

    let mut torrents = tracker.state.torrents.lock();
    for torrent in torrents.values_mut() {
        torrent
            .leechers
            .retain(|_, peer| cur_time - peer.last_announced <= timeout || {
                reaped += 1;
                false
            });
        torrent
            .seeders
            .retain(|_, peer| cur_time - peer.last_announced <= timeout || {
                reaped += 1;
                false
            });
    }
    drop(torrents);

    if reaped > 0 {
        tracing::info!("Reaped {reaped} stale peers.");
    }
}
