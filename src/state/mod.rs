pub mod ids;
pub mod peer;
pub mod torrent;
pub mod user;

pub use ids::{InfoHash, PeerId};
pub use peer::Peer;
pub use torrent::{FreeTorrent, Torrent, TokenSlot};
pub use user::User;

use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

/// The single site-wide promotional switch: global freeleech until a
/// timestamp.
#[derive(Clone, Copy, Default)]
pub struct SiteOptions {
    pub freeleech_until: i64,
}

/// Process-wide in-memory state: the torrent table (and, nested inside
/// each torrent, its seeder/leecher maps), the user table, the peer-id
/// blacklist, and site options.
///
/// The torrent table and every torrent's peer maps are guarded by one
/// coarse mutex (`torrents`), matching `torrent_list_mutex` in the
/// original: announces, the reaper, and torrent-shaped control-plane
/// actions all take this lock to mutate swarm membership. Users,
/// blacklist, and site options are control-plane-mutated and
/// announce-read-mostly, so they get their own locks instead of sharing
/// the torrent lock's contention.
pub struct State {
    pub torrents: Mutex<IndexMap<InfoHash, Torrent>>,
    pub users: RwLock<HashMap<String, User>>,
    pub blacklist: RwLock<Vec<Vec<u8>>>,
    pub site_options: RwLock<SiteOptions>,
}

impl State {
    pub fn new() -> State {
        State {
            torrents: Mutex::new(IndexMap::new()),
            users: RwLock::new(HashMap::new()),
            blacklist: RwLock::new(Vec::new()),
            site_options: RwLock::new(SiteOptions::default()),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}
