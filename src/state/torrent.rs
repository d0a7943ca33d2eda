use std::collections::HashMap;

use indexmap::IndexMap;

use super::ids::PeerId;
use super::peer::Peer;

/// A torrent's promotional class, set by the control plane per-torrent.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FreeTorrent {
    #[default]
    Normal,
    Free,
    Neutral,
}

impl FreeTorrent {
    pub fn from_flag(flag: &str) -> FreeTorrent {
        match flag {
            "0" => FreeTorrent::Normal,
            "1" => FreeTorrent::Free,
            _ => FreeTorrent::Neutral,
        }
    }
}

/// A time-bounded promotional slot for one (user, torrent) pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenSlot {
    pub free_leech: i64,
    pub double_seed: i64,
}

/// In-memory view of one torrent's swarm and accounting state.
pub struct Torrent {
    pub id: u32,
    pub free_torrent: FreeTorrent,
    pub double_seed: bool,
    pub balance: i64,
    pub completed: u32,
    pub last_seeded: i64,
    pub last_flushed: i64,
    pub last_selected_seeder: Option<PeerId>,
    pub seeders: IndexMap<PeerId, Peer>,
    pub leechers: IndexMap<PeerId, Peer>,
    pub tokened_users: HashMap<u32, TokenSlot>,
}

impl Torrent {
    pub fn new(id: u32, free_torrent: FreeTorrent, double_seed: bool, completed: u32) -> Torrent {
        Torrent {
            id,
            free_torrent,
            double_seed,
            balance: 0,
            completed,
            last_seeded: 0,
            last_flushed: 0,
            last_selected_seeder: None,
            seeders: IndexMap::new(),
            leechers: IndexMap::new(),
            tokened_users: HashMap::new(),
        }
    }

    /// Selects up to `numwant` seeder compact blobs, round-robin across
    /// successive calls so no seeder is starved as announces keep arriving.
    ///
    /// Walks cyclically starting from the seeder just after
    /// `last_selected_seeder`, falling back to the first seeder if the
    /// cursor is empty or its target has left the swarm, and stops after
    /// one full cycle or once `numwant` is reached. Advances the cursor to
    /// the last peer emitted.
    pub fn select_seeders(&mut self, numwant: usize) -> Vec<[u8; 6]> {
        if numwant == 0 || self.seeders.is_empty() {
            return Vec::new();
        }

        let start_index = match self.last_selected_seeder {
            Some(cursor) => match self.seeders.get_index_of(&cursor) {
                Some(idx) => (idx + 1) % self.seeders.len(),
                None => 0,
            },
            None => 0,
        };

        let len = self.seeders.len();
        let take = numwant.min(len);
        let mut out = Vec::with_capacity(take);

        for offset in 0..take {
            let idx = (start_index + offset) % len;
            let (peer_id, peer) = self.seeders.get_index(idx).expect("idx within bounds");
            out.push(peer.ip_port);
            self.last_selected_seeder = Some(*peer_id);
        }

        out
    }

    /// Appends leecher compact blobs up to `numwant`, skipping `skip_ip_port`
    /// (the requester's own address, when the requester is itself a leecher).
    pub fn select_leechers(&self, numwant: usize, skip_ip_port: Option<[u8; 6]>) -> Vec<[u8; 6]> {
        let mut out = Vec::new();

        for peer in self.leechers.values() {
            if out.len() >= numwant {
                break;
            }
            if Some(peer.ip_port) == skip_ip_port {
                continue;
            }
            out.push(peer.ip_port);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ids::PeerId;

    fn peer(id: u8, ip_port: [u8; 6]) -> Peer {
        let mut raw = [0u8; 20];
        raw[0] = id;
        Peer {
            user_id: id as u32,
            peer_id: PeerId(raw),
            user_agent: String::new(),
            ip: String::new(),
            port: 0,
            ip_port,
            uploaded: 0,
            downloaded: 0,
            left: 0,
            first_announced: 0,
            last_announced: 0,
            announces: 0,
        }
    }

    #[test]
    fn round_robin_visits_every_seeder_eventually() {
        let mut tor = Torrent::new(1, FreeTorrent::Normal, false, 0);
        for i in 0..3u8 {
            let p = peer(i + 1, [i, 0, 0, 0, 0, 0]);
            tor.seeders.insert(p.peer_id, p);
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let batch = tor.select_seeders(1);
            assert_eq!(batch.len(), 1);
            seen.insert(batch[0][0]);
        }

        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn falls_back_to_first_seeder_when_cursor_gone() {
        let mut tor = Torrent::new(1, FreeTorrent::Normal, false, 0);
        let p = peer(1, [1, 0, 0, 0, 0, 0]);
        let gone_id = p.peer_id;
        tor.seeders.insert(p.peer_id, p);
        tor.last_selected_seeder = Some(gone_id);
        tor.seeders.swap_remove(&gone_id);

        let p2 = peer(2, [2, 0, 0, 0, 0, 0]);
        tor.seeders.insert(p2.peer_id, p2);

        let batch = tor.select_seeders(1);
        assert_eq!(batch, vec![[2, 0, 0, 0, 0, 0]]);
    }

    #[test]
    fn leecher_selection_skips_requester() {
        let mut tor = Torrent::new(1, FreeTorrent::Normal, false, 0);
        let p1 = peer(1, [1, 0, 0, 0, 0, 0]);
        let p2 = peer(2, [2, 0, 0, 0, 0, 0]);
        tor.leechers.insert(p1.peer_id, p1);
        tor.leechers.insert(p2.peer_id, p2);

        let out = tor.select_leechers(50, Some([1, 0, 0, 0, 0, 0]));
        assert_eq!(out, vec![[2, 0, 0, 0, 0, 0]]);
    }
}
