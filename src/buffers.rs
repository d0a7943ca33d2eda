use std::collections::VecDeque;

use parking_lot::Mutex;

/// One record kind's append-only text buffer plus its flush queue and
/// worker-active flag, all under a single mutex.
///
/// The original keeps the buffer and the queue under the *same*
/// `boost::mutex` for a given kind (`record_peer` and `do_flush_peers`
/// both take `peer_buffer_lock`), so a single `Mutex<KindState>` here is
/// the direct translation rather than splitting buffer and queue across
/// two locks.
pub struct RecordKind {
    state: Mutex<KindState>,
}

struct KindState {
    buffer: String,
    queue: VecDeque<String>,
    active: bool,
}

/// Outcome of a flush attempt: whether a worker needs to be spawned, and
/// (for logging) how many statements are now queued.
pub struct FlushOutcome {
    pub should_spawn: bool,
}

impl RecordKind {
    pub fn new() -> RecordKind {
        RecordKind {
            state: Mutex::new(KindState {
                buffer: String::new(),
                queue: VecDeque::new(),
                active: false,
            }),
        }
    }

    /// Appends a pre-rendered, dialect-opaque row fragment to the buffer.
    pub fn record(&self, fragment: &str) {
        let mut state = self.state.lock();
        if !state.buffer.is_empty() {
            state.buffer.push(',');
        }
        state.buffer.push_str(fragment);
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.buffer.is_empty() && state.queue.is_empty()
    }

    /// Builds one bulk statement from `prefix` + buffer contents + `suffix`
    /// and enqueues it, returning whether a worker must be spawned.
    /// Returns `None` if the buffer was empty (nothing to flush).
    pub fn flush_simple(&self, prefix: &str, suffix: &str) -> Option<FlushOutcome> {
        let mut state = self.state.lock();
        if state.buffer.is_empty() {
            return None;
        }

        let was_empty = state.queue.is_empty();
        let stmt = format!("{prefix}{}{suffix}", state.buffer);
        state.queue.push_back(stmt);
        state.buffer.clear();

        let should_spawn = was_empty && !state.active;
        if should_spawn {
            state.active = true;
        }

        Some(FlushOutcome { should_spawn })
    }

    /// Like [`Self::flush_simple`], but also appends `extra` as a second
    /// statement enqueued in the same batch (used by the torrent kind's
    /// trailing zero-info-hash sentinel delete).
    pub fn flush_with_extra(&self, prefix: &str, suffix: &str, extra: &str) -> Option<FlushOutcome> {
        let mut state = self.state.lock();
        if state.buffer.is_empty() {
            return None;
        }

        let was_empty = state.queue.is_empty();
        let stmt = format!("{prefix}{}{suffix}", state.buffer);
        state.queue.push_back(stmt);
        state.queue.push_back(extra.to_string());
        state.buffer.clear();

        let should_spawn = was_empty && !state.active;
        if should_spawn {
            state.active = true;
        }

        Some(FlushOutcome { should_spawn })
    }

    /// Like [`Self::flush_simple`], but first sheds the oldest queued
    /// statement if the queue already holds `cap` or more elements, and
    /// prepends a one-shot "disable binary logging" statement whenever the
    /// queue is empty before this push. This is the peer/peer-history
    /// shape: the only kinds whose ingress can outrun the store, so this
    /// is the system's one load-shedding point.
    pub fn flush_capped(
        &self,
        prefix: &str,
        suffix: &str,
        cap: usize,
        binlog_off_stmt: &str,
    ) -> Option<FlushOutcome> {
        let mut state = self.state.lock();

        if state.queue.len() >= cap {
            state.queue.pop_front();
        }

        if state.buffer.is_empty() {
            return None;
        }

        let was_empty = state.queue.is_empty();
        if was_empty {
            state.queue.push_back(binlog_off_stmt.to_string());
        }

        let stmt = format!("{prefix}{}{suffix}", state.buffer);
        state.queue.push_back(stmt);
        state.buffer.clear();

        let should_spawn = was_empty && !state.active;
        if should_spawn {
            state.active = true;
        }

        Some(FlushOutcome { should_spawn })
    }

    /// Like [`Self::flush_simple`], but prepends a one-shot "disable binary
    /// logging" statement whenever the queue is empty before this push, so
    /// the worker's dedicated connection has binlog suppressed for the
    /// whole batch. Used by the peer-history kind, which needs the binlog
    /// suppression but not the peer kind's 1000-element cap.
    pub fn flush_with_binlog(&self, prefix: &str, suffix: &str, binlog_off_stmt: &str) -> Option<FlushOutcome> {
        let mut state = self.state.lock();
        if state.buffer.is_empty() {
            return None;
        }

        let was_empty = state.queue.is_empty();
        if was_empty {
            state.queue.push_back(binlog_off_stmt.to_string());
        }

        let stmt = format!("{prefix}{}{suffix}", state.buffer);
        state.queue.push_back(stmt);
        state.buffer.clear();

        let should_spawn = was_empty && !state.active;
        if should_spawn {
            state.active = true;
        }

        Some(FlushOutcome { should_spawn })
    }

    /// Returns the statement at the front of the queue, if any, without
    /// removing it.
    pub fn peek_front(&self) -> Option<String> {
        self.state.lock().queue.front().cloned()
    }

    /// Removes the front statement (called after a successful execute) and
    /// returns the remaining queue length.
    pub fn pop_front(&self) -> usize {
        let mut state = self.state.lock();
        state.queue.pop_front();
        state.queue.len()
    }

    /// Clears the active flag once the queue has fully drained.
    pub fn mark_idle(&self) {
        self.state.lock().active = false;
    }
}

impl Default for RecordKind {
    fn default() -> Self {
        RecordKind::new()
    }
}

/// The six independent record buffers, one per kind, as described in C1.
pub struct RecordBuffers {
    pub users: RecordKind,
    pub torrents: RecordKind,
    pub peers: RecordKind,
    pub peer_history: RecordKind,
    pub snatches: RecordKind,
    pub tokens: RecordKind,
}

impl RecordBuffers {
    pub fn new() -> RecordBuffers {
        RecordBuffers {
            users: RecordKind::new(),
            torrents: RecordKind::new(),
            peers: RecordKind::new(),
            peer_history: RecordKind::new(),
            snatches: RecordKind::new(),
            tokens: RecordKind::new(),
        }
    }

    /// True iff every queue (and every buffer) is empty.
    pub fn all_clear(&self) -> bool {
        self.users.is_empty()
            && self.torrents.is_empty()
            && self.peers.is_empty()
            && self.peer_history.is_empty()
            && self.snatches.is_empty()
            && self.tokens.is_empty()
    }
}

impl Default for RecordBuffers {
    fn default() -> Self {
        RecordBuffers::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_joins_with_commas() {
        let kind = RecordKind::new();
        kind.record("(1,2)");
        kind.record("(3,4)");

        let outcome = kind.flush_simple("INSERT INTO t VALUES ", "").unwrap();
        assert!(outcome.should_spawn);
        assert_eq!(kind.peek_front().unwrap(), "INSERT INTO t VALUES (1,2),(3,4)");
    }

    #[test]
    fn flush_of_empty_buffer_is_noop() {
        let kind = RecordKind::new();
        assert!(kind.flush_simple("INSERT INTO t VALUES ", "").is_none());
    }

    #[test]
    fn second_flush_while_active_does_not_request_spawn() {
        let kind = RecordKind::new();
        kind.record("(1)");
        let first = kind.flush_simple("P ", "").unwrap();
        assert!(first.should_spawn);

        kind.record("(2)");
        let second = kind.flush_simple("P ", "").unwrap();
        assert!(!second.should_spawn);
    }

    #[test]
    fn peer_cap_sheds_oldest() {
        let kind = RecordKind::new();
        for i in 0..1001 {
            kind.record(&format!("({i})"));
            kind.flush_capped("P ", "", 1000, "SET session sql_log_bin = 0").unwrap();
        }
        // Queue should never exceed 1000 elements (cap enforced before push).
        let mut count = 0;
        while kind.peek_front().is_some() {
            kind.pop_front();
            count += 1;
        }
        assert!(count <= 1000);
    }
}
