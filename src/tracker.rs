use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use crate::buffers::RecordBuffers;
use crate::config::Config;
use crate::state::State;
use crate::store;

/// Tracker lifecycle status. Toggled by the signal handler: first signal
/// moves OPEN→CLOSING (announces start failing with "temporarily
/// unavailable", `update` keeps working), second signal moves
/// CLOSING→TERMINATE.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Status {
    Open = 0,
    Closing = 1,
    Terminate = 2,
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        match value {
            0 => Status::Open,
            1 => Status::Closing,
            _ => Status::Terminate,
        }
    }
}

/// Shared application context threaded through every request handler,
/// the reaper, and the flush workers.
pub struct Tracker {
    pub state: State,
    pub buffers: RecordBuffers,
    pub config: Config,
    pub pool: MySqlPool,
    status: AtomicU8,
    /// Live announce interval. Starts at `config.announce_interval` but is
    /// mutable at runtime via the `update_announce_interval` control action.
    announce_interval: AtomicU32,
}

impl Tracker {
    /// Connects to the store, loads the initial in-memory state (C3), and
    /// returns the shared tracker context ready to be handed to the
    /// announce/scrape/update handlers.
    pub async fn bootstrap(config: Config) -> Result<Tracker> {
        tracing::info!("Connecting to database...");
        let pool = MySqlPoolOptions::new()
            .min_connections(0)
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("Could not connect to the database using DATABASE_URL.")?;
        tracing::info!("Connected to database.");

        let state = store::loader::load(&pool).await?;
        let announce_interval = AtomicU32::new(config.announce_interval);

        Ok(Tracker {
            state,
            buffers: RecordBuffers::new(),
            config,
            pool,
            status: AtomicU8::new(Status::Open as u8),
            announce_interval,
        })
    }

    pub fn status(&self) -> Status {
        Status::from(self.status.load(Ordering::Acquire))
    }

    pub fn announce_interval(&self) -> u32 {
        self.announce_interval.load(Ordering::Relaxed)
    }

    pub fn set_announce_interval(&self, value: u32) {
        self.announce_interval.store(value, Ordering::Relaxed);
    }

    /// Advances the lifecycle on signal receipt. Returns the new status.
    pub fn advance_status(&self) -> Status {
        let current = self.status();
        let next = match current {
            Status::Open => Status::Closing,
            Status::Closing | Status::Terminate => Status::Terminate,
        };
        self.status.store(next as u8, Ordering::Release);
        next
    }

    /// Builds a `Tracker` around pre-populated state for tests, using a lazy
    /// pool that never actually connects. Announce/control/reaper logic only
    /// ever touches `state`/`config`/`buffers`, never `pool` directly, so
    /// this is sufficient to exercise that code without a live database.
    #[cfg(test)]
    pub fn for_tests(state: State, config: Config) -> Tracker {
        let pool = MySqlPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("connect_lazy should not fail to parse a well-formed URL");
        let announce_interval = AtomicU32::new(config.announce_interval);

        Tracker {
            state,
            buffers: RecordBuffers::new(),
            config,
            pool,
            status: AtomicU8::new(Status::Open as u8),
            announce_interval,
        }
    }
}
