//! Session context: the renderer's read-only window into one run.
//!
//! An explicit object rather than a global, so several sessions (and
//! tests) can coexist. Applies snapshots with two guards: the run id must
//! match the active run, and the tick must move forward. A reconnect
//! racing a stale snapshot from a previous run can therefore never put
//! the wrong dungeon on screen.

use log::debug;

use delve_shared::{PlayerView, ServerMessage, WorldSnapshot};

/// Per-run client state
#[derive(Debug)]
pub struct SessionContext {
    run_id: u64,
    player_id: u64,
    last_tick: u64,
    snapshot: Option<WorldSnapshot>,
}

impl SessionContext {
    /// Start a context for an established session
    pub fn new(run_id: u64, player_id: u64) -> Self {
        Self {
            run_id,
            player_id,
            last_tick: 0,
            snapshot: None,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn player_id(&self) -> u64 {
        self.player_id
    }

    /// The latest accepted snapshot, if any
    pub fn snapshot(&self) -> Option<&WorldSnapshot> {
        self.snapshot.as_ref()
    }

    /// This session's player inside the latest snapshot
    pub fn me(&self) -> Option<&PlayerView> {
        self.snapshot
            .as_ref()
            .and_then(|s| s.players.iter().find(|p| p.id == self.player_id))
    }

    /// Apply one server message to the view. Returns false when the
    /// message was rejected (foreign run or stale tick) or carries no
    /// view state.
    pub fn apply(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::Snapshot(snapshot) => self.accept_snapshot(snapshot),
            ServerMessage::RunCreated { run_id, player_id, snapshot }
            | ServerMessage::RunJoined { run_id, player_id, snapshot } => {
                if *run_id != self.run_id || *player_id != self.player_id {
                    return false;
                }
                // A (re)join resets the tick watermark to the fresh state
                self.last_tick = 0;
                self.accept_snapshot(snapshot)
            }
            _ => false,
        }
    }

    fn accept_snapshot(&mut self, snapshot: &WorldSnapshot) -> bool {
        if snapshot.run_id != self.run_id {
            debug!(
                "dropping snapshot for foreign run {} (active {})",
                snapshot.run_id, self.run_id
            );
            return false;
        }
        if snapshot.tick <= self.last_tick {
            debug!(
                "dropping stale snapshot tick {} (have {})",
                snapshot.tick, self.last_tick
            );
            return false;
        }
        self.last_tick = snapshot.tick;
        self.snapshot = Some(snapshot.clone());
        true
    }
}
