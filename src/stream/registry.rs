//! Bounded registry of open stream sessions

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::stats::{SessionStats, StatsSnapshot};
use crate::frame::StreamView;

struct Entry {
    camera: u32,
    view: StreamView,
    opened: Instant,
    stats: Arc<SessionStats>,
}

/// Status of one open session
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub id: u64,
    pub camera: u32,
    pub view: StreamView,
    pub uptime_secs: f64,
    pub stats: StatsSnapshot,
}

/// Tracks open sessions and enforces the client limit
pub struct StreamRegistry {
    max_clients: usize,
    session_counter: AtomicU64,
    sessions: Mutex<BTreeMap<u64, Entry>>,
}

impl StreamRegistry {
    pub fn new(max_clients: usize) -> Arc<Self> {
        Arc::new(Self {
            max_clients,
            session_counter: AtomicU64::new(0),
            sessions: Mutex::new(BTreeMap::new()),
        })
    }

    /// Reserves a slot for a new session, or `None` when the limit is reached
    pub fn acquire(self: &Arc<Self>, camera: u32, view: StreamView) -> Option<SessionTicket> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_clients {
            warn!(
                camera,
                view = %view,
                max_clients = self.max_clients,
                "Max clients reached, rejecting stream"
            );
            return None;
        }

        let id = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let stats = Arc::new(SessionStats::new());
        sessions.insert(
            id,
            Entry {
                camera,
                view,
                opened: Instant::now(),
                stats: Arc::clone(&stats),
            },
        );

        Some(SessionTicket {
            registry: Arc::clone(self),
            id,
            stats,
        })
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn snapshot(&self) -> Vec<StreamInfo> {
        self.sessions
            .lock()
            .iter()
            .map(|(&id, entry)| StreamInfo {
                id,
                camera: entry.camera,
                view: entry.view,
                uptime_secs: entry.opened.elapsed().as_secs_f64(),
                stats: entry.stats.snapshot(),
            })
            .collect()
    }

    fn release(&self, id: u64) {
        if self.sessions.lock().remove(&id).is_some() {
            debug!(session_id = id, "Session slot released");
        }
    }
}

/// A reserved session slot, released on drop
pub struct SessionTicket {
    registry: Arc<StreamRegistry>,
    id: u64,
    stats: Arc<SessionStats>,
}

impl SessionTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
