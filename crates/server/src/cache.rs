use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use nolia_contracts::AskResponse;
use nolia_contracts::canonical::sha256_hex;

use crate::error::HttpError;

pub const ASK_CACHE_TTL: Duration = Duration::from_secs(30);
pub const ASK_CACHE_CAP: usize = 500;
const PRUNE_EVERY_OPS: u64 = 50;
const PRUNE_AT_SIZE: usize = 200;

pub type AskOutcome = Result<AskResponse, HttpError>;

/// Cache key: SHA-256 over the caller partition (anon id or IP) and the
/// validated request body.
pub fn cache_key(partition: &str, body: &serde_json::Value) -> String {
    let identity = serde_json::json!({
        "partition": partition,
        "body": body,
    });
    sha256_hex(identity.to_string().as_bytes())
}

struct CacheEntry {
    value: AskResponse,
    expires_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    ops: u64,
}

impl CacheInner {
    /// Opportunistic sweep: drop expired entries and the queue slots that
    /// pointed at them, so neither map outgrows the other.
    fn maybe_sweep(&mut self, now: Instant) {
        self.ops += 1;
        if self.ops % PRUNE_EVERY_OPS != 0 && self.entries.len() < PRUNE_AT_SIZE {
            return;
        }
        let CacheInner { entries, order, .. } = self;
        entries.retain(|_, entry| entry.expires_at > now);
        order.retain(|key| entries.contains_key(key));
    }
}

/// Short-TTL response cache with opportunistic expiry sweeps and FIFO
/// eviction above the capacity cap.
pub struct AskCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
}

impl AskCache {
    pub fn new() -> Self {
        Self::with_ttl(ASK_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                ops: 0,
            }),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<AskResponse> {
        let now = Instant::now();
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        inner.maybe_sweep(now);

        inner
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    pub fn put(&self, key: &str, value: AskResponse) {
        let now = Instant::now();
        let expires_at = now + self.ttl;
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        inner.maybe_sweep(now);

        let replaced = inner
            .entries
            .insert(key.to_string(), CacheEntry { value, expires_at })
            .is_some();
        if !replaced {
            inner.order.push_back(key.to_string());
        }

        while inner.entries.len() > ASK_CACHE_CAP {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AskCache {
    fn default() -> Self {
        Self::new()
    }
}

type FlightMap = Arc<Mutex<HashMap<String, watch::Receiver<Option<AskOutcome>>>>>;

/// In-flight request coalescer: the first caller for a key becomes the
/// leader and runs the pipeline; everyone else inherits its outcome.
#[derive(Clone, Default)]
pub struct Coalescer {
    inflight: FlightMap,
}

pub enum Flight {
    Leader(FlightGuard),
    Follower(watch::Receiver<Option<AskOutcome>>),
}

/// Held by the leader for the duration of the pipeline run. The pending
/// entry is removed only on completion; if the leader is dropped without a
/// result (client disconnect), followers fail together.
pub struct FlightGuard {
    key: String,
    tx: watch::Sender<Option<AskOutcome>>,
    map: FlightMap,
    completed: bool,
}

impl FlightGuard {
    pub fn complete(mut self, outcome: AskOutcome) {
        let _ = self.tx.send(Some(outcome));
        self.completed = true;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.completed {
            let _ = self.tx.send(Some(Err(HttpError::internal(
                "request aborted before completion",
            ))));
        }
        let mut map = match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(&self.key);
    }
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: &str) -> Flight {
        let mut map = match self.inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(rx) = map.get(key) {
            return Flight::Follower(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        map.insert(key.to_string(), rx);
        Flight::Leader(FlightGuard {
            key: key.to_string(),
            tx,
            map: Arc::clone(&self.inflight),
            completed: false,
        })
    }

    pub fn inflight_len(&self) -> usize {
        match self.inflight.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Waits for the leader's outcome on a follower handle.
pub async fn await_leader(mut rx: watch::Receiver<Option<AskOutcome>>) -> AskOutcome {
    loop {
        let current = rx.borrow().clone();
        if let Some(outcome) = current {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return Err(HttpError::internal("coalesced request was abandoned"));
        }
    }
}
