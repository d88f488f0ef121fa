//! Shared in-memory log buffer map (spec.md §5/§9): a byte ring buffer per
//! `{namespace}/{run}/{step}` key, each with its own bounded broadcast of
//! newly appended bytes for live tailing.
//!
//! One mutex guards the map of keys; each buffer has its own mutex around
//! its bytes and subscriber list, so appends to different steps never
//! contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

/// Default cap, matching the log collector's own truncation limit
/// (spec.md §4.C), used when the operator isn't given an explicit override.
pub const DEFAULT_BUFFER_CAP_BYTES: usize = 10 * 1024 * 1024;

/// Bounded channel capacity for live subscribers; a slow consumer's send
/// fails silently rather than blocking the writer (spec.md §9).
const SUBSCRIBER_CAP: usize = 100;

struct RingBuffer {
    bytes: Vec<u8>,
    subscribers: Vec<mpsc::Sender<Vec<u8>>>,
}

impl RingBuffer {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Appends `chunk`, evicting from the front (byte-FIFO) if `cap_bytes`
    /// would otherwise be exceeded, then fans the chunk out to subscribers.
    fn append(&mut self, chunk: &[u8], cap_bytes: usize) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > cap_bytes {
            let overflow = self.bytes.len() - cap_bytes;
            self.bytes.drain(0..overflow);
        }
        self.subscribers.retain(|tx| tx.try_send(chunk.to_vec()).is_ok());
    }

    fn subscribe(&mut self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAP);
        self.subscribers.push(tx);
        rx
    }
}

/// Keyed store of ring buffers, shared across every reconcile in the
/// process. Initialized once at operator startup, torn down at shutdown —
/// the only permitted piece of global mutable state (spec.md §5).
#[derive(Clone)]
pub struct LogBufferManager {
    buffers: Arc<Mutex<HashMap<String, Arc<Mutex<RingBuffer>>>>>,
    cap_bytes: usize,
}

impl Default for LogBufferManager {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAP_BYTES)
    }
}

impl LogBufferManager {
    /// Builds a manager whose ring buffers each evict past `cap_bytes`.
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            cap_bytes,
        }
    }

    fn buffer_for(&self, key: &str) -> Arc<Mutex<RingBuffer>> {
        self.buffers
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RingBuffer::new())))
            .clone()
    }

    pub fn append(&self, key: &str, chunk: &[u8]) {
        self.buffer_for(key).lock().unwrap().append(chunk, self.cap_bytes);
    }

    pub fn subscribe(&self, key: &str) -> mpsc::Receiver<Vec<u8>> {
        self.buffer_for(key).lock().unwrap().subscribe()
    }

    pub fn snapshot(&self, key: &str) -> Vec<u8> {
        self.buffer_for(key).lock().unwrap().bytes.clone()
    }

    /// Drops a key's buffer entirely. Called on run finalization so cold
    /// keys don't accumulate for the lifetime of the operator process.
    pub fn evict(&self, key: &str) {
        let removed = self.buffers.lock().unwrap().remove(key);
        if removed.is_some() {
            debug!(%key, "evicted log buffer");
        }
    }

    /// Drops every buffer whose key starts with `prefix`. Used on run
    /// finalization, when the full set of step keys for that run (but not
    /// necessarily the config that named them) is known.
    pub fn evict_prefix(&self, prefix: &str) {
        let mut buffers = self.buffers.lock().unwrap();
        let before = buffers.len();
        buffers.retain(|key, _| !key.starts_with(prefix));
        let evicted = before - buffers.len();
        if evicted > 0 {
            debug!(%prefix, evicted, "evicted log buffers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_evicts_oldest_bytes_past_the_cap() {
        let mgr = LogBufferManager::new(10);
        let key = "ci/run-1/build";
        mgr.append(key, &vec![b'a'; 10]);
        mgr.append(key, b"bbb");
        let snapshot = mgr.snapshot(key);
        assert_eq!(snapshot.len(), 10);
        assert!(snapshot.ends_with(b"bbb"));
    }

    #[test]
    fn default_cap_matches_the_log_collectors_truncation_limit() {
        let mgr = LogBufferManager::default();
        let key = "ci/run-1/build";
        mgr.append(key, &vec![b'a'; DEFAULT_BUFFER_CAP_BYTES]);
        mgr.append(key, b"bbb");
        assert_eq!(mgr.snapshot(key).len(), DEFAULT_BUFFER_CAP_BYTES);
    }

    #[tokio::test]
    async fn subscriber_receives_appended_chunks() {
        let mgr = LogBufferManager::default();
        let key = "ci/run-1/build";
        let mut rx = mgr.subscribe(key);
        mgr.append(key, b"hello");
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk, b"hello");
    }

    #[test]
    fn evict_drops_the_key_entirely() {
        let mgr = LogBufferManager::default();
        let key = "ci/run-1/build";
        mgr.append(key, b"hello");
        mgr.evict(key);
        assert!(mgr.snapshot(key).is_empty());
    }

    #[test]
    fn evict_prefix_drops_every_matching_key() {
        let mgr = LogBufferManager::default();
        mgr.append("ci/run-1/build", b"a");
        mgr.append("ci/run-1/test", b"b");
        mgr.append("ci/run-2/build", b"c");
        mgr.evict_prefix("ci/run-1/");
        assert!(mgr.snapshot("ci/run-1/build").is_empty());
        assert!(mgr.snapshot("ci/run-1/test").is_empty());
        assert_eq!(mgr.snapshot("ci/run-2/build"), b"c");
    }

    #[test]
    fn evict_prefix_does_not_cross_namespaces() {
        let mgr = LogBufferManager::default();
        mgr.append("ci/run-1/build", b"a");
        mgr.append("staging/run-1/build", b"b");
        mgr.evict_prefix("ci/run-1/");
        assert!(mgr.snapshot("ci/run-1/build").is_empty());
        assert_eq!(mgr.snapshot("staging/run-1/build"), b"b");
    }

    #[test]
    fn separate_keys_do_not_share_state() {
        let mgr = LogBufferManager::default();
        mgr.append("ci/run-1/build", b"one");
        mgr.append("ci/run-1/test", b"two");
        assert_eq!(mgr.snapshot("ci/run-1/build"), b"one");
        assert_eq!(mgr.snapshot("ci/run-1/test"), b"two");
    }
}
