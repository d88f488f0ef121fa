//! Shared state handed to every reconcile invocation.

use std::sync::Arc;
use std::time::Duration;

use c8s_storage::ObjectStore;
use kube::Client;

use crate::buffer::LogBufferManager;

pub struct Context {
    pub client: Client,
    pub store: Arc<dyn ObjectStore>,
    pub buffers: LogBufferManager,
    /// How long to wait before requeuing a non-terminal run (spec.md §4.F
    /// step 13: 10s).
    pub requeue_after: Duration,
}

impl Context {
    pub fn new(client: Client, store: Arc<dyn ObjectStore>, buffers: LogBufferManager) -> Self {
        Self {
            client,
            store,
            buffers,
            requeue_after: Duration::from_secs(10),
        }
    }
}
