//! The owning proxy worker and the routing collaborators the context
//! core interacts with.
//!
//! Route-tree traversal, configuration loading, and the dispatch loop all
//! live outside this crate; these types are the seam they plug into.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::metrics;

/// Process-wide request id source. Ids are unique across all proxies for
/// the lifetime of the process.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Priority class of a request on its proxy's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestPriority {
    /// Client-facing traffic, scheduled first.
    #[default]
    Critical,
    /// Background traffic (asynchronous deletes, warmup, and the like).
    Async,
}

/// Root of the route tree, owned by a configuration snapshot.
///
/// The route algebra lives outside this crate; the context only stores and
/// hands back the root handle.
pub trait RouteHandle: Send + Sync {
    /// Human-readable name of this route, for introspection output.
    fn name(&self) -> &str;
}

/// One immutable routing configuration snapshot.
///
/// A request context pins the snapshot it was planned against for its
/// whole lifetime, so fan-out sub-requests never observe a configuration
/// newer than their parent request.
pub struct RouterConfig {
    route: Arc<dyn RouteHandle>,
    version: u32,
}

impl RouterConfig {
    pub fn new(route: Arc<dyn RouteHandle>, version: u32) -> Self {
        Self { route, version }
    }

    /// The route-tree root of this snapshot.
    pub fn proxy_route(&self) -> &dyn RouteHandle {
        &*self.route
    }

    /// Monotonic version of this snapshot, bumped on every reload.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// A routing component that fans a request out across shard replicas.
/// Recording contexts observe these during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSplitter {
    key_prefix: String,
    shard_count: u32,
}

impl ShardSplitter {
    pub fn new(key_prefix: impl Into<String>, shard_count: u32) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            shard_count,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }
}

/// Identity of the client that submitted a request.
#[derive(Debug)]
pub struct ClientHandle {
    id: u64,
    label: String,
}

impl ClientHandle {
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    /// Unique id of this client within the router, used as the sender id
    /// of its requests.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Per-proxy reply statistics, fed by the request logger.
#[derive(Default)]
pub struct ProxyStats {
    backend_replies: AtomicU64,
    backend_errors: AtomicU64,
    backend_latency_us: AtomicU64,
}

impl ProxyStats {
    pub fn backend_replies(&self) -> u64 {
        self.backend_replies.load(Ordering::Relaxed)
    }

    pub fn backend_errors(&self) -> u64 {
        self.backend_errors.load(Ordering::Relaxed)
    }

    pub fn backend_latency_us(&self) -> u64 {
        self.backend_latency_us.load(Ordering::Relaxed)
    }

    pub(crate) fn record_backend_reply(&self, is_error: bool, latency_us: u64) {
        self.backend_replies.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.backend_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.backend_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
    }
}

/// One proxy worker. Each worker runs a single-threaded cooperative
/// scheduler; parallelism is across proxies, not within one.
pub struct Proxy {
    id: usize,
    config: Mutex<Arc<RouterConfig>>,
    stats: ProxyStats,
    requests_active: AtomicU64,
}

impl Proxy {
    pub fn new(id: usize, config: Arc<RouterConfig>) -> Arc<Self> {
        Arc::new(Self {
            id,
            config: Mutex::new(config),
            stats: ProxyStats::default(),
            requests_active: AtomicU64::new(0),
        })
    }

    /// Worker index of this proxy.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The configuration snapshot new requests will be planned against.
    pub fn current_config(&self) -> Arc<RouterConfig> {
        self.config.lock().unwrap().clone()
    }

    /// Install a new configuration snapshot. In-flight requests keep the
    /// snapshot they started with.
    pub fn swap_config(&self, config: Arc<RouterConfig>) {
        *self.config.lock().unwrap() = config;
    }

    /// Allocate a process-unique request id.
    pub fn next_request_id(&self) -> u64 {
        NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    /// Requests currently being processed on this proxy.
    pub fn requests_active(&self) -> u64 {
        self.requests_active.load(Ordering::Relaxed)
    }

    pub(crate) fn request_started(&self) {
        self.requests_active.fetch_add(1, Ordering::Relaxed);
        metrics::REQUESTS_ACTIVE.increment();
    }

    pub(crate) fn request_finished(&self) {
        self.requests_active.fetch_sub(1, Ordering::Relaxed);
        metrics::REQUESTS_ACTIVE.decrement();
    }
}
