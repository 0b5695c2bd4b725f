//! Per-request routing context.
//!
//! A [`TypedRequestContext`] is alive for the duration of one logical
//! client request, including every fan-out sub-request sent on its
//! behalf. It starts under exclusive ownership off the proxy thread (a
//! [`ContextHandle`]); when handed to its proxy and ready to execute,
//! [`ContextHandle::process`] pins the current configuration snapshot and
//! converts it to shared ownership. From then on every sub-request holds a
//! reference, and the context is destroyed only when the last one drops,
//! which may happen on any thread.
//!
//! Recording contexts are the exception: they perform no I/O and exist
//! only to observe route-tree traversal (see
//! [`RequestContext::create_recording`]).

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::access_point::AccessPoint;
use crate::baton::Baton;
use crate::logger::{ProxyRequestLogger, RequestLogger, RequestLoggerContext};
use crate::metrics;
use crate::proxy::{ClientHandle, Proxy, RequestPriority, RouteHandle, RouterConfig, ShardSplitter};
use crate::reply::{ReplyLike, ReplyResult, RouteRequest};

/// Observation callback invoked when traversal would send to a
/// destination: `(pool_name, index_in_pool, access_point)`.
pub type ClientCallback = Box<dyn Fn(&str, usize, &AccessPoint) + Send + Sync>;

/// Observation callback invoked when traversal visits a shard splitter.
pub type ShardSplitCallback = Box<dyn Fn(&ShardSplitter) + Send + Sync>;

/// Hook that runs once all replies are in and the client-visible reply has
/// been enqueued.
pub type CompletionHook = Box<dyn FnOnce(&RequestContext) + Send>;

enum ContextMode {
    Routing {
        /// Installed exactly once, at the hand-off to the proxy thread.
        /// Keeps the routing configuration alive for the request's
        /// lifetime.
        config: OnceLock<Arc<RouterConfig>>,
        requester: Option<Arc<ClientHandle>>,
        logger: ProxyRequestLogger,
        additional_logger: Option<Box<dyn RequestLogger>>,
        on_complete: Mutex<Option<CompletionHook>>,
    },
    Recording {
        client_cb: Option<ClientCallback>,
        shard_split_cb: Option<ShardSplitCallback>,
        baton: Option<Baton>,
    },
}

/// Untyped request-context state shared by every request kind.
///
/// This is the surface the route tree sees during traversal; the typed
/// reply machinery lives in [`TypedRequestContext`].
pub struct RequestContext {
    request_id: u64,
    proxy: Arc<Proxy>,
    priority: RequestPriority,
    failover_disabled: bool,
    user_ip: String,
    sender_id_for_test: u64,
    /// True once the context was handed to its proxy via `process`.
    processing: AtomicBool,
    /// True once `start_processing` ran.
    started: AtomicBool,
    /// False-to-true exactly once, when the client-visible reply is sent.
    replied: AtomicBool,
    mode: ContextMode,
}

impl RequestContext {
    fn new_routing(proxy: Arc<Proxy>, priority: RequestPriority) -> Self {
        let request_id = proxy.next_request_id();
        let logger = ProxyRequestLogger::new(Arc::clone(&proxy));
        Self {
            request_id,
            proxy,
            priority,
            failover_disabled: false,
            user_ip: String::new(),
            sender_id_for_test: 0,
            processing: AtomicBool::new(false),
            started: AtomicBool::new(false),
            replied: AtomicBool::new(false),
            mode: ContextMode::Routing {
                config: OnceLock::new(),
                requester: None,
                logger,
                additional_logger: None,
                on_complete: Mutex::new(None),
            },
        }
    }

    /// A request with this context will not be sent or logged anywhere.
    ///
    /// When route-tree traversal would send to a destination it calls
    /// [`record_destination`](Self::record_destination), which forwards to
    /// `client_cb`; when it visits a shard splitter,
    /// [`record_shard_splitter`](Self::record_shard_splitter) forwards to
    /// `shard_split_cb`.
    pub fn create_recording(
        proxy: Arc<Proxy>,
        client_cb: Option<ClientCallback>,
        shard_split_cb: Option<ShardSplitCallback>,
    ) -> Arc<RequestContext> {
        Self::recording_inner(proxy, client_cb, shard_split_cb, None)
    }

    /// Same as [`create_recording`](Self::create_recording), but also
    /// posts `baton` when the context is destroyed (i.e. once every
    /// traversal referencing it has finished), so the caller can block
    /// until then.
    pub fn create_recording_notify(
        proxy: Arc<Proxy>,
        baton: Baton,
        client_cb: Option<ClientCallback>,
        shard_split_cb: Option<ShardSplitCallback>,
    ) -> Arc<RequestContext> {
        Self::recording_inner(proxy, client_cb, shard_split_cb, Some(baton))
    }

    fn recording_inner(
        proxy: Arc<Proxy>,
        client_cb: Option<ClientCallback>,
        shard_split_cb: Option<ShardSplitCallback>,
        baton: Option<Baton>,
    ) -> Arc<RequestContext> {
        let request_id = proxy.next_request_id();
        Arc::new(Self {
            request_id,
            proxy,
            priority: RequestPriority::Critical,
            failover_disabled: false,
            user_ip: String::new(),
            sender_id_for_test: 0,
            processing: AtomicBool::new(false),
            started: AtomicBool::new(false),
            replied: AtomicBool::new(false),
            mode: ContextMode::Recording {
                client_cb,
                shard_split_cb,
                baton,
            },
        })
    }

    /// The proxy this request runs on.
    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn recording(&self) -> bool {
        matches!(self.mode, ContextMode::Recording { .. })
    }

    /// Id of this request, unique within the process.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn priority(&self) -> RequestPriority {
        self.priority
    }

    pub fn failover_disabled(&self) -> bool {
        self.failover_disabled
    }

    pub fn user_ip_address(&self) -> &str {
        &self.user_ip
    }

    /// Id of the client that submitted this request.
    pub fn sender_id(&self) -> u64 {
        match &self.mode {
            ContextMode::Routing {
                requester: Some(requester),
                ..
            } => requester.id(),
            _ => self.sender_id_for_test,
        }
    }

    /// The configuration snapshot this request was planned against.
    ///
    /// # Panics
    ///
    /// Panics on a recording context, or before
    /// [`ContextHandle::process`] installed the snapshot.
    pub fn proxy_config(&self) -> &RouterConfig {
        match &self.mode {
            ContextMode::Routing { config, .. } => config
                .get()
                .expect("configuration snapshot not installed; call process() first")
                .as_ref(),
            ContextMode::Recording { .. } => {
                panic!("proxy_config() called on a recording context")
            }
        }
    }

    /// The route-tree root of this request's configuration snapshot.
    ///
    /// # Panics
    ///
    /// Same conditions as [`proxy_config`](Self::proxy_config).
    pub fn proxy_route(&self) -> &dyn RouteHandle {
        self.proxy_config().proxy_route()
    }

    /// Observation point: traversal would send to `ap`, the `index`-th
    /// destination of pool `pool_name`. No-op outside recording mode.
    pub fn record_destination(&self, pool_name: &str, index: usize, ap: &AccessPoint) {
        if let ContextMode::Recording {
            client_cb: Some(cb),
            ..
        } = &self.mode
        {
            metrics::RECORDING_DESTINATIONS.increment();
            cb(pool_name, index, ap);
        }
    }

    /// Observation point: traversal visited a shard splitter. No-op
    /// outside recording mode.
    pub fn record_shard_splitter(&self, splitter: &ShardSplitter) {
        if let ContextMode::Recording {
            shard_split_cb: Some(cb),
            ..
        } = &self.mode
        {
            metrics::RECORDING_SHARD_SPLITS.increment();
            cb(splitter);
        }
    }

    /// Record a stats sample for a backend reply. Called for every reply,
    /// whether or not it becomes the client-visible one; late arrivals
    /// after the reply went out are still recorded.
    ///
    /// Returns immediately in recording mode.
    #[allow(clippy::too_many_arguments)]
    pub fn on_reply_received<R: RouteRequest>(
        &self,
        pool_name: &str,
        ap: &AccessPoint,
        stripped_routing_prefix: &str,
        _request: &R,
        reply: &R::Reply,
        start_time_us: i64,
        end_time_us: i64,
    ) {
        let (logger, additional_logger) = match &self.mode {
            ContextMode::Recording { .. } => return,
            ContextMode::Routing {
                logger,
                additional_logger,
                ..
            } => (logger, additional_logger),
        };

        let ctx = RequestLoggerContext {
            pool_name,
            access_point: ap,
            stripped_routing_prefix,
            operation: R::NAME,
            result: reply.result(),
            start_time_us,
            end_time_us,
        };
        logger.log(&ctx);
        if let Some(additional) = additional_logger {
            additional.log(&ctx);
        }
    }

    /// Continue processing the current request.
    ///
    /// Only [`TypedRequestContext`] instances can process; reaching this
    /// base implementation (possible only on a recording context) is a
    /// programming error.
    pub fn start_processing(&self) {
        panic!("start_processing called on an incomplete instance of RequestContext");
    }

    fn install_config(&self, config: Arc<RouterConfig>) {
        let slot = match &self.mode {
            ContextMode::Routing { config, .. } => config,
            ContextMode::Recording { .. } => {
                panic!("process() called on a recording context")
            }
        };
        if slot.set(config).is_err() {
            panic!("configuration snapshot installed twice");
        }
        self.processing.store(true, Ordering::Release);
    }

    fn fire_completion(&self) {
        if let ContextMode::Routing { on_complete, .. } = &self.mode {
            let hook = on_complete.lock().unwrap().take();
            if let Some(hook) = hook {
                hook(self);
            }
        }
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if self.processing.load(Ordering::Acquire) {
            self.proxy.request_finished();
        }
        // Recording-notify: every traversal referencing this context has
        // finished; unblock the waiter.
        if let ContextMode::Recording {
            baton: Some(baton), ..
        } = &self.mode
        {
            baton.post();
        }
    }
}

type SendReplyFn<R> = Box<dyn FnOnce(<R as RouteRequest>::Reply) + Send>;
type RouteFn<R> = Box<dyn FnOnce(Arc<TypedRequestContext<R>>) + Send>;

/// A request context specialized for one request type.
///
/// Adds the typed request payload and the protocol-specific reply encoder
/// to the base lifecycle. Derefs to [`RequestContext`] for the untyped
/// traversal surface.
pub struct TypedRequestContext<R: RouteRequest> {
    base: RequestContext,
    /// Points to the live request until the reply goes out, then None.
    req: Mutex<Option<R>>,
    send_reply_impl: Mutex<Option<SendReplyFn<R>>>,
    route_fn: Mutex<Option<RouteFn<R>>>,
}

impl<R: RouteRequest> Deref for TypedRequestContext<R> {
    type Target = RequestContext;

    fn deref(&self) -> &RequestContext {
        &self.base
    }
}

/// Create a request context for `request` on `proxy`.
///
/// `send_reply_impl` encodes and enqueues the client-visible reply;
/// `route_fn` enters route-tree traversal when
/// [`start_processing`](TypedRequestContext::start_processing) runs.
///
/// The returned [`ContextHandle`] is the exclusive-ownership phase: no
/// sub-request exists yet, so connection-level attributes can still be set
/// through plain `&mut` access.
pub fn create_request_context<R, S, F>(
    proxy: Arc<Proxy>,
    request: R,
    send_reply_impl: S,
    route_fn: F,
    priority: RequestPriority,
) -> ContextHandle<R>
where
    R: RouteRequest,
    S: FnOnce(R::Reply) + Send + 'static,
    F: FnOnce(Arc<TypedRequestContext<R>>) + Send + 'static,
{
    metrics::REQUESTS_CREATED.increment();
    ContextHandle {
        inner: Box::new(TypedRequestContext {
            base: RequestContext::new_routing(proxy, priority),
            req: Mutex::new(Some(request)),
            send_reply_impl: Mutex::new(Some(Box::new(send_reply_impl))),
            route_fn: Mutex::new(Some(Box::new(route_fn))),
        }),
    }
}

/// Exclusive-ownership phase of a typed request context.
///
/// Constructed off the proxy thread; moved to the owning proxy and
/// converted to shared ownership by [`process`](Self::process).
pub struct ContextHandle<R: RouteRequest> {
    inner: Box<TypedRequestContext<R>>,
}

impl<R: RouteRequest> ContextHandle<R> {
    /// Record the client's IP address for logging.
    pub fn set_user_ip_address(&mut self, addr: &str) {
        self.inner.base.user_ip = addr.to_owned();
    }

    /// Disable failover for this request.
    pub fn set_failover_disabled(&mut self, disabled: bool) {
        self.inner.base.failover_disabled = disabled;
    }

    /// Attach the client that submitted this request.
    pub fn set_requester(&mut self, client: Arc<ClientHandle>) {
        match &mut self.inner.base.mode {
            ContextMode::Routing { requester, .. } => *requester = Some(client),
            ContextMode::Recording { .. } => unreachable!("typed contexts never record"),
        }
    }

    /// Override the sender id for tests; ignored once a requester is set.
    pub fn set_sender_id_for_test(&mut self, id: u64) {
        self.inner.base.sender_id_for_test = id;
    }

    /// Install the hook that fires after the client-visible reply has been
    /// enqueued (immediately after, on synchronous paths). Must be set
    /// before [`process`](Self::process).
    pub fn set_completion_hook<H>(&mut self, hook: H)
    where
        H: FnOnce(&RequestContext) + Send + 'static,
    {
        match &self.inner.base.mode {
            ContextMode::Routing { on_complete, .. } => {
                *on_complete.lock().unwrap() = Some(Box::new(hook));
            }
            ContextMode::Recording { .. } => unreachable!("typed contexts never record"),
        }
    }

    /// Install a pluggable stats backend that observes every backend
    /// reply, after the primary logger. Must be set before
    /// [`process`](Self::process).
    pub fn set_additional_logger(&mut self, logger: Box<dyn RequestLogger>) {
        match &mut self.inner.base.mode {
            ContextMode::Routing {
                additional_logger, ..
            } => *additional_logger = Some(logger),
            ContextMode::Recording { .. } => unreachable!("typed contexts never record"),
        }
    }

    /// Hand the context off for execution: pin `config` as the snapshot
    /// this request is planned against and convert to shared ownership.
    ///
    /// From here on, every sub-request created by the route tree keeps the
    /// context (and with it the snapshot) alive until the last reference
    /// drops.
    pub fn process(self, config: Arc<RouterConfig>) -> Arc<TypedRequestContext<R>> {
        self.inner.base.install_config(config);
        self.inner.base.proxy.request_started();
        Arc::from(self.inner)
    }
}

impl<R: RouteRequest> Deref for ContextHandle<R> {
    type Target = TypedRequestContext<R>;

    fn deref(&self) -> &TypedRequestContext<R> {
        &self.inner
    }
}

impl<R: RouteRequest> TypedRequestContext<R> {
    /// Launch route-tree traversal. Called exactly once, on the owning
    /// proxy thread, after [`ContextHandle::process`].
    ///
    /// # Panics
    ///
    /// Panics when called before `process`, or a second time.
    pub fn start_processing(self: Arc<Self>) {
        assert!(
            self.base.processing.load(Ordering::Acquire),
            "start_processing before process()"
        );
        let already = self.base.started.swap(true, Ordering::AcqRel);
        assert!(!already, "start_processing called twice");

        let route_fn = self
            .route_fn
            .lock()
            .unwrap()
            .take()
            .expect("route closure missing");
        route_fn(self);
    }

    /// Send the client-visible reply for this request.
    ///
    /// Flips `replied` exactly once, runs the protocol-specific reply
    /// encoder, releases the request payload, then fires the completion
    /// hook. Calling this twice is a programming error and hard fails.
    pub fn send_reply(&self, reply: R::Reply) {
        assert!(
            self.base.processing.load(Ordering::Acquire),
            "send_reply before process()"
        );
        let already = self.base.replied.swap(true, Ordering::AcqRel);
        assert!(
            !already,
            "reply already sent for request {}",
            self.base.request_id
        );
        metrics::REQUESTS_REPLIED.increment();
        self.deliver_reply(reply);
    }

    fn deliver_reply(&self, reply: R::Reply) {
        let encoder = self
            .send_reply_impl
            .lock()
            .unwrap()
            .take()
            .expect("reply path already consumed");
        encoder(reply);
        *self.req.lock().unwrap() = None;
        self.base.fire_completion();
    }

    /// Borrow the request payload.
    ///
    /// # Panics
    ///
    /// Panics once the reply has been sent: the payload is released at
    /// that point and later access is a programming error.
    pub fn with_request<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        let guard = self.req.lock().unwrap();
        let req = guard
            .as_ref()
            .expect("request payload accessed after reply was sent");
        f(req)
    }
}

impl<R: RouteRequest> Drop for TypedRequestContext<R> {
    fn drop(&mut self) {
        if self.base.replied.swap(true, Ordering::AcqRel) {
            return;
        }
        // The request never produced a reply; synthesize an error so the
        // client sees exactly one reply per request.
        let encoder = match self.send_reply_impl.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(encoder) = encoder {
            metrics::REQUESTS_CANCELED.increment();
            encoder(R::Reply::from_error(
                ReplyResult::LocalError,
                "reply was never sent",
            ));
            self.base.fire_completion();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedRoute(&'static str);

    impl RouteHandle for NamedRoute {
        fn name(&self) -> &str {
            self.0
        }
    }

    struct PingRequest;

    struct PingReply {
        result: ReplyResult,
    }

    impl ReplyLike for PingReply {
        fn result(&self) -> ReplyResult {
            self.result
        }

        fn from_error(result: ReplyResult, _message: &str) -> Self {
            Self { result }
        }
    }

    impl RouteRequest for PingRequest {
        type Reply = PingReply;
        const NAME: &'static str = "ping";
    }

    fn test_proxy() -> Arc<Proxy> {
        let config = Arc::new(RouterConfig::new(Arc::new(NamedRoute("root")), 1));
        Proxy::new(0, config)
    }

    #[test]
    fn handle_mutators_are_visible_after_process() {
        let proxy = test_proxy();
        let mut handle = create_request_context(
            Arc::clone(&proxy),
            PingRequest,
            |_reply| {},
            |_ctx| {},
            RequestPriority::Async,
        );
        handle.set_user_ip_address("192.0.2.7");
        handle.set_failover_disabled(true);
        handle.set_sender_id_for_test(99);

        let ctx = handle.process(proxy.current_config());
        assert_eq!(ctx.user_ip_address(), "192.0.2.7");
        assert!(ctx.failover_disabled());
        assert_eq!(ctx.sender_id(), 99);
        assert_eq!(ctx.priority(), RequestPriority::Async);
        assert!(!ctx.recording());
        ctx.send_reply(PingReply {
            result: ReplyResult::Ok,
        });
    }

    #[test]
    fn requester_id_wins_over_test_sender_id() {
        let proxy = test_proxy();
        let mut handle = create_request_context(
            Arc::clone(&proxy),
            PingRequest,
            |_reply| {},
            |_ctx| {},
            RequestPriority::Critical,
        );
        handle.set_sender_id_for_test(99);
        handle.set_requester(Arc::new(ClientHandle::new(7, "session-1")));
        assert_eq!(handle.sender_id(), 7);
        let ctx = handle.process(proxy.current_config());
        ctx.send_reply(PingReply {
            result: ReplyResult::Ok,
        });
    }

    #[test]
    fn recording_context_has_no_config() {
        let proxy = test_proxy();
        let ctx = RequestContext::create_recording(proxy, None, None);
        assert!(ctx.recording());
        let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.proxy_config();
        }));
        assert!(err.is_err());
    }

    #[test]
    fn start_processing_on_recording_context_panics() {
        let proxy = test_proxy();
        let ctx = RequestContext::create_recording(proxy, None, None);
        let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.start_processing();
        }));
        assert!(err.is_err());
    }
}
