//! Per-reply request logging.
//!
//! Every backend reply, whether or not it becomes the client-visible
//! answer, is reported through a [`RequestLoggerContext`] to the loggers
//! installed on the request context. The primary logger feeds proxy stats
//! and the global metrics; an optional additional logger (a pluggable
//! stats backend) fires second.

use std::sync::Arc;

use crate::access_point::AccessPoint;
use crate::metrics;
use crate::proxy::Proxy;
use crate::reply::ReplyResult;

/// Everything a stats backend needs to know about one backend reply.
pub struct RequestLoggerContext<'a> {
    /// Name of the pool the destination belongs to.
    pub pool_name: &'a str,
    /// The backend that produced the reply.
    pub access_point: &'a AccessPoint,
    /// Routing prefix stripped from the key before pool selection.
    pub stripped_routing_prefix: &'a str,
    /// Operation name of the request.
    pub operation: &'static str,
    /// Result classification of the reply.
    pub result: ReplyResult,
    /// Sub-request send time, microseconds.
    pub start_time_us: i64,
    /// Reply receive time, microseconds.
    pub end_time_us: i64,
}

impl RequestLoggerContext<'_> {
    /// Sub-request duration in microseconds, clamped to zero for
    /// non-monotonic clock readings.
    pub fn duration_us(&self) -> u64 {
        (self.end_time_us - self.start_time_us).max(0) as u64
    }
}

/// A stats backend that observes every backend reply.
pub trait RequestLogger: Send + Sync {
    fn log(&self, ctx: &RequestLoggerContext<'_>);
}

/// The primary logger, installed on every routing context at construction.
/// Feeds the owning proxy's stats and the global metrics.
pub struct ProxyRequestLogger {
    proxy: Arc<Proxy>,
}

impl ProxyRequestLogger {
    pub(crate) fn new(proxy: Arc<Proxy>) -> Self {
        Self { proxy }
    }
}

impl RequestLogger for ProxyRequestLogger {
    fn log(&self, ctx: &RequestLoggerContext<'_>) {
        metrics::BACKEND_REPLIES.increment();
        if ctx.result.is_error() {
            metrics::BACKEND_ERRORS.increment();
        }
        metrics::BACKEND_LATENCY_US.add(ctx.duration_us());
        self.proxy
            .stats()
            .record_backend_reply(ctx.result.is_error(), ctx.duration_us());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{RouteHandle, RouterConfig};
    use umbrella_proto::Protocol;

    struct NamedRoute(&'static str);

    impl RouteHandle for NamedRoute {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn logger_ctx<'a>(ap: &'a AccessPoint, result: ReplyResult) -> RequestLoggerContext<'a> {
        RequestLoggerContext {
            pool_name: "poolA",
            access_point: ap,
            stripped_routing_prefix: "/region/cluster/",
            operation: "get",
            result,
            start_time_us: 1_000,
            end_time_us: 1_450,
        }
    }

    #[test]
    fn duration_is_clamped() {
        let ap = AccessPoint::new("h", 1, Protocol::Ascii);
        let mut ctx = logger_ctx(&ap, ReplyResult::Found);
        assert_eq!(ctx.duration_us(), 450);
        ctx.end_time_us = 500;
        assert_eq!(ctx.duration_us(), 0);
    }

    #[test]
    fn primary_logger_feeds_proxy_stats() {
        let config = Arc::new(RouterConfig::new(Arc::new(NamedRoute("root")), 1));
        let proxy = Proxy::new(0, config);
        let logger = ProxyRequestLogger::new(Arc::clone(&proxy));

        let ap = AccessPoint::new("h", 1, Protocol::Ascii);
        logger.log(&logger_ctx(&ap, ReplyResult::Found));
        logger.log(&logger_ctx(&ap, ReplyResult::Timeout));

        assert_eq!(proxy.stats().backend_replies(), 2);
        assert_eq!(proxy.stats().backend_errors(), 1);
        assert_eq!(proxy.stats().backend_latency_us(), 900);
    }
}
