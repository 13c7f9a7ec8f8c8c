//! Instrumentation around each logical call

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use rand::{distributions::Alphanumeric, Rng};
use reqwest::{header::HeaderMap, StatusCode};

use crate::Params;

/// State carried from [`before_call`][CallHooks::before_call] to
/// [`after_call`][CallHooks::after_call] of a single logical call
///
/// Hooks store whatever they need in the typed extensions. The executor
/// records the outcome of the last attempt.
#[derive(Debug, Default)]
pub struct CallContext {
    extensions: http::Extensions,
    status: Option<StatusCode>,
    headers: Option<HeaderMap>,
    attempts: u8,
}

impl CallContext {
    /// Stores a value for later hooks, returning any value of the same type
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.extensions.insert(value)
    }

    /// Gets a value stored by an earlier hook
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get()
    }

    /// Removes a value stored by an earlier hook
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions.remove()
    }

    /// The status of the last response, if any response was received
    #[inline]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The headers of the last response, if any response was received
    #[inline]
    pub fn response_headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// The number of requests sent for this call
    #[inline]
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Whether the last response had a success status
    #[inline]
    pub fn succeeded(&self) -> bool {
        self.status.map_or(false, |s| s.is_success())
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub(crate) fn record_response(&mut self, status: StatusCode, headers: HeaderMap) {
        self.status = Some(status);
        self.headers = Some(headers);
    }
}

/// Callbacks invoked once before and once after every logical call
///
/// A call that is retried after authenticating again is still one logical
/// call. `after_call` runs even if the call fails, panics, or is dropped
/// before completing.
pub trait CallHooks: Send + Sync {
    /// Invoked before the first request is sent
    ///
    /// Headers added here are sent with every attempt.
    fn before_call(
        &self,
        _context: &mut CallContext,
        _path: &str,
        _query: &Params,
        _headers: &mut Params,
    ) {
    }

    /// Invoked once the call has finished
    fn after_call(
        &self,
        _context: &mut CallContext,
        _path: &str,
        _query: &Params,
        _headers: &Params,
    ) {
    }
}

/// Hooks that do nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl CallHooks for NoopHooks {}

impl<H: CallHooks + ?Sized> CallHooks for Arc<H> {
    fn before_call(&self, context: &mut CallContext, path: &str, query: &Params, headers: &mut Params) {
        (**self).before_call(context, path, query, headers)
    }

    fn after_call(&self, context: &mut CallContext, path: &str, query: &Params, headers: &Params) {
        (**self).after_call(context, path, query, headers)
    }
}

/// Runs `A` around `B`
impl<A: CallHooks, B: CallHooks> CallHooks for (A, B) {
    fn before_call(&self, context: &mut CallContext, path: &str, query: &Params, headers: &mut Params) {
        self.0.before_call(context, path, query, headers);
        self.1.before_call(context, path, query, headers);
    }

    fn after_call(&self, context: &mut CallContext, path: &str, query: &Params, headers: &Params) {
        self.1.after_call(context, path, query, headers);
        self.0.after_call(context, path, query, headers);
    }
}

#[derive(Clone, Copy)]
struct StartedAt(Instant);

/// Emits a `tracing` event for every call
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingHooks;

impl CallHooks for TracingHooks {
    fn before_call(&self, context: &mut CallContext, path: &str, query: &Params, _: &mut Params) {
        context.insert(StartedAt(Instant::now()));
        tracing::debug!(path, query = ?query, "calling API");
    }

    fn after_call(&self, context: &mut CallContext, path: &str, _: &Params, _: &Params) {
        let elapsed_ms = context
            .get::<StartedAt>()
            .map_or(0, |started| started.0.elapsed().as_millis() as u64);
        let status = context.status().map(|s| s.as_u16());

        if context.succeeded() {
            tracing::info!(
                path,
                status,
                attempts = context.attempts(),
                elapsed_ms,
                "API call finished"
            );
        } else {
            tracing::warn!(
                path,
                status,
                attempts = context.attempts(),
                elapsed_ms,
                "API call failed"
            );
        }
    }
}

/// A sink for API call metrics
pub trait ApiMetrics: Send + Sync {
    /// A call to `path` started
    fn start_api_call(&self, path: &str);

    /// A call to `path` finished after `elapsed`
    fn finish_api_call(&self, path: &str, elapsed: Duration, success: bool);
}

impl<R: ApiMetrics + ?Sized> ApiMetrics for Arc<R> {
    fn start_api_call(&self, path: &str) {
        (**self).start_api_call(path)
    }

    fn finish_api_call(&self, path: &str, elapsed: Duration, success: bool) {
        (**self).finish_api_call(path, elapsed, success)
    }
}

/// Reports every call to an [`ApiMetrics`] sink
///
/// A call counts as successful if its last response had a success status.
#[derive(Clone, Debug, Default)]
pub struct MetricsHooks<R> {
    metrics: R,
}

impl<R> MetricsHooks<R> {
    /// Constructs hooks reporting to `metrics`
    pub fn new(metrics: R) -> Self {
        Self { metrics }
    }
}

#[derive(Clone, Copy)]
struct MetricsStartedAt(Instant);

impl<R: ApiMetrics> CallHooks for MetricsHooks<R> {
    fn before_call(&self, context: &mut CallContext, path: &str, _: &Params, _: &mut Params) {
        context.insert(MetricsStartedAt(Instant::now()));
        self.metrics.start_api_call(path);
    }

    fn after_call(&self, context: &mut CallContext, path: &str, _: &Params, _: &Params) {
        let elapsed = context
            .get::<MetricsStartedAt>()
            .map(|started| started.0.elapsed())
            .unwrap_or_default();
        self.metrics
            .finish_api_call(path, elapsed, context.succeeded());
    }
}

/// The header carrying the trace id of a call
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

const TRACE_ID_LEN: usize = 16;

/// The trace id sent with a call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceId(pub String);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRACE_ID_LEN)
        .map(char::from)
        .collect()
}

/// Sends a trace id with every call
///
/// A trace id supplied by the caller is extended with a random suffix, as
/// `{caller}:{suffix}`, so that each call is distinguishable. Without one, a
/// random id is generated. The id is also stored in the [`CallContext`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceIdHooks;

impl CallHooks for TraceIdHooks {
    fn before_call(&self, context: &mut CallContext, _: &str, _: &Params, headers: &mut Params) {
        let id = match headers.get(TRACE_ID_HEADER) {
            Some(caller) => format!("{caller}:{}", random_id()),
            None => random_id(),
        };

        let stale: Vec<String> = headers
            .present()
            .filter(|(k, _)| k.eq_ignore_ascii_case(TRACE_ID_HEADER))
            .map(|(k, _)| k.to_owned())
            .collect();
        for key in stale {
            headers.insert(key, None);
        }

        headers.insert(TRACE_ID_HEADER, Some(id.clone()));
        context.insert(TraceId(id));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorded {
        events: Mutex<Vec<String>>,
    }

    impl ApiMetrics for Recorded {
        fn start_api_call(&self, path: &str) {
            self.events.lock().unwrap().push(format!("start {path}"));
        }

        fn finish_api_call(&self, path: &str, _: Duration, success: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finish {path} {success}"));
        }
    }

    struct Named(&'static str, Arc<Mutex<Vec<String>>>);

    impl CallHooks for Named {
        fn before_call(&self, _: &mut CallContext, _: &str, _: &Params, _: &mut Params) {
            self.1.lock().unwrap().push(format!("before {}", self.0));
        }

        fn after_call(&self, _: &mut CallContext, _: &str, _: &Params, _: &Params) {
            self.1.lock().unwrap().push(format!("after {}", self.0));
        }
    }

    #[test]
    fn tuples_nest_their_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = (Named("outer", log.clone()), Named("inner", log.clone()));

        let mut context = CallContext::default();
        let mut headers = Params::new();
        hooks.before_call(&mut context, "/p", &Params::new(), &mut headers);
        hooks.after_call(&mut context, "/p", &Params::new(), &headers);

        assert_eq!(
            *log.lock().unwrap(),
            ["before outer", "before inner", "after inner", "after outer"]
        );
    }

    #[test]
    fn metrics_report_success_from_the_last_status() {
        let hooks = MetricsHooks::new(Arc::new(Recorded::default()));
        let mut context = CallContext::default();
        let mut headers = Params::new();

        hooks.before_call(&mut context, "/v1/info", &Params::new(), &mut headers);
        context.record_response(StatusCode::UNAUTHORIZED, HeaderMap::new());
        context.record_response(StatusCode::OK, HeaderMap::new());
        hooks.after_call(&mut context, "/v1/info", &Params::new(), &headers);

        assert_eq!(
            *hooks.metrics.events.lock().unwrap(),
            ["start /v1/info", "finish /v1/info true"]
        );
    }

    #[test]
    fn trace_id_is_generated_when_absent() {
        let mut context = CallContext::default();
        let mut headers = Params::new();

        TraceIdHooks.before_call(&mut context, "/p", &Params::new(), &mut headers);

        let sent = headers.get(TRACE_ID_HEADER).unwrap();
        assert_eq!(sent.len(), TRACE_ID_LEN);
        assert!(sent.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(context.get::<TraceId>().map(|t| t.0.as_str()), Some(sent));
    }

    #[test]
    fn caller_trace_id_is_extended() {
        let mut context = CallContext::default();
        let mut headers = Params::new().with("x-trace-id", "webhook-42");

        TraceIdHooks.before_call(&mut context, "/p", &Params::new(), &mut headers);

        let sent: Vec<_> = headers.present().collect();
        assert_eq!(sent.len(), 1);
        let (name, value) = sent[0];
        assert_eq!(name, TRACE_ID_HEADER);
        assert!(value.starts_with("webhook-42:"));
        assert_eq!(value.len(), "webhook-42:".len() + TRACE_ID_LEN);
    }

    #[test]
    fn context_without_response_did_not_succeed() {
        let context = CallContext::default();
        assert!(!context.succeeded());
        assert_eq!(context.attempts(), 0);
    }
}
