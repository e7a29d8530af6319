//! Per-stream pipeline bound to one host filter instance.
//!
//! The host calls the four flow callbacks, then `on_log`, then
//! `on_destroy`. Every call into filter code goes through [`guard`], which
//! turns a panic into [`Error::Panic`] so it can be answered like any other
//! error instead of taking the worker down.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use gonvoy_telemetry::{log_handler_panic, log_phase_skipped, log_stream_completed};

use crate::chain::HandlerChain;
use crate::config::ResolvedConfig;
use crate::context::FilterContext;
use crate::error::{Error, Result};
use crate::handler::{HttpFilter, HandlerRegistrar};
use crate::host::{
    BufferInstance, DestroyReason, FilterCallbacks, HostStatus, LogLevel, RequestHeaderMap,
    ResponseHeaderMap,
};
use crate::phase::{
    PhaseStrategy, RequestBodyPhase, RequestHeaderPhase, ResponseBodyPhase, ResponseHeaderPhase,
};

/// Builds a fresh filter for every stream.
pub type FilterFactoryFn = Arc<dyn Fn() -> Box<dyn HttpFilter> + Send + Sync>;

/// Decoder-side progress of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    HeadersDone,
    BodyDone,
    LogDone,
    Destroyed,
}

/// Encoder-side progress of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Init,
    RespHeadersDone,
    RespBodyDone,
}

/// Run `f`, converting a panic into [`Error::Panic`].
pub fn guard<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

struct Stream {
    ctx: FilterContext,
    chain: HandlerChain,
    filter: Option<Box<dyn HttpFilter>>,
    /// `on_begin` failure, answered at the first request header callback.
    init_error: Option<Error>,
}

/// The pipeline of one stream.
pub struct FilterPipeline {
    filter_name: Arc<str>,
    state: StreamState,
    encoder_state: EncoderState,
    stream: Option<Box<Stream>>,
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("filter_name", &self.filter_name)
            .field("state", &self.state)
            .field("encoder_state", &self.encoder_state)
            .field("pass_through", &self.stream.is_none())
            .finish()
    }
}

impl FilterPipeline {
    /// Build the stream's filter and let it register its handlers.
    pub(crate) fn new(
        config: Arc<ResolvedConfig>,
        factory: &FilterFactoryFn,
        callbacks: Box<dyn FilterCallbacks>,
    ) -> Self {
        let filter_name: Arc<str> = Arc::from(config.filter_name());
        let mut ctx = FilterContext::new(config, callbacks);
        let mut chain = HandlerChain::new();
        let mut filter = None;

        let begin = guard(|| {
            let mut instance = factory();
            let result = instance.on_begin(&mut ctx, &mut HandlerRegistrar::new(&mut chain));
            filter = Some(instance);
            result
        });

        let init_error = match begin {
            Ok(()) => None,
            Err(err) => {
                report_panic(&ctx, &"on_begin", &err);
                tracing::warn!(filter = %filter_name, error = %err, "filter on_begin failed");
                Some(err)
            }
        };

        Self {
            filter_name,
            state: StreamState::Init,
            encoder_state: EncoderState::Init,
            stream: Some(Box::new(Stream {
                ctx,
                chain,
                filter,
                init_error,
            })),
        }
    }

    /// A pipeline that lets everything through without running filter code.
    pub fn pass_through(filter_name: impl Into<String>) -> Self {
        Self {
            filter_name: Arc::from(filter_name.into()),
            state: StreamState::Init,
            encoder_state: EncoderState::Init,
            stream: None,
        }
    }

    pub fn filter_name(&self) -> &str {
        &self.filter_name
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn encoder_state(&self) -> EncoderState {
        self.encoder_state
    }

    /// True when no filter code runs: a pass-through or destroyed pipeline.
    pub fn is_pass_through(&self) -> bool {
        self.stream.is_none()
    }

    pub fn context(&self) -> Option<&FilterContext> {
        self.stream.as_deref().map(|s| &s.ctx)
    }

    pub fn on_request_header(
        &mut self,
        headers: Box<dyn RequestHeaderMap>,
        end_stream: bool,
    ) -> HostStatus {
        let status = self.run(RequestHeaderPhase {
            headers,
            end_stream,
        });
        self.advance(StreamState::HeadersDone);
        status
    }

    pub fn on_request_body(&mut self, buffer: Box<dyn BufferInstance>, end_stream: bool) -> HostStatus {
        let status = self.run(RequestBodyPhase { buffer, end_stream });
        if end_stream {
            self.advance(StreamState::BodyDone);
        }
        status
    }

    pub fn on_response_header(
        &mut self,
        headers: Box<dyn ResponseHeaderMap>,
        end_stream: bool,
    ) -> HostStatus {
        let status = self.run(ResponseHeaderPhase {
            headers,
            end_stream,
        });
        if self.state != StreamState::Destroyed {
            self.encoder_state = EncoderState::RespHeadersDone;
        }
        status
    }

    pub fn on_response_body(&mut self, buffer: Box<dyn BufferInstance>, end_stream: bool) -> HostStatus {
        let status = self.run(ResponseBodyPhase { buffer, end_stream });
        if end_stream && self.state != StreamState::Destroyed {
            self.encoder_state = EncoderState::RespBodyDone;
        }
        status
    }

    /// The host log callback: the stream is over, run `on_complete`.
    pub fn on_log(&mut self) {
        if self.state == StreamState::Destroyed {
            return;
        }
        self.state = StreamState::LogDone;

        let Some(stream) = self.stream.as_deref_mut() else {
            return;
        };

        if let Some(filter) = stream.filter.as_mut() {
            let ctx = &mut stream.ctx;
            if let Err(err) = guard(|| filter.on_complete(ctx)) {
                report_panic(ctx, &"on_complete", &err);
                tracing::warn!(filter = %self.filter_name, error = %err, "filter on_complete failed");
                ctx.log(LogLevel::Warn, &format!("on_complete failed: {}", err));
            }
        }

        log_stream_completed!(
            filter = %self.filter_name,
            status = %stream.ctx.status(),
            committed = stream.ctx.is_committed()
        );
    }

    /// Release everything. Safe to call more than once.
    pub fn on_destroy(&mut self, reason: DestroyReason) {
        if self.state == StreamState::Destroyed {
            return;
        }
        tracing::trace!(filter = %self.filter_name, ?reason, "filter destroyed");
        self.state = StreamState::Destroyed;
        self.stream = None;
    }

    fn advance(&mut self, to: StreamState) {
        if self.state != StreamState::Destroyed {
            self.state = to;
        }
    }

    fn run<S: PhaseStrategy>(&mut self, strategy: S) -> HostStatus {
        let Some(stream) = self.stream.as_deref_mut() else {
            return HostStatus::Continue;
        };
        let phase = strategy.phase();

        if let Some(err) = stream.init_error.take() {
            return funnel(&mut stream.ctx, &phase, err);
        }

        if stream.ctx.is_committed() || !stream.ctx.config().feature_gates().allows(phase) {
            log_phase_skipped!(
                filter = %self.filter_name,
                phase = %phase,
                committed = stream.ctx.is_committed()
            );
            return HostStatus::Continue;
        }

        let ctx = &mut stream.ctx;
        let chain = &mut stream.chain;
        match guard(|| strategy.execute(ctx, chain)) {
            Ok(action) => action.status(ctx),
            Err(err) => funnel(ctx, &phase, err),
        }
    }
}

/// Hand `err` to the stream's error handler.
fn funnel(ctx: &mut FilterContext, boundary: &dyn fmt::Display, err: Error) -> HostStatus {
    report_panic(ctx, boundary, &err);

    let handler = ctx.error_handler();
    match guard(|| Ok(handler.handle(ctx, err))) {
        Ok(status) => status,
        Err(handler_err) => {
            report_panic(ctx, &"error handler", &handler_err);
            HostStatus::Continue
        }
    }
}

fn report_panic(ctx: &FilterContext, boundary: &dyn fmt::Display, err: &Error) {
    let Error::Panic(message) = err else {
        return;
    };
    log_handler_panic!(
        filter = ctx.filter_name(),
        boundary = %boundary,
        panic = %message,
        "panic during {} handling",
        boundary
    );
    ctx.log(
        LogLevel::Error,
        &format!("panic during {} handling: {}", boundary, message),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOptions, ConfigResolver};
    use crate::handler::HttpFilterHandler;
    use crate::reply::{ErrorBody, LocalReplyOptions};
    use crate::testing::{MemoryBuffer, MemoryHeaders, RecordingCallbacks};
    use parking_lot::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Default)]
    struct Behaviour {
        panic_at: Option<&'static str>,
        reply_at_request: bool,
        fail_begin: bool,
        trace: Trace,
    }

    struct Probe(Behaviour);

    impl HttpFilterHandler for Probe {
        fn on_request_header(&mut self, ctx: &mut FilterContext) -> Result<()> {
            self.0.trace.lock().push("request_header".into());
            if self.0.panic_at == Some("header") {
                panic!("header exploded");
            }
            if self.0.reply_at_request {
                ctx.string(403, "access denied", LocalReplyOptions::new())?;
            }
            Ok(())
        }

        fn on_request_body(&mut self, _ctx: &mut FilterContext) -> Result<()> {
            self.0.trace.lock().push("request_body".into());
            Ok(())
        }

        fn on_response_header(&mut self, _ctx: &mut FilterContext) -> Result<()> {
            self.0.trace.lock().push("response_header".into());
            if self.0.panic_at == Some("response") {
                panic!("{}", String::from("response exploded"));
            }
            Ok(())
        }
    }

    struct ProbeFilter(Behaviour);

    impl HttpFilter for ProbeFilter {
        fn on_begin(&mut self, _ctx: &mut FilterContext, registrar: &mut HandlerRegistrar<'_>) -> Result<()> {
            if self.0.fail_begin {
                return Err(Error::Unauthorized.context("bootstrap"));
            }
            registrar.register(Probe(self.0.clone()));
            Ok(())
        }

        fn on_complete(&mut self, _ctx: &mut FilterContext) -> Result<()> {
            self.0.trace.lock().push("complete".into());
            Ok(())
        }
    }

    fn pipeline(behaviour: Behaviour, options: ConfigOptions) -> (FilterPipeline, RecordingCallbacks) {
        let config = ConfigResolver::new("probe", options).parse(b"").unwrap();
        let factory: FilterFactoryFn =
            Arc::new(move || Box::new(ProbeFilter(behaviour.clone())) as Box<dyn HttpFilter>);
        let callbacks = RecordingCallbacks::new();
        let pipeline = FilterPipeline::new(Arc::new(config), &factory, Box::new(callbacks.clone()));
        (pipeline, callbacks)
    }

    fn get() -> Box<MemoryHeaders> {
        Box::new(MemoryHeaders::request("GET", "svc.local", "/"))
    }

    #[test]
    fn guard_converts_panics() {
        let err = guard::<()>(|| panic!("boom")).unwrap_err();
        assert!(matches!(err, Error::Panic(ref m) if m == "boom"));

        let ok = guard(|| Ok(7)).unwrap();
        assert_eq!(ok, 7);
    }

    #[test]
    fn full_stream_in_order() {
        let behaviour = Behaviour::default();
        let trace = behaviour.trace.clone();
        let (mut pipeline, _) = pipeline(behaviour, ConfigOptions::new());

        assert_eq!(pipeline.on_request_header(get(), true), HostStatus::Continue);
        assert_eq!(pipeline.state(), StreamState::HeadersDone);
        assert_eq!(
            pipeline.on_response_header(Box::new(MemoryHeaders::response(200)), true),
            HostStatus::Continue
        );
        assert_eq!(pipeline.encoder_state(), EncoderState::RespHeadersDone);
        pipeline.on_log();
        assert_eq!(pipeline.state(), StreamState::LogDone);

        assert_eq!(*trace.lock(), ["request_header", "response_header", "complete"]);
    }

    #[test]
    fn header_panic_becomes_internal_error_reply() {
        let behaviour = Behaviour {
            panic_at: Some("header"),
            ..Default::default()
        };
        let (mut pipeline, callbacks) = pipeline(behaviour, ConfigOptions::new());

        assert_eq!(pipeline.on_request_header(get(), true), HostStatus::LocalReply);

        let reply = &callbacks.replies()[0];
        assert_eq!(reply.status_code, 500);
        let body: ErrorBody = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body.code, "RUNTIME_ERROR");
        assert!(callbacks
            .logs()
            .iter()
            .any(|(_, msg)| msg.contains("panic during request header handling: header exploded")));
    }

    #[test]
    fn response_panic_with_string_payload() {
        let behaviour = Behaviour {
            panic_at: Some("response"),
            ..Default::default()
        };
        let (mut pipeline, callbacks) = pipeline(behaviour, ConfigOptions::new());
        pipeline.on_request_header(get(), true);

        let status = pipeline.on_response_header(Box::new(MemoryHeaders::response(200)), true);
        assert_eq!(status, HostStatus::LocalReply);
        assert!(callbacks
            .logs()
            .iter()
            .any(|(_, msg)| msg.contains("panic during response header handling: response exploded")));
    }

    #[test]
    fn committed_is_sticky_across_phases() {
        let behaviour = Behaviour {
            reply_at_request: true,
            ..Default::default()
        };
        let trace = behaviour.trace.clone();
        let (mut pipeline, callbacks) = pipeline(behaviour, ConfigOptions::new());

        assert_eq!(pipeline.on_request_header(get(), true), HostStatus::LocalReply);
        assert_eq!(
            pipeline.on_response_header(Box::new(MemoryHeaders::response(403)), false),
            HostStatus::Continue
        );
        assert_eq!(
            pipeline.on_response_body(Box::new(MemoryBuffer::from("access denied")), true),
            HostStatus::Continue
        );
        assert_eq!(callbacks.replies().len(), 1);
        assert_eq!(*trace.lock(), ["request_header"]);
    }

    #[test]
    fn on_begin_error_is_reported_at_first_header() {
        let behaviour = Behaviour {
            fail_begin: true,
            ..Default::default()
        };
        let (mut pipeline, callbacks) = pipeline(behaviour, ConfigOptions::new());
        assert!(callbacks.replies().is_empty());

        assert_eq!(pipeline.on_request_header(get(), true), HostStatus::LocalReply);
        assert_eq!(callbacks.replies()[0].status_code, 401);
    }

    #[test]
    fn destroy_is_idempotent_and_final() {
        let behaviour = Behaviour::default();
        let trace = behaviour.trace.clone();
        let (mut pipeline, _) = pipeline(behaviour, ConfigOptions::new());

        pipeline.on_destroy(DestroyReason::Terminate);
        pipeline.on_destroy(DestroyReason::Normal);
        assert_eq!(pipeline.state(), StreamState::Destroyed);
        assert!(pipeline.is_pass_through());

        assert_eq!(pipeline.on_request_header(get(), true), HostStatus::Continue);
        pipeline.on_log();
        assert_eq!(pipeline.state(), StreamState::Destroyed);
        assert!(trace.lock().is_empty());
    }

    #[test]
    fn pass_through_continues() {
        let mut pipeline = FilterPipeline::pass_through("broken");
        assert_eq!(pipeline.on_request_header(get(), false), HostStatus::Continue);
        assert_eq!(
            pipeline.on_request_body(Box::new(MemoryBuffer::from("x")), true),
            HostStatus::Continue
        );
        assert_eq!(pipeline.state(), StreamState::BodyDone);
    }

    #[test]
    fn disabled_gate_skips_phase() {
        let behaviour = Behaviour::default();
        let trace = behaviour.trace.clone();
        let config = ConfigResolver::new("probe", ConfigOptions::new())
            .parse(b"")
            .unwrap()
            .with_feature_gates(crate::config::FeatureGates {
                request_header: false,
                ..Default::default()
            });
        let factory: FilterFactoryFn =
            Arc::new(move || Box::new(ProbeFilter(behaviour.clone())) as Box<dyn HttpFilter>);
        let mut pipeline =
            FilterPipeline::new(Arc::new(config), &factory, Box::new(RecordingCallbacks::new()));

        assert_eq!(pipeline.on_request_header(get(), true), HostStatus::Continue);
        pipeline.on_response_header(Box::new(MemoryHeaders::response(200)), true);
        assert_eq!(*trace.lock(), ["response_header"]);
    }
}
