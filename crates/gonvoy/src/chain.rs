//! Handler chain execution.
//!
//! Request phases run handlers in registration order, response phases in
//! reverse order. The chain halts as soon as the context is committed, so a
//! handler that sends a local reply is the last one to run in that phase.

use crate::context::FilterContext;
use crate::error::Result;
use crate::handler::HttpFilterHandler;

/// How a chain traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every handler ran.
    Completed,
    /// The context was committed after the handler at `index` ran.
    Halted { index: usize },
}

impl ChainOutcome {
    pub fn is_halted(self) -> bool {
        matches!(self, ChainOutcome::Halted { .. })
    }
}

/// Ordered handlers of one stream.
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn HttpFilterHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` unless it reports itself disabled.
    pub fn push(&mut self, handler: Box<dyn HttpFilterHandler>) {
        if handler.disable() {
            tracing::debug!(handler = handler.name(), "skipping disabled handler");
            return;
        }
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn on_request_header(&mut self, ctx: &mut FilterContext) -> Result<ChainOutcome> {
        run(self.handlers.iter_mut().enumerate(), ctx, |h, ctx| {
            h.on_request_header(ctx)
        })
    }

    pub fn on_request_body(&mut self, ctx: &mut FilterContext) -> Result<ChainOutcome> {
        run(self.handlers.iter_mut().enumerate(), ctx, |h, ctx| {
            h.on_request_body(ctx)
        })
    }

    pub fn on_response_header(&mut self, ctx: &mut FilterContext) -> Result<ChainOutcome> {
        run(self.handlers.iter_mut().enumerate().rev(), ctx, |h, ctx| {
            h.on_response_header(ctx)
        })
    }

    pub fn on_response_body(&mut self, ctx: &mut FilterContext) -> Result<ChainOutcome> {
        run(self.handlers.iter_mut().enumerate().rev(), ctx, |h, ctx| {
            h.on_response_body(ctx)
        })
    }
}

fn run<'a, I, F>(handlers: I, ctx: &mut FilterContext, mut call: F) -> Result<ChainOutcome>
where
    I: Iterator<Item = (usize, &'a mut Box<dyn HttpFilterHandler>)>,
    F: FnMut(&mut Box<dyn HttpFilterHandler>, &mut FilterContext) -> Result<()>,
{
    for (index, handler) in handlers {
        call(handler, ctx)?;
        if ctx.is_committed() {
            tracing::debug!(handler = handler.name(), index, "context committed, chain halted");
            return Ok(ChainOutcome::Halted { index });
        }
    }
    Ok(ChainOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOptions, ConfigResolver};
    use crate::error::{Error, ErrorKind};
    use crate::reply::LocalReplyOptions;
    use crate::testing::RecordingCallbacks;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Trace = Arc<Mutex<Vec<String>>>;

    struct Step {
        name: &'static str,
        trace: Trace,
        reply_on_request: bool,
        fail_on_request: bool,
        disabled: bool,
    }

    impl Step {
        fn new(name: &'static str, trace: &Trace) -> Self {
            Self {
                name,
                trace: Arc::clone(trace),
                reply_on_request: false,
                fail_on_request: false,
                disabled: false,
            }
        }
    }

    impl HttpFilterHandler for Step {
        fn name(&self) -> &str {
            self.name
        }

        fn disable(&self) -> bool {
            self.disabled
        }

        fn on_request_header(&mut self, ctx: &mut FilterContext) -> Result<()> {
            self.trace.lock().push(format!("req:{}", self.name));
            if self.fail_on_request {
                return Err(Error::AccessDenied);
            }
            if self.reply_on_request {
                ctx.string(403, "stop", LocalReplyOptions::new())?;
            }
            Ok(())
        }

        fn on_response_header(&mut self, _ctx: &mut FilterContext) -> Result<()> {
            self.trace.lock().push(format!("resp:{}", self.name));
            Ok(())
        }
    }

    fn context() -> FilterContext {
        let config = ConfigResolver::new("chain", ConfigOptions::new())
            .parse(b"")
            .unwrap();
        FilterContext::new(Arc::new(config), Box::new(RecordingCallbacks::new()))
    }

    #[test]
    fn request_is_fifo_response_is_lifo() {
        let trace = Trace::default();
        let mut chain = HandlerChain::new();
        for name in ["a", "b", "c"] {
            chain.push(Box::new(Step::new(name, &trace)));
        }
        let mut ctx = context();

        assert_eq!(chain.on_request_header(&mut ctx).unwrap(), ChainOutcome::Completed);
        assert_eq!(chain.on_response_header(&mut ctx).unwrap(), ChainOutcome::Completed);
        assert_eq!(
            *trace.lock(),
            ["req:a", "req:b", "req:c", "resp:c", "resp:b", "resp:a"]
        );
    }

    #[test]
    fn disabled_handlers_are_dropped() {
        let trace = Trace::default();
        let mut chain = HandlerChain::new();
        chain.push(Box::new(Step::new("a", &trace)));
        chain.push(Box::new(Step {
            disabled: true,
            ..Step::new("b", &trace)
        }));

        assert_eq!(chain.names(), ["a"]);
    }

    #[test]
    fn committed_context_halts_chain() {
        let trace = Trace::default();
        let mut chain = HandlerChain::new();
        chain.push(Box::new(Step::new("a", &trace)));
        chain.push(Box::new(Step {
            reply_on_request: true,
            ..Step::new("b", &trace)
        }));
        chain.push(Box::new(Step::new("c", &trace)));
        let mut ctx = context();

        let outcome = chain.on_request_header(&mut ctx).unwrap();
        assert_eq!(outcome, ChainOutcome::Halted { index: 1 });
        assert!(outcome.is_halted());
        assert_eq!(*trace.lock(), ["req:a", "req:b"]);
    }

    #[test]
    fn error_stops_traversal() {
        let trace = Trace::default();
        let mut chain = HandlerChain::new();
        chain.push(Box::new(Step {
            fail_on_request: true,
            ..Step::new("a", &trace)
        }));
        chain.push(Box::new(Step::new("b", &trace)));
        let mut ctx = context();

        let err = chain.on_request_header(&mut ctx).unwrap_err();
        assert!(err.is(ErrorKind::AccessDenied));
        assert_eq!(*trace.lock(), ["req:a"]);
    }
}
