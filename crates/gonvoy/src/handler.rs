//! Handler and filter traits.

use crate::chain::HandlerChain;
use crate::context::FilterContext;
use crate::error::Result;

/// One step of a filter, run in each phase it cares about.
///
/// Request phases run handlers in registration order, response phases in
/// reverse. Every phase method defaults to doing nothing.
pub trait HttpFilterHandler: Send {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// A disabled handler is dropped at registration.
    fn disable(&self) -> bool {
        false
    }

    fn on_request_header(&mut self, _ctx: &mut FilterContext) -> Result<()> {
        Ok(())
    }

    fn on_request_body(&mut self, _ctx: &mut FilterContext) -> Result<()> {
        Ok(())
    }

    fn on_response_header(&mut self, _ctx: &mut FilterContext) -> Result<()> {
        Ok(())
    }

    fn on_response_body(&mut self, _ctx: &mut FilterContext) -> Result<()> {
        Ok(())
    }
}

/// A filter instance, created once per stream by the registered factory.
pub trait HttpFilter: Send {
    /// Register this stream's handlers.
    fn on_begin(&mut self, ctx: &mut FilterContext, registrar: &mut HandlerRegistrar<'_>) -> Result<()>;

    /// Runs on the host log callback, after the stream is done.
    fn on_complete(&mut self, _ctx: &mut FilterContext) -> Result<()> {
        Ok(())
    }
}

/// Adds handlers to a stream's chain.
pub struct HandlerRegistrar<'a> {
    chain: &'a mut HandlerChain,
}

impl<'a> HandlerRegistrar<'a> {
    pub(crate) fn new(chain: &'a mut HandlerChain) -> Self {
        Self { chain }
    }

    /// Append `handler` unless it is disabled.
    pub fn register(&mut self, handler: impl HttpFilterHandler + 'static) -> &mut Self {
        self.chain.push(Box::new(handler));
        self
    }

    /// Append a boxed handler; `None` and disabled handlers are dropped.
    pub fn register_boxed(&mut self, handler: Option<Box<dyn HttpFilterHandler>>) -> &mut Self {
        if let Some(handler) = handler {
            self.chain.push(handler);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}
