//! Closure-backed filters and handlers.

use gonvoy::{FilterContext, HandlerRegistrar, HttpFilter, HttpFilterHandler, Result};

type PhaseFn = Box<dyn FnMut(&mut FilterContext) -> Result<()> + Send>;
type BeginFn = Box<dyn for<'a> FnMut(&mut FilterContext, &mut HandlerRegistrar<'a>) -> Result<()> + Send>;

/// A handler assembled from closures. Phases without a closure do nothing.
#[derive(Default)]
pub struct FnHandler {
    name: String,
    disabled: bool,
    request_header: Option<PhaseFn>,
    request_body: Option<PhaseFn>,
    response_header: Option<PhaseFn>,
    response_body: Option<PhaseFn>,
}

impl FnHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Report the handler as disabled so the chain drops it.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn with_request_header(
        mut self,
        f: impl FnMut(&mut FilterContext) -> Result<()> + Send + 'static,
    ) -> Self {
        self.request_header = Some(Box::new(f));
        self
    }

    pub fn with_request_body(
        mut self,
        f: impl FnMut(&mut FilterContext) -> Result<()> + Send + 'static,
    ) -> Self {
        self.request_body = Some(Box::new(f));
        self
    }

    pub fn with_response_header(
        mut self,
        f: impl FnMut(&mut FilterContext) -> Result<()> + Send + 'static,
    ) -> Self {
        self.response_header = Some(Box::new(f));
        self
    }

    pub fn with_response_body(
        mut self,
        f: impl FnMut(&mut FilterContext) -> Result<()> + Send + 'static,
    ) -> Self {
        self.response_body = Some(Box::new(f));
        self
    }
}

fn call(f: &mut Option<PhaseFn>, ctx: &mut FilterContext) -> Result<()> {
    match f {
        Some(f) => f(ctx),
        None => Ok(()),
    }
}

impl HttpFilterHandler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn disable(&self) -> bool {
        self.disabled
    }

    fn on_request_header(&mut self, ctx: &mut FilterContext) -> Result<()> {
        call(&mut self.request_header, ctx)
    }

    fn on_request_body(&mut self, ctx: &mut FilterContext) -> Result<()> {
        call(&mut self.request_body, ctx)
    }

    fn on_response_header(&mut self, ctx: &mut FilterContext) -> Result<()> {
        call(&mut self.response_header, ctx)
    }

    fn on_response_body(&mut self, ctx: &mut FilterContext) -> Result<()> {
        call(&mut self.response_body, ctx)
    }
}

/// A filter whose `on_begin` is a closure.
pub struct FnFilter {
    begin: BeginFn,
    complete: Option<PhaseFn>,
}

impl FnFilter {
    pub fn new(
        begin: impl for<'a> FnMut(&mut FilterContext, &mut HandlerRegistrar<'a>) -> Result<()>
            + Send
            + 'static,
    ) -> Self {
        Self {
            begin: Box::new(begin),
            complete: None,
        }
    }

    /// A filter that registers `handlers` in order.
    pub fn with_handlers(handlers: Vec<FnHandler>) -> Self {
        let mut handlers = Some(handlers);
        Self::new(move |_ctx, registrar| {
            for handler in handlers.take().into_iter().flatten() {
                registrar.register(handler);
            }
            Ok(())
        })
    }

    pub fn with_complete(
        mut self,
        f: impl FnMut(&mut FilterContext) -> Result<()> + Send + 'static,
    ) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl HttpFilter for FnFilter {
    fn on_begin(&mut self, ctx: &mut FilterContext, registrar: &mut HandlerRegistrar<'_>) -> Result<()> {
        (self.begin)(ctx, registrar)
    }

    fn on_complete(&mut self, ctx: &mut FilterContext) -> Result<()> {
        call(&mut self.complete, ctx)
    }
}
