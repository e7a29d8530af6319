//! Phase strategies.
//!
//! Each host flow callback maps to one strategy. A strategy moves the
//! callback's arguments into the context, runs the chain and returns an
//! [`Action`], which the pipeline projects onto a [`HostStatus`].

use std::fmt;

use crate::chain::HandlerChain;
use crate::context::FilterContext;
use crate::error::Result;
use crate::host::{BufferInstance, HostStatus, RequestHeaderMap, ResponseHeaderMap};

/// The four flow slots of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    RequestHeader,
    RequestBody,
    ResponseHeader,
    ResponseBody,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::RequestHeader => "request header",
            Phase::RequestBody => "request body",
            Phase::ResponseHeader => "response header",
            Phase::ResponseBody => "response body",
        };
        f.write_str(name)
    }
}

/// Verdict of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The phase did not run.
    Skip,
    /// The phase ran; report the context status.
    Continue,
    /// Hold the stream and buffer until the body is complete.
    Pause,
}

impl Action {
    /// Host status for this action.
    pub fn status(self, ctx: &FilterContext) -> HostStatus {
        match self {
            Action::Skip => HostStatus::Continue,
            Action::Continue => ctx.status(),
            Action::Pause => HostStatus::StopAndBuffer,
        }
    }
}

/// One phase's behaviour.
pub trait PhaseStrategy {
    fn phase(&self) -> Phase;

    fn execute(self, ctx: &mut FilterContext, chain: &mut HandlerChain) -> Result<Action>;
}

pub struct RequestHeaderPhase {
    pub headers: Box<dyn RequestHeaderMap>,
    pub end_stream: bool,
}

impl PhaseStrategy for RequestHeaderPhase {
    fn phase(&self) -> Phase {
        Phase::RequestHeader
    }

    fn execute(self, ctx: &mut FilterContext, chain: &mut HandlerChain) -> Result<Action> {
        ctx.install_request_headers(self.headers)?;
        let route_before = ctx.route_key();

        if chain.on_request_header(ctx)?.is_halted() {
            return Ok(Action::Continue);
        }

        if ctx.config().auto_reload_route() && ctx.route_key() != route_before {
            ctx.reload_route();
        }

        if !self.end_stream && ctx.is_request_body_writable() {
            return Ok(Action::Pause);
        }
        Ok(Action::Continue)
    }
}

pub struct RequestBodyPhase {
    pub buffer: Box<dyn BufferInstance>,
    pub end_stream: bool,
}

impl PhaseStrategy for RequestBodyPhase {
    fn phase(&self) -> Phase {
        Phase::RequestBody
    }

    fn execute(self, ctx: &mut FilterContext, chain: &mut HandlerChain) -> Result<Action> {
        if !ctx.is_request_body_readable() {
            return Ok(Action::Skip);
        }

        if !ctx.request_body_buffer().push_chunk(self.buffer, self.end_stream) {
            return Ok(Action::Pause);
        }

        chain.on_request_body(ctx)?;
        Ok(Action::Continue)
    }
}

pub struct ResponseHeaderPhase {
    pub headers: Box<dyn ResponseHeaderMap>,
    pub end_stream: bool,
}

impl PhaseStrategy for ResponseHeaderPhase {
    fn phase(&self) -> Phase {
        Phase::ResponseHeader
    }

    fn execute(self, ctx: &mut FilterContext, chain: &mut HandlerChain) -> Result<Action> {
        ctx.install_response_headers(self.headers)?;

        if chain.on_response_header(ctx)?.is_halted() {
            return Ok(Action::Continue);
        }

        // Readable, not writable: the headers must wait for the body either way.
        if !self.end_stream && ctx.is_response_body_readable() {
            return Ok(Action::Pause);
        }
        Ok(Action::Continue)
    }
}

pub struct ResponseBodyPhase {
    pub buffer: Box<dyn BufferInstance>,
    pub end_stream: bool,
}

impl PhaseStrategy for ResponseBodyPhase {
    fn phase(&self) -> Phase {
        Phase::ResponseBody
    }

    fn execute(self, ctx: &mut FilterContext, chain: &mut HandlerChain) -> Result<Action> {
        if !ctx.is_response_body_readable() {
            return Ok(Action::Skip);
        }

        if !ctx.response_body_buffer().push_chunk(self.buffer, self.end_stream) {
            return Ok(Action::Pause);
        }

        chain.on_response_body(ctx)?;
        Ok(Action::Continue)
    }
}
