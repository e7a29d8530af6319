//! Test harness for gonvoy filters.
//!
//! Provides `FilterHarness` to register a filter and resolve its
//! configuration against an in-memory host, `StreamDriver` to play a
//! stream through the resulting pipeline, and closure-based filters and
//! handlers for writing scenarios without boilerplate.

pub mod driver;
pub mod handlers;

pub use driver::{FilterHarness, HarnessError, StreamDriver, TYPE_URL};
pub use handlers::{FnFilter, FnHandler};

pub use gonvoy::testing::{MemoryBuffer, MemoryHeaders, MemoryMetricsHost, RecordingCallbacks};
