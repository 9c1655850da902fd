//! Vhisper core — the streaming push-to-talk recognition engine behind
//! Vhisper's C ABI. See the crate's `SPEC_FULL.md`/`DESIGN.md` for the full
//! design; in short: a `Pipeline` coordinates an `AudioSourcePort` and a
//! provider-polymorphic `RecognizerPort`, auto-reconnecting across Sessions
//! while the host holds the hot-key, and dispatches `Event`s. `ffi` exposes
//! all of that behind a stable C ABI for the host shell.

pub mod adapters;
pub mod domain;
pub mod error;
pub mod factory;
pub mod ffi;
pub mod pipeline;
pub mod ports;

pub use domain::{Config, Event, PipelineState};
pub use error::{CoreError, Result};
pub use pipeline::{EventCallback, Pipeline};

/// Semantic version of this crate, exposed verbatim by `ffi::version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
