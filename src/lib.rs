//! # Minimal embedding host for a JavaScript engine
//!
//! Creates one engine and context, runs classic scripts in it, exposes host
//! callbacks to those scripts and drives a small `setTimeout` loop.
//!
//! Scripts see:
//! - `host.echo(...values)` writes its arguments, joined by spaces, as one line
//! - `host.runScript(path)` runs another file in the same context and returns its value
//! - `host.arguments`, the arguments given to the host
//! - `setTimeout(callback, delayMillis)`, fired by [`Host::drain`]
//! - `console.log`, the same function as `host.echo`
//!
//! ```rust
//! use jsrt_host::{HostBuilder, ManualClock, SharedBuffer, SourceUnit};
//!
//! # fn main() -> Result<(), jsrt_host::Error> {
//! let output = SharedBuffer::default();
//! let mut host = HostBuilder::new()
//!     .with_clock(ManualClock::new())
//!     .with_output(output.clone())
//!     .build()?;
//!
//! host.execute(&SourceUnit::new("timers.js", "
//!     setTimeout(() => host.echo('second'), 5);
//!     setTimeout(() => host.echo('first'), 0);
//! "))?;
//!
//! assert_eq!(output.lines(), vec!["first", "second"]);
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

mod bindings;
mod builtins;
mod engine;
mod loader;
mod observer;
mod output;
mod traits;

mod script;
pub use script::{SourceContext, SourceUnit};

/// The `setTimeout` queue and the clocks that drive it
pub mod deferred;
pub use deferred::{Clock, ManualClock, MonotonicClock, QueueState};

mod host;
pub use host::{Host, HostOptions};

mod host_builder;
pub use host_builder::HostBuilder;

pub use bindings::{HostCall, HostFunction, Namespace};
pub use engine::{ActivationGuard, ActivationSlot, EngineHandle, EngineOptions};
pub use observer::{HostObserver, NoopObserver, TracingObserver};
pub use output::{HostOutput, SharedBuffer};

/// Holds the error types raised by the host
pub mod error;
pub use error::{DeferredTaskError, EngineError, Error, ScriptError};

pub use deno_core;
