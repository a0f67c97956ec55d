use crate::deferred::Clock;
use crate::observer::HostObserver;
use crate::{Error, Host, HostOptions, HostOutput};
use std::io::Write;
use std::rc::Rc;

/// A builder for creating a new host
/// Just a helper wrapper around `HostOptions` for `Host`
///
/// # Example
/// ```rust
/// use jsrt_host::{HostBuilder, ManualClock};
///
/// let host = HostBuilder::new()
///     .with_namespace("app")
///     .with_arguments(vec!["--fast".to_string()])
///     .with_clock(ManualClock::new())
///     .build()
///     .expect("Failed to create host");
/// ```
pub struct HostBuilder(HostOptions);
impl HostBuilder {
    /// Create a new host builder with default options
    #[must_use]
    pub fn new() -> Self {
        Self(HostOptions::default())
    }

    /// Set the name of the object holding `echo`, `runScript` and `arguments`
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl ToString) -> Self {
        self.0.namespace = namespace.to_string();
        self
    }

    /// Set the values scripts see as `host.arguments`
    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.0.arguments = arguments;
        self
    }

    /// Limit the engine heap to `bytes`
    /// Scripts that exceed it are terminated with a runtime exception
    #[must_use]
    pub fn with_max_heap_size(mut self, bytes: usize) -> Self {
        self.0.max_heap_size = Some(bytes);
        self
    }

    /// Set the time source used by `setTimeout`
    /// A [`crate::ManualClock`] makes draining instant and deterministic
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.0.clock = Rc::new(clock);
        self
    }

    /// Send `echo` output to `writer` instead of stdout
    #[must_use]
    pub fn with_output(mut self, writer: impl Write + 'static) -> Self {
        self.0.output = HostOutput::new(writer);
        self
    }

    /// Attach an observer for script and function boundaries
    #[must_use]
    pub fn with_observer(mut self, observer: Rc<dyn HostObserver>) -> Self {
        self.0.observer = observer;
        self
    }

    /// Do not bind `console.log`
    #[must_use]
    pub fn without_console(mut self) -> Self {
        self.0.console = false;
        self
    }

    /// Create a new host from the builder
    ///
    /// # Errors
    /// Will return an error if the engine cannot be created
    pub fn build(self) -> Result<Host, Error> {
        Host::new(self.0)
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}
