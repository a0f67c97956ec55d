use crate::bindings::{self, Binding, BindingTable, HostCall, HostFunction, Namespace};
use crate::builtins::{self, ScheduledCallback};
use crate::deferred::{Clock, DeferredQueue, DeferredTask, MonotonicClock, QueuePoll, QueueState};
use crate::engine::{ActivationSlot, EngineHandle, EngineOptions};
use crate::observer::{HostObserver, NoopObserver};
use crate::script::SourceContextCounter;
use crate::{
    DeferredTaskError, EngineError, Error, HostOutput, ScriptError, SourceContext, SourceUnit,
};
use deno_core::{v8, JsRuntime, OpState, PollEventLoopOptions};
use std::any::Any;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Origin reported for exceptions thrown by deferred callbacks
const DEFERRED_ORIGIN: &str = "<setTimeout>";

/// Represents the set of options accepted by the host constructor
pub struct HostOptions {
    /// Name of the object holding `echo`, `runScript` and `arguments`
    ///
    /// Defaults to `host`
    pub namespace: String,

    /// Exposed to scripts as `host.arguments`
    pub arguments: Vec<String>,

    /// Upper bound on the engine heap, in bytes
    pub max_heap_size: Option<usize>,

    /// Time source for `setTimeout`
    pub clock: Rc<dyn Clock>,

    /// Where `echo` writes
    pub output: HostOutput,

    /// Notified at script and function boundaries
    pub observer: Rc<dyn HostObserver>,

    /// Also bind `echo` as `console.log`
    pub console: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            namespace: "host".to_string(),
            arguments: Vec::new(),
            max_heap_size: None,
            clock: Rc::new(MonotonicClock),
            output: HostOutput::stdout(),
            observer: Rc::new(NoopObserver),
            console: true,
        }
    }
}

/// Host-side state, stored in the engine's `OpState` so native callbacks can
/// reach it
pub(crate) struct HostState {
    pub sources: SourceContextCounter,
    pub queue: DeferredQueue<ScheduledCallback>,
    pub bindings: BindingTable,
    pub clock: Rc<dyn Clock>,
    pub observer: Rc<dyn HostObserver>,
    pub output: HostOutput,
}

/// Runs `f` against the host state
///
/// The borrow lasts only for `f`; never call into script from inside it
pub(crate) fn with_state<R>(
    op_state: &Rc<RefCell<OpState>>,
    f: impl FnOnce(&mut HostState) -> R,
) -> Result<R, Error> {
    let mut op_state = op_state.try_borrow_mut()?;
    let state = op_state
        .try_borrow_mut::<HostState>()
        .ok_or_else(|| Error::Runtime("host state is not available".to_string()))?;
    Ok(f(state))
}

/// A script host: one engine, its bindings, and its `setTimeout` queue
///
/// The usual flow is [`Host::execute`], which runs a source unit, drains the
/// deferred queue, then settles any remaining promise work.
///
/// Hosts are confined to the thread that created them
///
/// # Example
/// ```rust
/// use jsrt_host::{HostBuilder, SharedBuffer, SourceUnit};
///
/// # fn main() -> Result<(), jsrt_host::Error> {
/// let output = SharedBuffer::default();
/// let mut host = HostBuilder::new().with_output(output.clone()).build()?;
///
/// let unit = SourceUnit::new("hello.js", "host.echo('Hello', 'World'); 7");
/// let value = host.execute(&unit)?;
///
/// assert_eq!(output.contents(), "Hello World\n");
/// assert_eq!(host.exit_code(&value)?, 7);
/// # Ok(())
/// # }
/// ```
pub struct Host {
    engine: EngineHandle,
    tokio: Rc<tokio::runtime::Runtime>,
    observer: Rc<dyn HostObserver>,
    namespace: Namespace,
}

impl Host {
    /// Creates a new host and installs its built-in bindings
    ///
    /// # Errors
    /// Can fail if the engine or the tokio runtime cannot be created
    pub fn new(options: HostOptions) -> Result<Self, Error> {
        let engine = EngineHandle::create(&EngineOptions {
            max_heap_size: options.max_heap_size,
        })?;

        let tokio = Rc::new(
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?,
        );

        let mut host = Self {
            engine,
            tokio,
            observer: options.observer.clone(),
            namespace: Namespace::Object(options.namespace),
        };

        host.deno_runtime()?.op_state().borrow_mut().put(HostState {
            sources: SourceContextCounter::default(),
            queue: DeferredQueue::new(),
            bindings: BindingTable::default(),
            clock: options.clock,
            observer: options.observer,
            output: options.output,
        });

        let echo: Rc<HostFunction> = Rc::new(builtins::echo);
        host.bind_shared(host.namespace.clone(), "echo", echo.clone(), None)?;
        if options.console {
            host.bind_shared(Namespace::object("console"), "log", echo, None)?;
        }
        host.bind(host.namespace.clone(), "runScript", builtins::run_script, None)?;
        host.bind(Namespace::Global, "setTimeout", builtins::set_timeout, None)?;
        host.set_arguments(&options.arguments)?;

        host.observer.initialize();
        tracing::debug!(namespace = ?host.namespace, "host created");
        Ok(host)
    }

    /// Access the underlying deno runtime instance directly
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal
    pub fn deno_runtime(&mut self) -> Result<&mut JsRuntime, Error> {
        Ok(self.engine.runtime()?)
    }

    /// The engine's activation slot, which other threads may inspect or contend for
    #[must_use]
    pub fn activation_slot(&self) -> ActivationSlot {
        self.engine.activation_slot()
    }

    /// False once the host has been disposed
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.engine.is_valid()
    }

    /// Registers a native function callable from script as `namespace.name`
    ///
    /// Binding the same name again replaces the earlier function
    ///
    /// # Errors
    /// [`EngineError::BindingsSealed`] once a script has run
    ///
    /// # Example
    /// ```rust
    /// use jsrt_host::{deno_core::v8, HostBuilder, Namespace, SourceUnit};
    /// use std::rc::Rc;
    ///
    /// # fn main() -> Result<(), jsrt_host::Error> {
    /// let mut host = HostBuilder::new().build()?;
    /// host.bind(
    ///     Namespace::object("math"),
    ///     "scale",
    ///     |scope, call| {
    ///         let factor = call.user_data::<f64>().copied().unwrap_or(1.0);
    ///         let n = call.argument(scope, 1).number_value(scope).unwrap_or(0.0);
    ///         let result: v8::Local<v8::Value> = v8::Number::new(scope, n * factor).into();
    ///         Ok(Some(v8::Global::new(scope, result)))
    ///     },
    ///     Some(Rc::new(2.5_f64)),
    /// )?;
    ///
    /// let value = host.run(&SourceUnit::new("scale.js", "math.scale(4)"))?;
    /// assert_eq!(host.exit_code(&value)?, 10);
    /// # Ok(())
    /// # }
    /// ```
    pub fn bind<F>(
        &mut self,
        namespace: Namespace,
        name: &str,
        function: F,
        user_data: Option<Rc<dyn Any>>,
    ) -> Result<(), Error>
    where
        F: Fn(&mut v8::HandleScope, &HostCall) -> Result<Option<v8::Global<v8::Value>>, Error>
            + 'static,
    {
        self.bind_shared(namespace, name, Rc::new(function), user_data)
    }

    /// Like [`Host::bind`], for a function that is bound under several names
    ///
    /// # Errors
    /// [`EngineError::BindingsSealed`] once a script has run
    pub fn bind_shared(
        &mut self,
        namespace: Namespace,
        name: &str,
        function: Rc<HostFunction>,
        user_data: Option<Rc<dyn Any>>,
    ) -> Result<(), Error> {
        let _guard = self.engine.activate()?;
        let runtime = self.engine.runtime()?;
        let op_state = runtime.op_state();
        with_state(&op_state, |state| state.bindings.ensure_open())??;

        let key = namespace.qualify(name);
        let object = {
            let scope = &mut runtime.handle_scope();
            bindings::install(scope, &namespace, name, &key)?
        };

        tracing::debug!(binding = key, "host binding installed");
        with_state(&op_state, |state| {
            state.bindings.insert(
                key,
                Binding {
                    function,
                    user_data,
                    object,
                },
            );
        })
    }

    /// Qualified names of every installed binding, sorted
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal
    pub fn binding_names(&mut self) -> Result<Vec<String>, Error> {
        let op_state = self.deno_runtime()?.op_state();
        with_state(&op_state, |state| state.bindings.names())
    }

    fn set_arguments(&mut self, arguments: &[String]) -> Result<(), Error> {
        let _guard = self.engine.activate()?;
        let namespace = self.namespace.clone();
        let runtime = self.engine.runtime()?;
        let scope = &mut runtime.handle_scope();
        let array = bindings::string_array(scope, arguments)?;
        bindings::install_value(scope, &namespace, "arguments", array.into())
    }

    /// Compiles and runs a source unit, returning its final value
    ///
    /// Seals the bindings and consumes one source context. Pending promise
    /// jobs run before returning; deferred callbacks do not (see [`Host::drain`])
    ///
    /// # Errors
    /// [`ScriptError`] on load, compile or runtime failure. The host remains
    /// usable afterwards
    pub fn run(&mut self, unit: &SourceUnit) -> Result<v8::Global<v8::Value>, Error> {
        let _guard = self.engine.activate()?;
        let context = self.consume_context()?;

        let result = {
            let runtime = self.engine.runtime()?;
            let scope = &mut runtime.handle_scope();
            let result =
                crate::loader::compile_and_run(scope, unit, context, self.observer.as_ref());
            if scope.is_execution_terminating() {
                scope.cancel_terminate_execution();
            }

            // Also on failure, so jobs queued by this unit never run inside the next one
            scope.perform_microtask_checkpoint();
            result
        };

        self.engine.recover_from_termination()?;
        Ok(result?)
    }

    /// Seals the bindings and takes the next source context
    ///
    /// Callers must hold the activation
    fn consume_context(&mut self) -> Result<SourceContext, Error> {
        let op_state = self.engine.runtime()?.op_state();
        with_state(&op_state, |state| {
            state.bindings.seal();
            state.sources.next()
        })
    }

    /// Loads the file at `path` and runs it
    ///
    /// # Errors
    /// See [`Host::run`]. An unreadable file still consumes a source context
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<v8::Global<v8::Value>, Error> {
        match SourceUnit::load(path) {
            Ok(unit) => self.run(&unit),
            Err(e) => {
                let _guard = self.engine.activate()?;
                self.consume_context()?;
                Err(e.into())
            }
        }
    }

    /// Fires deferred callbacks until none remain
    ///
    /// Waits on the host clock for each task that is not yet due. Tasks added
    /// by callbacks are fired too. Ends with the queue Idle
    ///
    /// # Errors
    /// [`DeferredTaskError`] if a callback throws; the remaining tasks are discarded
    pub fn drain(&mut self) -> Result<(), Error> {
        let _guard = self.engine.activate()?;
        let op_state = self.engine.runtime()?.op_state();
        let clock = with_state(&op_state, |state| {
            state.queue.begin_drain();
            state.clock.clone()
        })?;

        let result = loop {
            let next = match with_state(&op_state, |state| state.queue.poll(clock.now())) {
                Ok(next) => next,
                Err(e) => break Err(e),
            };

            match next {
                QueuePoll::Exhausted => break Ok(()),
                QueuePoll::Sleep(due) => clock.sleep_until(due),
                QueuePoll::Fire(task) => {
                    let fired = match self.engine.runtime() {
                        Ok(runtime) => fire(runtime, &task, self.observer.as_ref()),
                        Err(e) => break Err(e.into()),
                    };
                    if let Err(e) = self.engine.recover_from_termination() {
                        break Err(e.into());
                    }

                    if let Err(source) = fired {
                        let discarded = match with_state(&op_state, |state| state.queue.discard()) {
                            Ok(discarded) => discarded,
                            Err(e) => {
                                tracing::error!(error = %e, "could not discard deferred tasks");
                                break Err(e);
                            }
                        };
                        tracing::warn!(sequence = task.sequence, discarded, "deferred callback threw");
                        break Err(DeferredTaskError {
                            sequence: task.sequence,
                            discarded,
                            source,
                        }
                        .into());
                    }
                }
            }
        };

        with_state(&op_state, |state| state.queue.finish_drain())?;
        result
    }

    /// Runs the engine's own event loop until it has no more work
    ///
    /// # Errors
    /// [`ScriptError::RuntimeException`] for an unhandled promise rejection
    pub fn settle(&mut self) -> Result<(), Error> {
        let _guard = self.engine.activate()?;
        let runtime = self.engine.runtime()?;
        self.tokio
            .block_on(runtime.run_event_loop(PollEventLoopOptions::default()))
            .map_err(|e| {
                ScriptError::RuntimeException {
                    message: e.to_string(),
                    origin: String::new(),
                    line: None,
                }
                .into()
            })
    }

    /// Runs a source unit, drains the deferred queue, then settles
    ///
    /// The queue is only drained if the script itself succeeded
    ///
    /// # Errors
    /// The first failure of any of the three steps
    pub fn execute(&mut self, unit: &SourceUnit) -> Result<v8::Global<v8::Value>, Error> {
        let value = self.run(unit)?;
        self.drain()?;
        self.settle()?;
        Ok(value)
    }

    /// Current state of the deferred queue
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal
    pub fn queue_state(&mut self) -> Result<QueueState, Error> {
        let op_state = self.deno_runtime()?.op_state();
        with_state(&op_state, |state| state.queue.state())
    }

    /// Number of deferred callbacks waiting to fire
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal
    pub fn pending_tasks(&mut self) -> Result<usize, Error> {
        let op_state = self.deno_runtime()?.op_state();
        with_state(&op_state, |state| state.queue.len())
    }

    /// Number of source contexts consumed so far
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal
    pub fn source_contexts_issued(&mut self) -> Result<u32, Error> {
        let op_state = self.deno_runtime()?.op_state();
        with_state(&op_state, |state| state.sources.issued())
    }

    /// Deserializes a script value
    ///
    /// # Errors
    /// [`Error::JsonDecode`] if the value does not match `T`
    pub fn decode_value<T>(&mut self, value: &v8::Global<v8::Value>) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let _guard = self.engine.activate()?;
        let runtime = self.engine.runtime()?;
        let scope = &mut runtime.handle_scope();
        let value = v8::Local::new(scope, value);
        Ok(deno_core::serde_v8::from_v8(scope, value)?)
    }

    /// The process exit code for a script's final value
    ///
    /// The value is converted to a number and truncated; values that are not
    /// numeric give 0
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal
    pub fn exit_code(&mut self, value: &v8::Global<v8::Value>) -> Result<i32, Error> {
        let _guard = self.engine.activate()?;
        let runtime = self.engine.runtime()?;
        let scope = &mut runtime.handle_scope();
        let tc = &mut v8::TryCatch::new(scope);
        let value = v8::Local::new(tc, value);
        let number = value.number_value(tc).unwrap_or(f64::NAN);
        Ok(if number.is_nan() { 0 } else { number as i32 })
    }

    /// Releases the engine and everything the host holds for it
    ///
    /// Calling it again is a no-op
    ///
    /// # Errors
    /// [`EngineError::StillActive`] if another thread holds the activation
    pub fn dispose(&mut self) -> Result<(), Error> {
        if !self.engine.is_valid() {
            return Ok(());
        }

        if let Some(owner) = self.engine.activation_slot().holder() {
            if owner != std::thread::current().id() {
                return Err(EngineError::StillActive.into());
            }
        }

        // Drop script handles before their isolate
        let state = self
            .engine
            .runtime()?
            .op_state()
            .borrow_mut()
            .try_take::<HostState>();
        drop(state);

        self.observer.shutdown();
        self.engine.dispose()?;
        tracing::debug!("host disposed");
        Ok(())
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!(error = %e, "host dropped without a clean dispose");
        }
    }
}

/// Invokes one deferred callback, then runs pending promise jobs
fn fire(
    runtime: &mut JsRuntime,
    task: &DeferredTask<ScheduledCallback>,
    observer: &dyn HostObserver,
) -> Result<(), ScriptError> {
    let scope = &mut runtime.handle_scope();
    let callback = v8::Local::new(scope, &task.payload.callback);
    let receiver = v8::Local::new(scope, &task.payload.receiver);

    let name = callback.get_name(scope).to_rust_string_lossy(scope);
    let name = if name.is_empty() { "(anonymous)" } else { &name };
    tracing::trace!(sequence = task.sequence, name, "firing deferred callback");

    observer.function_enter(name);
    let result = {
        let tc = &mut v8::TryCatch::new(scope);
        match callback.call(tc, receiver, &[]) {
            Some(_) => Ok(()),
            None => Err(crate::loader::runtime_exception(tc, DEFERRED_ORIGIN)),
        }
    };
    observer.function_exit(name);

    if scope.is_execution_terminating() {
        scope.cancel_terminate_execution();
    }

    scope.perform_microtask_checkpoint();
    result
}
