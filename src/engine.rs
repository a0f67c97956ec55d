//! Ownership of one engine instance and its thread affinity
use crate::EngineError;
use deno_core::{v8, JsRuntime, RuntimeOptions};
use parking_lot::Mutex;
use std::cell::Cell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::ThreadId;

/// Isolate creation is serialized; concurrent creation has crashed v8 before
static ISOLATE_CREATE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Options used to allocate an engine
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Upper bound on the engine heap, in bytes
    ///
    /// Scripts that exceed it are terminated instead of aborting the process
    pub max_heap_size: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Activation {
    owner: ThreadId,
    depth: usize,
}

/// Records which thread, if any, currently has the engine activated
///
/// This is the only piece of host state that may be observed from other
/// threads. Activation is re-entrant on the owning thread, since host
/// callbacks run while the outer call still holds it
#[derive(Debug, Clone, Default)]
pub struct ActivationSlot(Arc<Mutex<Option<Activation>>>);

impl ActivationSlot {
    /// Binds the calling thread to the engine until the guard drops
    ///
    /// # Errors
    /// [`EngineError::WrongThread`] if another thread holds the activation
    pub fn acquire(&self) -> Result<ActivationGuard, EngineError> {
        let current = std::thread::current().id();
        let mut slot = self.0.lock();
        match slot.as_mut() {
            Some(activation) if activation.owner != current => {
                tracing::warn!(owner = ?activation.owner, "engine activation refused");
                return Err(EngineError::WrongThread);
            }
            Some(activation) => activation.depth += 1,
            None => {
                *slot = Some(Activation {
                    owner: current,
                    depth: 1,
                })
            }
        }

        Ok(ActivationGuard {
            slot: self.clone(),
            _not_send: PhantomData,
        })
    }

    /// The thread holding the activation, if any
    #[must_use]
    pub fn holder(&self) -> Option<ThreadId> {
        self.0.lock().as_ref().map(|a| a.owner)
    }

    fn release(&self) {
        let mut slot = self.0.lock();
        if let Some(activation) = slot.as_mut() {
            activation.depth = activation.depth.saturating_sub(1);
            if activation.depth == 0 {
                *slot = None;
            }
        }
    }
}

/// Scoped activation of an engine on the current thread
///
/// Released on drop, on every exit path. Cannot leave the thread that made it
#[derive(Debug)]
pub struct ActivationGuard {
    slot: ActivationSlot,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        self.slot.release();
    }
}

/// Owns one engine instance and one execution context
///
/// Invalid once disposed; every later use reports [`EngineError::Disposed`]
pub struct EngineHandle {
    runtime: Option<JsRuntime>,
    activation: ActivationSlot,
    max_heap_size: Option<usize>,
    heap_limit_hit: Rc<Cell<bool>>,
}

/// Terminates the running script when the heap nears `max`
///
/// The limit is raised so the termination can complete; `hit` records that it
/// needs restoring
fn watch_heap_limit(runtime: &mut JsRuntime, max: usize, hit: Rc<Cell<bool>>) {
    let isolate_handle = runtime.v8_isolate().thread_safe_handle();
    runtime.add_near_heap_limit_callback(move |current, _initial| {
        tracing::warn!(limit = max, "heap limit reached, terminating script");
        hit.set(true);
        isolate_handle.terminate_execution();
        current * 2
    });
}

impl EngineHandle {
    /// Allocates a new engine
    ///
    /// # Errors
    /// [`EngineError::AllocationFailed`] if the engine could not be created
    pub fn create(options: &EngineOptions) -> Result<Self, EngineError> {
        let create_params = options
            .max_heap_size
            .map(|max| v8::CreateParams::default().heap_limits(0, max));

        let mut runtime = {
            let _lock = ISOLATE_CREATE_LOCK.lock();
            JsRuntime::try_new(RuntimeOptions {
                create_params,
                ..Default::default()
            })
            .map_err(|e| EngineError::AllocationFailed(e.to_string()))?
        };

        let heap_limit_hit = Rc::new(Cell::new(false));
        if let Some(max) = options.max_heap_size {
            watch_heap_limit(&mut runtime, max, heap_limit_hit.clone());
        }

        tracing::debug!(max_heap_size = ?options.max_heap_size, "engine created");
        Ok(Self {
            runtime: Some(runtime),
            activation: ActivationSlot::default(),
            max_heap_size: options.max_heap_size,
            heap_limit_hit,
        })
    }

    /// Clears a pending termination and, if the heap limit was raised to let
    /// one complete, puts the configured limit back
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal
    pub fn recover_from_termination(&mut self) -> Result<(), EngineError> {
        let runtime = self.runtime.as_mut().ok_or(EngineError::Disposed)?;
        let isolate = runtime.v8_isolate();
        if isolate.is_execution_terminating() {
            isolate.cancel_terminate_execution();
        }

        if let Some(max) = self.max_heap_size {
            if self.heap_limit_hit.replace(false) {
                // The limit is only lowered if the heap already fits under it
                runtime.v8_isolate().low_memory_notification();
                runtime.remove_near_heap_limit_callback(max);
                watch_heap_limit(runtime, max, self.heap_limit_hit.clone());
                tracing::debug!(limit = max, "heap limit restored");
            }
        }

        Ok(())
    }

    /// Binds the engine to the calling thread for the lifetime of the guard
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal, or [`EngineError::WrongThread`]
    /// if another thread holds the activation
    pub fn activate(&self) -> Result<ActivationGuard, EngineError> {
        if self.runtime.is_none() {
            return Err(EngineError::Disposed);
        }
        self.activation.acquire()
    }

    /// Releases the engine
    ///
    /// Calling it again is a no-op
    ///
    /// # Errors
    /// [`EngineError::StillActive`] if another thread holds the activation
    pub fn dispose(&mut self) -> Result<(), EngineError> {
        if self.runtime.is_none() {
            return Ok(());
        }

        match self.activation.holder() {
            Some(owner) if owner != std::thread::current().id() => {
                return Err(EngineError::StillActive)
            }
            _ => {}
        }

        self.runtime = None;
        tracing::debug!("engine disposed");
        Ok(())
    }

    /// Access the underlying deno runtime
    ///
    /// # Errors
    /// [`EngineError::Disposed`] after disposal
    pub fn runtime(&mut self) -> Result<&mut JsRuntime, EngineError> {
        self.runtime.as_mut().ok_or(EngineError::Disposed)
    }

    /// False once the engine has been disposed
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.runtime.is_some()
    }

    /// The activation slot, which may be shared with other threads
    #[must_use]
    pub fn activation_slot(&self) -> ActivationSlot {
        self.activation.clone()
    }
}
