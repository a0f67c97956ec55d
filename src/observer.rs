use crate::SourceContext;

/// Receives notifications at the boundaries the host can see
///
/// Every method defaults to doing nothing. Calls arrive on the engine's
/// thread, in order
pub trait HostObserver {
    /// The host has been created and its bindings installed
    fn initialize(&self) {}

    /// The host is being disposed
    fn shutdown(&self) {}

    /// A source unit compiled successfully and is about to run
    fn script_compiled(&self, _context: SourceContext, _name: &str) {}

    /// A host binding or deferred callback is about to be entered
    fn function_enter(&self, _name: &str) {}

    /// A host binding or deferred callback has returned or thrown
    fn function_exit(&self, _name: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;
impl HostObserver for NoopObserver {}

/// Reports every notification as a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;
impl HostObserver for TracingObserver {
    fn initialize(&self) {
        tracing::info!("profiler: initialize");
    }

    fn shutdown(&self) {
        tracing::info!("profiler: shutdown");
    }

    fn script_compiled(&self, context: SourceContext, name: &str) {
        tracing::info!(%context, name, "profiler: script compiled");
    }

    fn function_enter(&self, name: &str) {
        tracing::info!(name, "profiler: enter");
    }

    fn function_exit(&self, name: &str) {
        tracing::info!(name, "profiler: exit");
    }
}
