//! The bindings every host installs: `echo`, `runScript` and `setTimeout`
use crate::bindings::HostCall;
use crate::host::with_state;
use crate::loader;
use crate::traits::ToHostString;
use crate::{Error, SourceUnit};
use deno_core::{v8, JsRuntime};

/// A callback waiting in the deferred queue
///
/// Holding the handles keeps both alive until the task fires or is discarded
pub(crate) struct ScheduledCallback {
    pub callback: v8::Global<v8::Function>,
    pub receiver: v8::Global<v8::Value>,
}

/// `host.echo(...values)`
///
/// Writes the arguments as strings, joined by single spaces, as one line
pub(crate) fn echo(
    scope: &mut v8::HandleScope,
    call: &HostCall,
) -> Result<Option<v8::Global<v8::Value>>, Error> {
    let mut parts = Vec::with_capacity(call.len());
    for i in 1..call.len() {
        let value = call.argument(scope, i);
        parts.push(value.to_host_string(scope)?);
    }

    let line = parts.join(" ");
    with_state(&JsRuntime::op_state_from(scope), |state| {
        state.output.write_line(&line)
    })??;
    Ok(None)
}

/// `host.runScript(path)`
///
/// Loads another source unit and runs it in the same context, returning its
/// final value. Failures are rethrown into the calling script
pub(crate) fn run_script(
    scope: &mut v8::HandleScope,
    call: &HostCall,
) -> Result<Option<v8::Global<v8::Value>>, Error> {
    if call.len() < 2 {
        return Err(Error::Runtime(format!(
            "{}: not enough arguments",
            call.name()
        )));
    }

    let path = call.argument(scope, 1).to_host_string(scope)?;
    let unit = SourceUnit::load(&path)?;

    let op_state = JsRuntime::op_state_from(scope);
    let (context, observer) =
        with_state(&op_state, |state| (state.sources.next(), state.observer.clone()))?;

    let value = loader::compile_and_run(scope, &unit, context, observer.as_ref())?;
    Ok(Some(value))
}

/// `setTimeout(callback, delayMillis)`
///
/// Queues `callback` to run after the delay, with the receiver of this call
/// as its `this`. Non-number delays count as 0; always returns `undefined`
pub(crate) fn set_timeout(
    scope: &mut v8::HandleScope,
    call: &HostCall,
) -> Result<Option<v8::Global<v8::Value>>, Error> {
    let callback = call.argument(scope, 1);
    let callback = v8::Local::<v8::Function>::try_from(callback)
        .map_err(|_| Error::ValueNotCallable(format!("{} callback", call.name())))?;

    let delay = call.argument(scope, 2);
    let after_millis = if delay.is_number() {
        delay.number_value(scope).unwrap_or(0.0)
    } else {
        0.0
    };

    let task = ScheduledCallback {
        callback: v8::Global::new(scope, callback),
        receiver: call.receiver().clone(),
    };

    with_state(&JsRuntime::op_state_from(scope), |state| {
        let now = state.clock.now();
        state.queue.register(now, after_millis, task)
    })?;
    Ok(None)
}
