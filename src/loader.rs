//! Compiles and runs source units as classic scripts
use crate::observer::HostObserver;
use crate::traits::{ToDefinedValue, ToHostString, ToV8String};
use crate::{ScriptError, SourceContext, SourceUnit};
use deno_core::v8;

fn encode<'s>(
    scope: &mut v8::HandleScope<'s>,
    text: &str,
    origin: &str,
) -> Result<v8::Local<'s, v8::String>, ScriptError> {
    text.to_v8_string(scope).map_err(|e| ScriptError::IoFailure {
        path: origin.to_string(),
        reason: e.to_string(),
    })
}

/// Compiles `unit` and runs it in the current context
///
/// Returns the value of the script's final expression. The exception state is
/// cleared before returning, whatever the outcome
pub(crate) fn compile_and_run(
    scope: &mut v8::HandleScope,
    unit: &SourceUnit,
    context: SourceContext,
    observer: &dyn HostObserver,
) -> Result<v8::Global<v8::Value>, ScriptError> {
    unit.ensure_not_empty()?;
    tracing::debug!(%context, name = unit.name(), "running source unit");

    let source = encode(scope, unit.contents(), unit.name())?;
    let name = encode(scope, unit.name(), unit.name())?;
    let origin = v8::ScriptOrigin::new(
        scope,
        name.into(),
        0,
        0,
        false,
        context.id() as i32,
        None,
        false,
        false,
        false,
        None,
    );

    let tc = &mut v8::TryCatch::new(scope);
    let Some(script) = v8::Script::compile(tc, source, Some(&origin)) else {
        let error = compile_failure(tc, unit.name());
        tracing::debug!(%context, error = %error, "source unit failed to compile");
        return Err(error);
    };
    observer.script_compiled(context, unit.name());

    match script.run(tc) {
        Some(value) => Ok(v8::Global::new(tc, value)),
        None => {
            let error = runtime_exception(tc, unit.name());
            tracing::debug!(%context, error = %error, "source unit threw");
            Err(error)
        }
    }
}

fn compile_failure(tc: &mut v8::TryCatch<v8::HandleScope>, origin: &str) -> ScriptError {
    let message = match tc.exception() {
        Some(exception) => exception
            .to_host_string(tc)
            .unwrap_or_else(|_| "SyntaxError".to_string()),
        None => "compilation failed".to_string(),
    };

    let (line, column, source_line) = match tc.message() {
        Some(m) => (
            m.get_line_number(tc),
            Some(m.get_start_column() + 1),
            m.get_source_line(tc).map(|s| s.to_rust_string_lossy(tc)),
        ),
        None => (None, None, None),
    };

    ScriptError::CompileFailure {
        message,
        origin: origin.to_string(),
        line,
        column,
        source_line,
    }
}

/// Describes the exception caught by `tc`
///
/// The origin comes from the engine's message when it has one, so errors from
/// nested scripts name the script that threw
pub(crate) fn runtime_exception(
    tc: &mut v8::TryCatch<v8::HandleScope>,
    fallback_origin: &str,
) -> ScriptError {
    if tc.has_terminated() {
        return ScriptError::RuntimeException {
            message: "execution terminated".to_string(),
            origin: fallback_origin.to_string(),
            line: None,
        };
    }

    let message = match tc.exception() {
        Some(exception) => exception_message(tc, exception),
        None => "uncaught exception".to_string(),
    };

    let (origin, line) = match tc.message() {
        Some(m) => {
            let origin = m
                .get_script_resource_name(tc)
                .filter(|name| !name.is_undefined())
                .and_then(|name| name.to_host_string(tc).ok());
            (origin, m.get_line_number(tc))
        }
        None => (None, None),
    };

    ScriptError::RuntimeException {
        message,
        origin: origin.unwrap_or_else(|| fallback_origin.to_string()),
        line,
    }
}

/// The thrown value's `message` property, or the value itself as a string
fn exception_message(scope: &mut v8::HandleScope, exception: v8::Local<v8::Value>) -> String {
    if let Ok(object) = v8::Local::<v8::Object>::try_from(exception) {
        if let Ok(key) = "message".to_v8_string(scope) {
            if let Some(Ok(message)) = object
                .get(scope, key.into())
                .if_defined()
                .map(|m| m.to_host_string(scope))
            {
                return message;
            }
        }
    }

    exception
        .to_host_string(scope)
        .unwrap_or_else(|_| "uncaught exception".to_string())
}
