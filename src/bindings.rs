//! Native functions exposed to scripts
//!
//! Every binding is installed as a v8 function whose data slot holds its
//! qualified name. A single trampoline looks the name up in the host's
//! [`BindingTable`] and forwards the call
use crate::host::with_state;
use crate::traits::{ToHostString, ToV8String};
use crate::{EngineError, Error};
use deno_core::{v8, JsRuntime};
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

/// Signature of a native function callable from script
///
/// Returning `Ok(None)` gives `undefined` to the caller. An `Err` is thrown
/// into the script as an `Error` (a `TypeError` for [`Error::ValueNotCallable`])
pub type HostFunction =
    dyn Fn(&mut v8::HandleScope, &HostCall) -> Result<Option<v8::Global<v8::Value>>, Error>;

/// Where a binding is installed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Directly on the global object, like `setTimeout`
    Global,

    /// On a named object hanging off the global object, like `host`
    ///
    /// The object is created on first use
    Object(String),
}

impl Namespace {
    /// Shorthand for [`Namespace::Object`]
    pub fn object(name: impl ToString) -> Self {
        Self::Object(name.to_string())
    }

    /// The name a binding is known by, such as `host.echo`
    #[must_use]
    pub fn qualify(&self, name: &str) -> String {
        match self {
            Self::Global => name.to_string(),
            Self::Object(namespace) => format!("{namespace}.{name}"),
        }
    }
}

/// Everything a native function is given when called from script
pub struct HostCall {
    name: String,
    callee: v8::Global<v8::Function>,
    receiver: v8::Global<v8::Value>,
    is_construct_call: bool,
    arguments: Vec<v8::Global<v8::Value>>,
    user_data: Option<Rc<dyn Any>>,
}

impl HostCall {
    /// Qualified name of the binding being called
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The function object the script called
    #[must_use]
    pub fn callee(&self) -> &v8::Global<v8::Function> {
        &self.callee
    }

    /// The `this` value of the call
    #[must_use]
    pub fn receiver(&self) -> &v8::Global<v8::Value> {
        &self.receiver
    }

    /// True when called with `new`
    #[must_use]
    pub fn is_construct_call(&self) -> bool {
        self.is_construct_call
    }

    /// Number of arguments, counting the callee at index 0
    #[must_use]
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// Always false; the callee is always present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Argument at `index`, where index 0 is the callee itself
    ///
    /// Out of range indices give `undefined`
    pub fn argument<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        index: usize,
    ) -> v8::Local<'s, v8::Value> {
        match self.arguments.get(index) {
            Some(value) => v8::Local::new(scope, value),
            None => v8::undefined(scope).into(),
        }
    }

    /// The user data given at bind time, if it has type `T`
    #[must_use]
    pub fn user_data<T: 'static>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref::<T>()
    }
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub function: Rc<HostFunction>,
    pub user_data: Option<Rc<dyn Any>>,
    pub object: v8::Global<v8::Function>,
}

/// Name to native function map, owned by the host
///
/// Holds every native function and every engine function object created for
/// them until the host is disposed. Sealed once the first script runs
#[derive(Default)]
pub(crate) struct BindingTable {
    bindings: HashMap<String, Binding>,
    sealed: bool,
}

impl BindingTable {
    pub fn ensure_open(&self) -> Result<(), EngineError> {
        if self.sealed {
            return Err(EngineError::BindingsSealed);
        }
        Ok(())
    }

    pub fn seal(&mut self) {
        if !self.sealed {
            tracing::debug!(bindings = self.bindings.len(), "host bindings sealed");
        }
        self.sealed = true;
    }

    pub fn insert(&mut self, key: String, binding: Binding) {
        if self.bindings.insert(key.clone(), binding).is_some() {
            tracing::debug!(binding = key, "host binding replaced");
        }
    }

    pub fn get(&self, key: &str) -> Option<Binding> {
        self.bindings.get(key).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Finds `namespace` on the global object, creating it if needed
fn namespace_object<'s>(
    scope: &mut v8::HandleScope<'s>,
    namespace: &Namespace,
) -> Result<v8::Local<'s, v8::Object>, Error> {
    let global = scope.get_current_context().global(scope);
    let Namespace::Object(name) = namespace else {
        return Ok(global);
    };

    let key = name.to_v8_string(scope)?;
    let existing = global
        .get(scope, key.into())
        .and_then(|value| v8::Local::<v8::Object>::try_from(value).ok());

    match existing {
        Some(object) => Ok(object),
        None => {
            let object = v8::Object::new(scope);
            global.set(scope, key.into(), object.into());
            Ok(object)
        }
    }
}

/// Creates the engine function for a binding and installs it as `name`
pub(crate) fn install(
    scope: &mut v8::HandleScope,
    namespace: &Namespace,
    name: &str,
    key: &str,
) -> Result<v8::Global<v8::Function>, Error> {
    let target = namespace_object(scope, namespace)?;

    let data = key.to_v8_string(scope)?;
    let function = v8::Function::builder(dispatch)
        .data(data.into())
        .build(scope)
        .ok_or_else(|| Error::Runtime(format!("could not create function {key}")))?;

    let property = name.to_v8_string(scope)?;
    function.set_name(property);
    target.set(scope, property.into(), function.into());

    Ok(v8::Global::new(scope, function))
}

/// Sets a plain value on a namespace, such as `host.arguments`
pub(crate) fn install_value(
    scope: &mut v8::HandleScope,
    namespace: &Namespace,
    name: &str,
    value: v8::Local<v8::Value>,
) -> Result<(), Error> {
    let target = namespace_object(scope, namespace)?;
    let property = name.to_v8_string(scope)?;
    target.set(scope, property.into(), value);
    Ok(())
}

/// Builds a script array of strings
pub(crate) fn string_array<'s>(
    scope: &mut v8::HandleScope<'s>,
    values: &[String],
) -> Result<v8::Local<'s, v8::Array>, Error> {
    let array = v8::Array::new(scope, values.len() as i32);
    for (i, value) in values.iter().enumerate() {
        let value = value.to_v8_string(scope)?;
        array.set_index(scope, i as u32, value.into());
    }
    Ok(array)
}

fn dispatch(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let key = match args.data().to_host_string(scope) {
        Ok(key) => key,
        Err(e) => return throw(scope, &e),
    };

    match invoke(scope, &args, &key) {
        Ok(Some(value)) => {
            let value = v8::Local::new(scope, value);
            rv.set(value);
        }
        Ok(None) => rv.set_undefined(),
        Err(e) => {
            tracing::debug!(binding = key, error = %e, "host binding failed");
            throw(scope, &e);
        }
    }
}

fn invoke(
    scope: &mut v8::HandleScope,
    args: &v8::FunctionCallbackArguments,
    key: &str,
) -> Result<Option<v8::Global<v8::Value>>, Error> {
    let op_state = JsRuntime::op_state_from(scope);
    let (binding, observer) =
        with_state(&op_state, |state| (state.bindings.get(key), state.observer.clone()))?;
    let binding = binding.ok_or_else(|| Error::Runtime(format!("{key} is not bound")))?;

    // Index 0 is the callee
    let mut arguments = Vec::with_capacity(args.length() as usize + 1);
    let callee: v8::Local<v8::Value> = v8::Local::new(scope, &binding.object).into();
    arguments.push(v8::Global::new(scope, callee));
    for i in 0..args.length() {
        arguments.push(v8::Global::new(scope, args.get(i)));
    }

    let receiver: v8::Local<v8::Value> = args.this().into();
    let call = HostCall {
        name: key.to_string(),
        callee: binding.object.clone(),
        receiver: v8::Global::new(scope, receiver),
        is_construct_call: !args.new_target().is_undefined(),
        arguments,
        user_data: binding.user_data.clone(),
    };

    observer.function_enter(key);
    let result = (binding.function)(scope, &call);
    observer.function_exit(key);
    result
}

fn throw(scope: &mut v8::HandleScope, error: &Error) {
    // Nested script failures surface with their own message, not our location
    let message = match error.script_error() {
        Some(e @ crate::ScriptError::RuntimeException { .. }) => e.message().to_string(),
        _ => error.to_string(),
    };

    let exception = match message.to_v8_string(scope) {
        Ok(message) if matches!(error, Error::ValueNotCallable(_)) => {
            v8::Exception::type_error(scope, message)
        }
        Ok(message) => v8::Exception::error(scope, message),
        Err(_) => v8::undefined(scope).into(),
    };
    scope.throw_exception(exception);
}
