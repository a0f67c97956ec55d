use crate::Error;
use deno_core::v8::{self, HandleScope};

pub trait ToV8String {
    fn to_v8_string<'a>(
        &self,
        scope: &mut HandleScope<'a>,
    ) -> Result<v8::Local<'a, v8::String>, Error>;
}

impl ToV8String for str {
    fn to_v8_string<'a>(
        &self,
        scope: &mut HandleScope<'a>,
    ) -> Result<v8::Local<'a, v8::String>, Error> {
        v8::String::new(scope, self).ok_or(Error::V8Encoding(self.to_string()))
    }
}

pub trait ToDefinedValue<T> {
    fn if_defined(&self) -> Option<T>;
}

impl<'a> ToDefinedValue<v8::Local<'a, v8::Value>> for Option<v8::Local<'a, v8::Value>> {
    fn if_defined(&self) -> Option<v8::Local<'a, v8::Value>> {
        self.filter(|v| !v.is_undefined())
    }
}

/// Stringifies a value the way `String(value)` does in script
///
/// Fails for values whose conversion throws, such as symbols
pub trait ToHostString {
    fn to_host_string(&self, scope: &mut HandleScope) -> Result<String, Error>;
}

impl ToHostString for v8::Local<'_, v8::Value> {
    fn to_host_string(&self, scope: &mut HandleScope) -> Result<String, Error> {
        match self.to_string(scope) {
            Some(s) => Ok(s.to_rust_string_lossy(scope)),
            None => Err(Error::V8Encoding("argument".to_string())),
        }
    }
}
