use thiserror::Error;

/// Lifecycle misuse of the engine handle
///
/// None of these are retried; each one ends the operation that raised it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not be allocated, or the heap limit could not be honoured
    #[error("failed to allocate script engine: {0}")]
    AllocationFailed(String),

    /// Another thread currently holds the engine's activation
    #[error("engine is active on another thread")]
    WrongThread,

    /// `dispose` was called while another thread held the activation
    #[error("engine cannot be disposed while it is active on another thread")]
    StillActive,

    /// The engine was used after it was disposed
    #[error("engine has been disposed")]
    Disposed,

    /// A binding was added after the first script ran
    #[error("host bindings cannot change once a script has run")]
    BindingsSealed,
}

/// Failures while loading or running a single source unit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The source could not be read, or was empty
    #[error("unable to load {path}: {reason}")]
    IoFailure {
        /// Name or path of the source
        path: String,
        /// Why it could not be loaded
        reason: String,
    },

    /// The source did not parse
    #[error("{message}{}", location(.origin, .line, .column))]
    CompileFailure {
        /// Engine-provided message, e.g. `SyntaxError: Unexpected token ')'`
        message: String,
        /// Name of the source unit
        origin: String,
        /// 1-based line, if the engine reported one
        line: Option<usize>,
        /// 1-based column, if the engine reported one
        column: Option<usize>,
        /// Text of the offending line, used by [`Error::as_highlighted`]
        source_line: Option<String>,
    },

    /// An exception escaped the script
    #[error("{message}{}", location(.origin, .line, &None))]
    RuntimeException {
        /// The thrown value's `message`, or the value itself as a string
        message: String,
        /// Name of the source unit where the exception surfaced
        origin: String,
        /// 1-based line, if the engine reported one
        line: Option<usize>,
    },
}

impl ScriptError {
    /// The message carried by this error, without location information
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::IoFailure { reason, .. } => reason,
            Self::CompileFailure { message, .. } | Self::RuntimeException { message, .. } => {
                message
            }
        }
    }
}

fn location(origin: &str, line: &Option<usize>, column: &Option<usize>) -> String {
    match (origin.is_empty(), *line, *column) {
        (true, _, _) | (false, None, _) => String::new(),
        (false, Some(line), None) => format!(" ({origin}:{line})"),
        (false, Some(line), Some(column)) => format!(" ({origin}:{line}:{column})"),
    }
}

/// An uncaught exception inside a fired `setTimeout` callback
///
/// The drain loop stops at the first one; every task still pending is discarded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("deferred callback #{sequence} failed: {source} ({discarded} pending task(s) discarded)")]
pub struct DeferredTaskError {
    /// Registration sequence of the failing task
    pub sequence: u64,

    /// Number of tasks dropped without running
    pub discarded: usize,

    /// The exception raised by the callback
    pub source: ScriptError,
}

/// Represents the errors that can occur while hosting scripts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Engine lifecycle misuse
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Load, compile or runtime failure of a source unit
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// A deferred callback threw, aborting the drain
    #[error(transparent)]
    Deferred(#[from] DeferredTaskError),

    /// Triggers when attempting to call a value as a function
    #[error("{0} is not a function")]
    ValueNotCallable(String),

    /// Triggers when a string could not be encoded for v8
    #[error("{0} could not be encoded as a v8 value")]
    V8Encoding(String),

    /// Triggers when a result could not be deserialized to the requested type
    #[error("value could not be deserialized: {0}")]
    JsonDecode(String),

    /// Host-side failures that are not tied to a particular script
    #[error("{0}")]
    Runtime(String),
}

impl Error {
    /// Formats an error for display in a terminal
    /// If the error is a compile failure with a known source line, it will highlight it
    /// in this format:
    /// ```text
    /// script.js:2
    /// | let x = );
    /// |         ^
    /// = SyntaxError: Unexpected token ')'
    /// ```
    ///
    /// Otherwise, it will just display the error message normally
    #[must_use]
    pub fn as_highlighted(&self) -> String {
        match self {
            Error::Script(ScriptError::CompileFailure {
                message,
                origin,
                line,
                column,
                source_line: Some(source_line),
            }) => {
                let row = line.unwrap_or(1);
                let col = column.unwrap_or(1).saturating_sub(1);
                let line = source_line.trim_end();

                // Get at most 50 characters, centered on the column
                let (start, end) = if line.len() < 50 {
                    (0, line.len())
                } else if col < 25 {
                    (0, 50)
                } else if col > line.len() - 25 {
                    (line.len() - 50, line.len())
                } else {
                    (col - 25, col + 25)
                };

                let line = line.get(start..end).unwrap_or(line);
                let fpos = if !origin.is_empty() {
                    format!("{origin}:{row}\n")
                } else if row > 1 {
                    format!("Line {row}\n")
                } else {
                    String::new()
                };

                let msg = message
                    .split('\n')
                    .map(|l| format!("= {l}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "{fpos}| {line}\n| {}^\n{msg}",
                    " ".repeat(col.saturating_sub(start))
                )
            }
            _ => self.to_string(),
        }
    }

    /// The script-level failure behind this error, if there is one
    #[must_use]
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            Error::Script(e) => Some(e),
            Error::Deferred(e) => Some(&e.source),
            _ => None,
        }
    }
}

#[macro_use]
mod error_macro {
    /// Maps one error type to another
    macro_rules! map_error {
        ($source_error:path, $impl:expr) => {
            impl From<$source_error> for Error {
                fn from(e: $source_error) -> Self {
                    let fmt: &dyn Fn($source_error) -> Self = &$impl;
                    fmt(e)
                }
            }
        };
    }
}

map_error!(std::cell::BorrowMutError, |e| Error::Runtime(e.to_string()));
map_error!(std::io::Error, |e| Error::Runtime(e.to_string()));
map_error!(deno_core::v8::DataError, |e| Error::Runtime(e.to_string()));
map_error!(deno_core::serde_v8::Error, |e| Error::JsonDecode(
    e.to_string()
));

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_highlights_compile_failure() {
        let e = Error::Script(ScriptError::CompileFailure {
            message: "SyntaxError: Unexpected token ')'".to_string(),
            origin: "test.js".to_string(),
            line: Some(2),
            column: Some(9),
            source_line: Some("let x = );".to_string()),
        });

        assert_eq!(
            e.as_highlighted(),
            "test.js:2\n| let x = );\n|         ^\n= SyntaxError: Unexpected token ')'"
        );
    }

    #[test]
    fn test_highlight_falls_back_to_display() {
        let e = Error::Engine(EngineError::Disposed);
        assert_eq!(e.as_highlighted(), "engine has been disposed");
    }

    #[test]
    fn test_display_includes_location() {
        let e = ScriptError::RuntimeException {
            message: "boom".to_string(),
            origin: "a.js".to_string(),
            line: Some(3),
        };
        assert_eq!(e.to_string(), "boom (a.js:3)");

        let e = ScriptError::CompileFailure {
            message: "SyntaxError: bad".to_string(),
            origin: String::new(),
            line: Some(1),
            column: Some(1),
            source_line: None,
        };
        assert_eq!(e.to_string(), "SyntaxError: bad");
    }

    #[test]
    fn test_deferred_error_exposes_script_error() {
        let source = ScriptError::RuntimeException {
            message: "late".to_string(),
            origin: "a.js".to_string(),
            line: None,
        };
        let e = Error::from(DeferredTaskError {
            sequence: 4,
            discarded: 2,
            source: source.clone(),
        });
        assert_eq!(e.script_error(), Some(&source));
        assert!(e.to_string().contains("2 pending task(s) discarded"));
    }
}
