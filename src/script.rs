use crate::ScriptError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::read_to_string;
use std::path::Path;

/// Identifies one run of a source unit within a host
///
/// Handed out by a monotonically increasing counter; never reused, so two
/// runs of the same file still get distinct identifiers
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SourceContext(u32);

impl SourceContext {
    /// The raw identifier, as passed to the engine's script origin
    #[must_use]
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl Display for SourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of [`SourceContext`] identifiers, owned by one host
#[derive(Debug, Default)]
pub(crate) struct SourceContextCounter {
    next: u32,
}

impl SourceContextCounter {
    pub fn next(&mut self) -> SourceContext {
        let id = SourceContext(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }

    /// Number of identifiers handed out so far
    pub fn issued(&self) -> u32 {
        self.next
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
/// Represents a piece of javascript for execution, as a classic (non-module) script.
///
/// The name is used as the script's origin in error messages and stack traces
pub struct SourceUnit {
    name: String,
    contents: String,
}

impl SourceUnit {
    /// Creates a new `SourceUnit` instance with the given name and contents.
    ///
    /// # Arguments
    /// * `name` - A string identifying the source, usually a path.
    /// * `contents` - A string containing the script text.
    ///
    /// # Example
    ///
    /// ```rust
    /// use jsrt_host::SourceUnit;
    ///
    /// let unit = SourceUnit::new("script.js", "host.echo('Hello, World!');");
    /// ```
    pub fn new(name: impl ToString, contents: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            contents: contents.to_string(),
        }
    }

    /// Loads a `SourceUnit` from the file at the given path, read as UTF-8 text.
    ///
    /// # Errors
    /// Returns [`ScriptError::IoFailure`] if the file cannot be read, or is empty
    ///
    /// # Example
    ///
    /// ```rust
    /// use jsrt_host::SourceUnit;
    ///
    /// match SourceUnit::load("script.js") {
    ///     Ok(unit) => println!("Loaded script: {}", unit.name()),
    ///     Err(error) => eprintln!("Error loading script: {}", error),
    /// }
    /// ```
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let contents = read_to_string(path).map_err(|e| ScriptError::IoFailure {
            path: name.clone(),
            reason: e.to_string(),
        })?;

        let unit = Self::new(name, contents);
        unit.ensure_not_empty()?;
        Ok(unit)
    }

    /// Returns the name of the source unit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the contents of the source unit.
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub(crate) fn ensure_not_empty(&self) -> Result<(), ScriptError> {
        if self.contents.is_empty() {
            return Err(ScriptError::IoFailure {
                path: self.name.clone(),
                reason: "invalid script: source is empty".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod test_source_unit {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().expect("Could not create temp file");
        write!(file, "1 + 1").expect("Could not write script");

        let unit = SourceUnit::load(file.path()).expect("Could not load script");
        assert_eq!(unit.contents(), "1 + 1");
        assert_eq!(unit.name(), file.path().display().to_string());
    }

    #[test]
    fn test_load_missing() {
        let e = SourceUnit::load("definitely/not/here.js").expect_err("Loaded a missing file");
        assert!(matches!(e, ScriptError::IoFailure { .. }));
    }

    #[test]
    fn test_load_empty() {
        let file = tempfile::NamedTempFile::new().expect("Could not create temp file");
        let e = SourceUnit::load(file.path()).expect_err("Loaded an empty file");
        assert!(matches!(e, ScriptError::IoFailure { .. }));
    }

    #[test]
    fn test_contexts_are_monotonic() {
        let mut counter = SourceContextCounter::default();
        let a = counter.next();
        let b = counter.next();
        let c = counter.next();
        assert!(a < b && b < c);
        assert_eq!(counter.issued(), 3);
    }
}
