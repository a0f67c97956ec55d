use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Where `host.echo` writes its lines
pub struct HostOutput(Box<dyn Write>);

impl HostOutput {
    /// Wraps any writer
    pub fn new(writer: impl Write + 'static) -> Self {
        Self(Box::new(writer))
    }

    /// Writes to the process's standard output
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Writes `line` followed by a newline, then flushes
    ///
    /// # Errors
    /// Fails if the underlying writer does
    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.0, "{line}")?;
        self.0.flush()
    }
}

impl Default for HostOutput {
    fn default() -> Self {
        Self::stdout()
    }
}

impl std::fmt::Debug for HostOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HostOutput")
    }
}

/// An in-memory sink that can be read back while the host still writes to it
///
/// # Example
/// ```rust
/// use jsrt_host::{HostOutput, SharedBuffer};
///
/// let buffer = SharedBuffer::default();
/// let mut output = HostOutput::new(buffer.clone());
/// output.write_line("a b").unwrap();
/// assert_eq!(buffer.contents(), "a b\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far, decoded lossily
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    /// Lines written so far, without their terminators
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
