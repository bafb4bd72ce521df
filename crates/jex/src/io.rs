use std::io::{self, Write as _};

/// Trait for handling output from the `print` builtin.
///
/// Implement this to capture or redirect print output from sandboxed
/// code. `write` receives one formatted argument at a time; separators
/// and the trailing newline arrive through `push`.
pub trait PrintSink: std::fmt::Debug {
    /// Writes the text of a single printed argument.
    fn write(&mut self, text: &str);

    /// Writes a separator or terminator character.
    fn push(&mut self, end: char);
}

/// Default sink that writes to stdout.
#[derive(Debug, Default)]
pub struct StdSink;

impl PrintSink for StdSink {
    fn write(&mut self, text: &str) {
        let _ = io::stdout().write_all(text.as_bytes());
    }

    fn push(&mut self, end: char) {
        let mut buf = [0u8; 4];
        let _ = io::stdout().write_all(end.encode_utf8(&mut buf).as_bytes());
        if end == '\n' {
            let _ = io::stdout().flush();
        }
    }
}

/// Sink that collects all output into a shared buffer.
///
/// Cloning yields another handle onto the same buffer, so a caller can
/// keep one handle while the runtime owns the other and read the output
/// afterwards. Useful for tests and for capturing output
/// programmatically.
#[derive(Debug, Default, Clone)]
pub struct CollectSink {
    buffer: std::rc::Rc<std::cell::RefCell<String>>,
}

impl CollectSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The output collected so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.buffer.borrow().clone()
    }
}

impl PrintSink for CollectSink {
    fn write(&mut self, text: &str) {
        self.buffer.borrow_mut().push_str(text);
    }

    fn push(&mut self, end: char) {
        self.buffer.borrow_mut().push(end);
    }
}

/// Sink that discards all output.
#[derive(Debug, Default)]
pub struct NullSink;

impl PrintSink for NullSink {
    fn write(&mut self, _text: &str) {}

    fn push(&mut self, _end: char) {}
}
