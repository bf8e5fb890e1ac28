//! Debug sink for HAL diagnostics.
//!
//! # Framing
//!
//! ```text
//! gateway:  "0;255;3;0;9;<millis> "  then body
//! plain:    "<millis> "              then body
//! ```
//!
//! The gateway header is a log-message record (node 255, child 0,
//! internal command 3, type 9) so the controller can tell diagnostics from
//! payload traffic.
//!
//! The body is formatted into a fixed `N`-byte buffer and emitted as a C
//! string (up to the first NUL). Oversized bodies are truncated. In gateway
//! mode the last two bytes are always `'\n'` and NUL, so a body that filled
//! the buffer still ends the line.
//!
//! Emission is a direct console write. No buffering, no flush.

use crate::features::{NodeRole, BUILD, SERIAL_OUTPUT_SIZE};

/// Controller command for internal messages.
pub const C_INTERNAL: u8 = 3;

/// Internal message type for log records.
pub const I_LOG_MESSAGE: u8 = 9;

/// Format into a fixed buffer (truncating).
///
/// Returns the number of bytes written. Never overflows `buf`.
pub fn format_to_buffer(buf: &mut [u8], args: core::fmt::Arguments<'_>) -> usize {
    use core::fmt::Write;

    struct BufWriter<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl<'a> Write for BufWriter<'a> {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            let bytes = s.as_bytes();
            let remaining = self.buf.len() - self.pos;
            let to_write = bytes.len().min(remaining);
            self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
            Ok(())
        }
    }

    let mut writer = BufWriter { buf, pos: 0 };
    let _ = core::fmt::write(&mut writer, args);
    writer.pos
}

/// Envelope put in front of each diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    /// Log-message record understood by the controller.
    Gateway,
    /// Timestamp and a space.
    Plain,
}

impl DebugMode {
    pub const fn for_role(role: NodeRole) -> Self {
        match role {
            NodeRole::Gateway => DebugMode::Gateway,
            _ => DebugMode::Plain,
        }
    }

    /// Mode of this build.
    pub const fn for_build() -> Self {
        Self::for_role(BUILD.role)
    }
}

/// Fixed-size formatter for [`Hal::debug_print`](crate::hal::Hal::debug_print).
pub struct DebugSink<const N: usize = SERIAL_OUTPUT_SIZE> {
    buf: [u8; N],
    mode: DebugMode,
}

impl<const N: usize> DebugSink<N> {
    pub const fn new(mode: DebugMode) -> Self {
        assert!(N >= 2, "debug buffer must hold a newline and a terminator");
        Self { buf: [0; N], mode }
    }

    pub fn mode(&self) -> DebugMode {
        self.mode
    }

    /// Raw buffer, including the bytes after the terminator.
    pub fn buffer(&self) -> &[u8; N] {
        &self.buf
    }

    /// Format the header for `millis` and return it.
    pub fn header(&mut self, millis: u32) -> &[u8] {
        match self.mode {
            DebugMode::Gateway => self.render(format_args!(
                "0;255;{};0;{};{} ",
                C_INTERNAL, I_LOG_MESSAGE, millis
            )),
            DebugMode::Plain => self.render(format_args!("{} ", millis)),
        }
    }

    /// Format a message body and return the bytes to emit.
    pub fn body(&mut self, args: core::fmt::Arguments<'_>) -> &[u8] {
        self.buf.fill(0);
        format_to_buffer(&mut self.buf[..N - 1], args);
        if self.mode == DebugMode::Gateway {
            self.buf[N - 2] = b'\n';
            self.buf[N - 1] = 0;
        }
        self.c_str()
    }

    /// Emit header and body through `emit`.
    pub fn print(&mut self, millis: u32, args: core::fmt::Arguments<'_>, mut emit: impl FnMut(&[u8])) {
        emit(self.header(millis));
        emit(self.body(args));
    }

    fn render(&mut self, args: core::fmt::Arguments<'_>) -> &[u8] {
        self.buf.fill(0);
        format_to_buffer(&mut self.buf[..N - 1], args);
        self.c_str()
    }

    fn c_str(&self) -> &[u8] {
        let end = self.buf.iter().position(|&b| b == 0).unwrap_or(N);
        &self.buf[..end]
    }
}

impl<const N: usize> Default for DebugSink<N> {
    fn default() -> Self {
        Self::new(DebugMode::for_build())
    }
}

/// Diagnostic print through a HAL. Compiles to nothing unless the build
/// resolved the `debug` feature.
///
/// ```ignore
/// hw_debug!(&mut hal, "node id {}", id);
/// ```
#[macro_export]
macro_rules! hw_debug {
    ($hal:expr, $($arg:tt)*) => {{
        if $crate::features::BUILD.debug_enabled() {
            $crate::hal::Hal::debug_print($hal, format_args!($($arg)*));
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_to_buffer() {
        let mut buf = [0u8; 32];
        let len = format_to_buffer(&mut buf, format_args!("Hello {}", 42));
        assert_eq!(&buf[..len], b"Hello 42");
    }

    #[test]
    fn test_format_to_buffer_truncates() {
        let mut buf = [0u8; 5];
        let len = format_to_buffer(&mut buf, format_args!("Hello world"));
        assert_eq!(len, 5);
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn test_mode_from_role() {
        assert_eq!(DebugMode::for_role(NodeRole::Gateway), DebugMode::Gateway);
        assert_eq!(DebugMode::for_role(NodeRole::Repeater), DebugMode::Plain);
        assert_eq!(DebugMode::for_role(NodeRole::Sensor), DebugMode::Plain);
    }

    #[test]
    fn test_gateway_header() {
        let mut sink = DebugSink::<64>::new(DebugMode::Gateway);
        assert_eq!(sink.header(1234), b"0;255;3;0;9;1234 ");
    }

    #[test]
    fn test_plain_header() {
        let mut sink = DebugSink::<64>::new(DebugMode::Plain);
        assert_eq!(sink.header(77), b"77 ");
    }
}
