use std::io;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

static INIT: Once = Once::new();

/// Line-buffered writer that hands each formatted event to `console.log`.
pub struct ConsoleWriter {
    buf: Vec<u8>,
}

impl io::Write for ConsoleWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&self.buf);
        web_sys::console::log_1(&line.trim_end().into());
        self.buf.clear();
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}

#[derive(Clone, Copy, Default)]
pub struct MakeConsoleWriter;

impl<'a> MakeWriter<'a> for MakeConsoleWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter { buf: Vec::new() }
    }
}

/// Installs the global subscriber once. Later calls are no-ops.
pub fn init(max_level: Level) {
    INIT.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(max_level);

        #[cfg(target_arch = "wasm32")]
        let res = builder.with_writer(MakeConsoleWriter).try_init();
        #[cfg(not(target_arch = "wasm32"))]
        let res = builder.with_test_writer().try_init();

        // Another subscriber (e.g. a test harness) already owns the global slot.
        let _ = res;
    });
}
