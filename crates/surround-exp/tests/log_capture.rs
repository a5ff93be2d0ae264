use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use surround_exp::{LogCapture, LogSink};
use surround_store::{LocalDriver, StorageDriver};

#[derive(Clone, Default)]
struct Console(Arc<Mutex<Vec<u8>>>);

impl Console {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().expect("console lock").clone()).expect("utf8")
    }
}

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("console lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn console_and_log_file_only_see_info_and_above() {
    let store = tempfile::tempdir().expect("store");
    let root = tempfile::tempdir().expect("root");
    let storage: Arc<dyn StorageDriver> = Arc::new(LocalDriver::new(store.path()).expect("driver"));
    let sink = Arc::new(LogSink::new(storage, root.path().to_path_buf(), "runs/t".to_string()));
    let console = Console::default();

    let writer = console.clone();
    let capture = LogCapture::attach_with_console(sink, move || writer.clone());
    tracing::debug!(target: "capture", "hidden detail");
    tracing::trace!(target: "capture", "hidden trace");
    tracing::info!(target: "capture", "kept");
    capture.detach();
    tracing::info!(target: "capture", "after detach");

    let printed = console.text();
    assert!(printed.contains("kept"), "{printed}");
    assert!(!printed.contains("hidden"), "{printed}");
    assert!(!printed.contains("after detach"), "{printed}");

    let log = std::fs::read_to_string(root.path().join("log.txt")).expect("log file");
    assert_eq!(log, "INFO:capture:kept\n");
}
