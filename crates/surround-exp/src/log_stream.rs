//! Captures `tracing` events into an experiment's `log.txt`.
//!
//! The capture is installed as the calling thread's default subscriber for
//! the lifetime of a [`LogCapture`]. Records are formatted
//! `LEVEL:target:message`, appended to `<project_root>/log.txt`, and for cloud
//! drivers also pushed as `logs/<timestamp>_<level>.txt` next to a throttled
//! copy of the growing `log.txt`.

use std::fmt::{self, Write as _};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use surround_store::{PushSource, StorageDriver};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;

use crate::layout;

/// Minimum interval between uploads of the growing `log.txt`.
pub const UPLOAD_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Clock {
    last_stamp: Option<NaiveDateTime>,
    last_upload: Option<Instant>,
}

/// Destination shared by the layer and the writer that installed it.
pub struct LogSink {
    storage: Arc<dyn StorageDriver>,
    log_path: PathBuf,
    experiment_dir: String,
    busy: AtomicBool,
    clock: Mutex<Clock>,
}

impl LogSink {
    /// A sink appending to `<project_root>/log.txt` and uploading under
    /// `experiment_dir`.
    pub fn new(storage: Arc<dyn StorageDriver>, project_root: PathBuf, experiment_dir: String) -> Self {
        Self {
            storage,
            log_path: project_root.join("log.txt"),
            experiment_dir,
            busy: AtomicBool::new(false),
            clock: Mutex::new(Clock::default()),
        }
    }

    /// Path of the local log file.
    pub fn log_path(&self) -> &std::path::Path {
        &self.log_path
    }

    fn record(&self, level: &Level, line: &str) {
        if self.busy.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.append(line) {
            warn!(path = %self.log_path.display(), error = %err, "unable to append to log.txt");
        }
        if self.storage.is_cloud() {
            self.upload_record(level, line);
            self.upload_log_if_due();
        }
        self.busy.store(false, Ordering::SeqCst);
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{line}")
    }

    fn next_stamp(&self) -> String {
        let mut now = layout::now();
        if let Ok(mut clock) = self.clock.lock() {
            if let Some(last) = clock.last_stamp {
                if now <= last {
                    now = last + chrono::Duration::microseconds(1);
                }
            }
            clock.last_stamp = Some(now);
        }
        layout::format_start_time(now)
    }

    fn upload_record(&self, level: &Level, line: &str) {
        let key = format!("{}/logs/{}_{}.txt", self.experiment_dir, self.next_stamp(), level);
        if let Err(err) = self.storage.push(&key, PushSource::Bytes(line.as_bytes()), true) {
            warn!(key = %key, error = %err, "unable to upload log record");
        }
    }

    fn upload_log_if_due(&self) {
        let due = match self.clock.lock() {
            Ok(mut clock) => {
                let due = clock
                    .last_upload
                    .map_or(true, |last| last.elapsed() >= UPLOAD_INTERVAL);
                if due {
                    clock.last_upload = Some(Instant::now());
                }
                due
            }
            Err(_) => false,
        };
        if due {
            self.upload_log();
        }
    }

    fn upload_log(&self) {
        let key = format!("{}/log.txt", self.experiment_dir);
        if let Err(err) = self.storage.push(&key, PushSource::Path(&self.log_path), true) {
            warn!(key = %key, error = %err, "unable to upload log.txt");
        }
    }
}

/// `tracing` layer forwarding INFO and more severe events to a [`LogSink`].
pub struct LogStreamLayer {
    sink: Arc<LogSink>,
}

impl LogStreamLayer {
    /// Wraps `sink`.
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for LogStreamLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO {
            return;
        }
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format!("{}:{}:{}", metadata.level(), metadata.target(), visitor.finish());
        self.sink.record(metadata.level(), &line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(mut self) -> String {
        if !self.fields.is_empty() {
            if !self.message.is_empty() {
                self.message.push(' ');
            }
            self.message.push_str(self.fields.trim_start());
        }
        self.message
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// An installed capture. Dropping it, or calling [`LogCapture::detach`],
/// restores the thread's previous subscriber.
pub struct LogCapture {
    sink: Arc<LogSink>,
    _guard: DefaultGuard,
}

impl LogCapture {
    /// Installs a capture into `sink` on the current thread. INFO and more
    /// severe events are also printed to stderr.
    pub fn attach(sink: Arc<LogSink>) -> Self {
        Self::attach_with_console(sink, std::io::stderr)
    }

    /// Like [`LogCapture::attach`], printing to `console` instead of stderr.
    pub fn attach_with_console<W>(sink: Arc<LogSink>, console: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let console = tracing_subscriber::fmt::layer()
            .with_writer(console)
            .with_filter(LevelFilter::INFO);
        let subscriber = Registry::default()
            .with(LogStreamLayer::new(sink.clone()))
            .with(console);
        let guard = tracing::subscriber::set_default(subscriber);
        Self { sink, _guard: guard }
    }

    /// The sink records are written to.
    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    /// Stops capturing.
    pub fn detach(self) -> Arc<LogSink> {
        self.sink.clone()
    }
}
