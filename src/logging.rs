//! Console and log-file output for the `webspray` binary.
//!
//! The console gets one bracketed tag per line: the status code for response
//! lines, a level marker for everything else. The log file gets every line
//! as tab-separated `time level target message`.

use std::fmt::{self, Write as _};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use colored::{Color, Colorize};
use tracing::field::{Field, Visit};
use tracing::{info, warn, Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{self as tracing_fmt, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "webspray";
const LOG_FILE_EXTENSION: &str = "log";

/// Message and remaining fields of one event, rendered as text.
#[derive(Debug, Default)]
struct EventText {
  message: String,
  fields: String,
}

impl EventText {
  fn of(event: &Event<'_>) -> Self {
    let mut text = Self::default();
    event.record(&mut text);
    text
  }
}

impl Visit for EventText {
  fn record_str(&mut self, field: &Field, value: &str) {
    if field.name() == "message" {
      self.message.push_str(value);
    } else {
      let _ = write!(self.fields, " {}={}", field.name(), value);
    }
  }

  fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
    if field.name() == "message" {
      let _ = write!(self.message, "{:?}", value);
    } else {
      let _ = write!(self.fields, " {}={:?}", field.name(), value);
    }
  }
}

/// Leading status code of a response line, if the message is one.
fn response_status(message: &str) -> Option<u16> {
  let status: u16 = message.split_whitespace().next()?.parse().ok()?;
  (100..=599).contains(&status).then_some(status)
}

fn level_marker(level: &Level) -> &'static str {
  match *level {
    Level::ERROR => " ! ",
    Level::WARN => " - ",
    Level::INFO => " + ",
    Level::DEBUG => " * ",
    Level::TRACE => " . ",
  }
}

fn level_color(level: &Level) -> Color {
  match *level {
    Level::ERROR => Color::Red,
    Level::WARN => Color::Yellow,
    Level::INFO => Color::Blue,
    Level::DEBUG | Level::TRACE => Color::BrightBlack,
  }
}

fn console_line(level: &Level, message: &str, fields: &str, ansi: bool) -> String {
  let (tag, color) = match response_status(message) {
    Some(200) => ("200".to_string(), Color::BrightGreen),
    Some(status) => (format!("{:03}", status), level_color(level)),
    None => (level_marker(level).to_string(), level_color(level)),
  };
  let tag = format!("[{}]", tag);
  let tag = if ansi { tag.color(color).bold().to_string() } else { tag };
  format!("{} {}{}", tag, message, fields)
}

fn file_line(time: &DateTime<Local>, level: &Level, target: &str, message: &str, fields: &str) -> String {
  format!(
    "{}\t{}\t{}\t{}{}",
    time.format("%Y-%m-%d %H:%M:%S,%3f"),
    level,
    target,
    message,
    fields
  )
}

/// Console formatter: `[200] <response line>` or `[ + ] <message>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleFormat;

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
  S: Subscriber + for<'a> LookupSpan<'a>,
  N: for<'a> FormatFields<'a> + 'static,
{
  fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
    let text = EventText::of(event);
    let ansi = writer.has_ansi_escapes();
    writeln!(
      writer,
      "{}",
      console_line(event.metadata().level(), &text.message, &text.fields, ansi)
    )
  }
}

/// Log-file formatter: `time<TAB>level<TAB>target<TAB>message`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFormat;

impl<S, N> FormatEvent<S, N> for FileFormat
where
  S: Subscriber + for<'a> LookupSpan<'a>,
  N: for<'a> FormatFields<'a> + 'static,
{
  fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
    let text = EventText::of(event);
    let metadata = event.metadata();
    writeln!(
      writer,
      "{}",
      file_line(&Local::now(), metadata.level(), metadata.target(), &text.message, &text.fields)
    )
  }
}

/// `webspray_<start time>.log`
pub fn log_file_name(started: &DateTime<Local>) -> String {
  format!("{}.{}", log_file_stem(started), LOG_FILE_EXTENSION)
}

fn log_file_stem(started: &DateTime<Local>) -> String {
  format!("{}_{}", LOG_FILE_PREFIX, started.format("%Y-%m-%d_%H-%M-%S"))
}

/// Opens the run's log file in `log_dir`, creating the directory if needed.
pub fn open_log_file(log_dir: &Path, started: &DateTime<Local>) -> Result<RollingFileAppender, InitError> {
  RollingFileAppender::builder()
    .rotation(Rotation::NEVER)
    .filename_prefix(log_file_stem(started))
    .filename_suffix(LOG_FILE_EXTENSION)
    .build(log_dir)
}

fn level_filter(debug: bool) -> EnvFilter {
  let default_level = if debug { "webspray=debug" } else { "webspray=info" };
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Keeps the log file's background writer alive. Dropping it flushes the file.
#[derive(Debug)]
pub struct LoggingGuard {
  pub log_file: Option<PathBuf>,
  _file_writer: Option<WorkerGuard>,
}

/// Installs the global subscriber: the console on stderr, plus a log file in
/// `log_dir` when one is given. A log file that cannot be opened is reported
/// on the console and skipped.
pub fn init(debug: bool, log_dir: Option<&Path>) -> LoggingGuard {
  let ansi = io::stderr().is_terminal();
  colored::control::set_override(ansi);
  let started = Local::now();

  let (file_writer, file_guard, file_error) = match log_dir.map(|dir| open_log_file(dir, &started)) {
    Some(Ok(appender)) => {
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (Some(writer), Some(guard), None)
    }
    Some(Err(e)) => (None, None, Some(e)),
    None => (None, None, None),
  };
  let log_file = file_writer
    .as_ref()
    .and(log_dir)
    .map(|dir| dir.join(log_file_name(&started)));

  let console_layer = tracing_fmt::layer()
    .event_format(ConsoleFormat)
    .with_writer(io::stderr)
    .with_ansi(ansi)
    .with_filter(level_filter(debug));
  let file_layer = file_writer.map(|writer| {
    tracing_fmt::layer()
      .event_format(FileFormat)
      .with_writer(writer)
      .with_ansi(false)
      .with_filter(level_filter(debug))
  });
  tracing_subscriber::registry().with(console_layer).with(file_layer).init();

  match (&log_file, file_error) {
    (Some(path), _) => info!("Logging to {}", path.display()),
    (None, Some(e)) => warn!("Could not open log file: {}", e),
    (None, None) => {}
  }
  LoggingGuard {
    log_file,
    _file_writer: file_guard,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diagnostics::{DiagnosticsSink, TaskEvent, TaskEventStatus, TracingSink};
  use chrono::TimeZone;
  use parking_lot::Mutex;
  use std::io::Write;
  use std::sync::Arc;
  use std::time::SystemTime;

  #[derive(Clone, Default)]
  struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

  impl SharedBuffer {
    fn contents(&self) -> String {
      String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
  }

  impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  fn start_time() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 10, 19, 12, 30, 5).unwrap()
  }

  #[test]
  fn test_response_lines_are_tagged_with_their_status() {
    let line = console_line(&Level::INFO, "200  Admin  http://10.0.0.1/", "", false);
    assert_eq!(line, "[200] 200  Admin  http://10.0.0.1/");
    let line = console_line(&Level::DEBUG, "404  Not Found", "", false);
    assert!(line.starts_with("[404] 404"));
  }

  #[test]
  fn test_other_lines_are_tagged_with_their_level() {
    assert_eq!(console_line(&Level::INFO, "URLs: 4", "", false), "[ + ] URLs: 4");
    assert_eq!(console_line(&Level::WARN, "Task interrupted.", " slot=0", false), "[ - ] Task interrupted. slot=0");
    assert_eq!(console_line(&Level::ERROR, "Task failed: boom", "", false), "[ ! ] Task failed: boom");
    assert_eq!(console_line(&Level::DEBUG, "1000 probes", "", false), "[ * ] 1000 probes");
  }

  #[test]
  fn test_ansi_tags_are_coloured() {
    colored::control::set_override(true);
    let line = console_line(&Level::INFO, "200 OK", "", true);
    assert!(line.starts_with("\u{1b}["));
    assert!(line.contains("[200]"));
    assert!(line.ends_with(" 200 OK"));
  }

  #[test]
  fn test_file_line_is_tab_separated() {
    let line = file_line(&start_time(), &Level::ERROR, "webspray::diagnostics", "Task failed: boom", " slot=1");
    assert_eq!(line, "2026-10-19 12:30:05,000\tERROR\twebspray::diagnostics\tTask failed: boom slot=1");
  }

  #[test]
  fn test_log_file_is_named_after_start_time() {
    assert_eq!(log_file_name(&start_time()), "webspray_2026-10-19_12-30-05.log");
  }

  #[test]
  fn test_log_file_is_created_in_log_dir() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("logs");
    let mut appender = open_log_file(&log_dir, &start_time()).unwrap();
    writeln!(appender, "hello").unwrap();
    appender.flush().unwrap();

    let contents = std::fs::read_to_string(log_dir.join(log_file_name(&start_time()))).unwrap();
    assert_eq!(contents, "hello\n");
  }

  #[test]
  fn test_task_failures_reach_the_log_file() {
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::registry().with(
      tracing_fmt::layer()
        .event_format(FileFormat)
        .with_writer(move || writer.clone())
        .with_ansi(false),
    );

    tracing::subscriber::with_default(subscriber, || {
      TracingSink.record(&TaskEvent {
        task_id: 7,
        pool_name: Arc::new("logged".to_string()),
        label: "http://10.0.0.1/".to_string(),
        slot: 2,
        status: TaskEventStatus::Failed {
          detail: "connection reset".to_string(),
        },
        completion_time: SystemTime::now(),
      });
    });

    let contents = buffer.contents();
    let fields: Vec<&str> = contents.trim_end().split('\t').collect();
    assert_eq!(fields.len(), 4, "{:?}", contents);
    assert_eq!(fields[1], "ERROR");
    assert_eq!(fields[2], "webspray::diagnostics");
    assert!(fields[3].starts_with("Task failed: connection reset"));
    assert!(fields[3].contains("task_id=7"));
    assert!(fields[3].contains("label=http://10.0.0.1/"));
  }
}
