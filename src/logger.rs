use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::{self, Write};
use std::sync::Mutex;

/**
 * Stderr logger that defers output until the command line has been parsed.
 *
 * We want to log while resolving the prefix and the CLI itself, before we
 * know what log level the user asked for. Records emitted during that window
 * are buffered and replayed (filtered by the final level) once
 * `print_deferred` is called.
 */
pub struct DboxLogger {
    level: Mutex<LevelFilter>,
    deferred: Mutex<Option<Vec<(Level, ColoredString)>>>,
}

impl DboxLogger {
    pub fn new(level: LevelFilter) -> &'static Self {
        Box::leak(Box::new(Self {
            level: Mutex::new(level),
            deferred: Mutex::new(Some(Vec::new())),
        }))
    }

    pub fn init(&'static self) -> Result<&'static Self, log::SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(LevelFilter::Trace);
        Ok(self)
    }

    pub fn set_level(&self, level: LevelFilter) {
        *self.level.lock().expect("Failed to lock level") = level;
    }

    pub fn print_deferred(&self) {
        let deferred = self
            .deferred
            .lock()
            .expect("Failed to lock deferred")
            .take();
        if let Some(deferred) = deferred {
            let level_filter =
                *self.level.lock().expect("Failed to lock level");
            let mut stderr = io::stderr();
            for (level, line) in deferred {
                if level <= level_filter {
                    let _ = writeln!(stderr, "{}", line);
                }
            }
        }
    }

    fn render(record: &Record) -> ColoredString {
        let (level_str, color) = match record.level() {
            Level::Error => (record.level().to_string(), colored::Color::Red),
            Level::Warn => {
                (format!("{} ", record.level()), colored::Color::Yellow)
            }
            Level::Info => {
                (format!("{} ", record.level()), colored::Color::White)
            }
            Level::Debug => {
                (record.level().to_string(), colored::Color::Blue)
            }
            Level::Trace => {
                (record.level().to_string(), colored::Color::BrightBlack)
            }
        };
        let level_str = level_str.color(color);
        format!("[{}] {}: {}", level_str, record.target(), record.args())
            .color(color)
    }
}

impl Log for DboxLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= *self.level.lock().expect("Failed to lock level")
    }

    fn log(&self, record: &Record) {
        let line = Self::render(record);
        let mut deferred =
            self.deferred.lock().expect("Failed to lock deferred");
        match deferred.as_mut() {
            Some(buffer) => buffer.push((record.level(), line)),
            None => {
                if self.enabled(record.metadata()) {
                    let _ = writeln!(io::stderr(), "{}", line);
                }
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}
