use crate::shared::constants;
use lazy_static::lazy_static;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Clone)]
struct LoggerPaths {
    error_path: PathBuf,
    debug_path: PathBuf,
}

lazy_static! {
    static ref LOGGER: Mutex<Option<LoggerPaths>> = Mutex::new(None);
}

fn append_line(path: &Path, line: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", line);
    }
}

fn start_file(path: &Path, title: &str) {
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
    {
        let _ = writeln!(file, "=== {} {} Log Started: {} ===", constants::APP_NAME, title, chrono::Local::now());
    }
}

/// Truncates the error/debug logs in `dir` and installs the panic hook.
///
/// Until this runs every logging call is a no-op.
pub fn init(dir: &Path) {
    let paths = LoggerPaths {
        error_path: dir.join(constants::ERROR_LOG_FILE),
        debug_path: dir.join(constants::DEBUG_LOG_FILE),
    };

    start_file(&paths.error_path, "Error");
    start_file(&paths.debug_path, "Debug");

    *LOGGER.lock().unwrap_or_else(PoisonError::into_inner) = Some(paths.clone());

    panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::capture();
        let msg = match info.payload().downcast_ref::<&str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<Any>",
            },
        };

        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());

        let thread = std::thread::current();
        let error_msg = format!(
            "\nCRITICAL PANIC in thread '{}' at {}:\nMessage: {}\nBacktrace:\n{:?}\n",
            thread.name().unwrap_or("<unnamed>"),
            location,
            msg,
            backtrace
        );

        append_line(&paths.error_path, &error_msg);
        append_line(&paths.debug_path, &error_msg);

        // The renderer may still own the terminal.
        let _ = crossterm::terminal::disable_raw_mode();
        let _ = crossterm::execute!(
            std::io::stdout(),
            crossterm::cursor::Show,
            crossterm::terminal::LeaveAlternateScreen
        );
        eprintln!("{} crashed. See {} for details.", constants::APP_NAME, paths.error_path.display());
    }));
}

pub fn log(level: &str, msg: &str) {
    let guard = LOGGER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(paths) = guard.as_ref() {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let line = format!("[{}][{}] {}", timestamp, level, msg);
        append_line(&paths.debug_path, &line);

        if level == "ERROR" {
            append_line(&paths.error_path, &line);
        }
    }
}

pub fn info(msg: &str) {
    log("INFO", msg);
}

pub fn warn(msg: &str) {
    log("WARN", msg);
}

pub fn error(msg: &str) {
    log("ERROR", msg);
}

pub fn debug(msg: &str) {
    log("DEBUG", msg);
}
