use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::config;

const LOG_NAME: &str = "enotes.log";

static SINK: OnceLock<Mutex<File>> = OnceLock::new();

fn log_dir() -> PathBuf {
    config::get_config_dir().join("logs")
}

/// Starts a fresh log for this run under [`log_dir`]. The previous run is
/// kept as `enotes.log.old`. When the log cannot be opened, [`log`] does
/// nothing.
pub fn init() {
    match start_log(&log_dir()) {
        Ok(file) => {
            let _ = SINK.set(Mutex::new(file));
        }
        Err(e) => eprintln!("enotes: logging disabled: {}", e),
    }
}

fn start_log(dir: &Path) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LOG_NAME);
    rotate(&path)?;
    open_private(&path)
}

/// Moves `path` to `<path>.old`, replacing any older generation.
fn rotate(path: &Path) -> io::Result<()> {
    let mut old = path.as_os_str().to_owned();
    old.push(".old");
    match fs::rename(path, &old) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn open_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)
}

fn line(at: DateTime<Local>, msg: &str) -> String {
    format!("[{}] {}", at.format("%Y-%m-%d %H:%M:%S%.3f"), msg)
}

/// Appends one line. Callers pass labels and paths, never note text or
/// passwords.
pub fn log(msg: &str) {
    let Some(sink) = SINK.get() else {
        return;
    };
    if let Ok(mut file) = sink.lock() {
        let _ = writeln!(file, "{}", line(Local::now(), msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn restart_keeps_exactly_one_old_generation() {
        let tmp = tempfile::tempdir().unwrap();
        for run in ["first", "second", "third"] {
            let mut file = start_log(tmp.path()).unwrap();
            writeln!(file, "{}", run).unwrap();
        }
        let current = fs::read_to_string(tmp.path().join(LOG_NAME)).unwrap();
        let old = fs::read_to_string(tmp.path().join("enotes.log.old")).unwrap();
        assert_eq!(current, "third\n");
        assert_eq!(old, "second\n");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn log_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        start_log(tmp.path()).unwrap();
        let mode = fs::metadata(tmp.path().join(LOG_NAME))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn lines_carry_a_millisecond_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(line(at, "session: quit"), "[2024-03-09 07:05:01.000] session: quit");
    }
}
