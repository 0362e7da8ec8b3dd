pub mod inference;
pub mod session;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub use inference::{
    BackendConfig, ConversationMessage, InferenceClient, InferenceError, ModelCatalog,
    ProviderConfig, ProviderKind, ProviderSettings, ProviderStatus, Role,
};
pub use session::{GenerationHandle, GenerationOutcome, SessionError, SessionManager, SessionState};

/// Log file name inside the log directory.
const LOG_FILE_NAME: &str = "localchat.log";

/// Rotated log files kept next to the current one.
const LOG_FILES_KEPT: u32 = 3;

/// Return the platform-standard data directory for LocalChat.
///
/// - macOS: `~/Library/Application Support/localchat/`
/// - Windows: `{FOLDERID_RoamingAppData}\localchat\`
/// - Linux: `$XDG_DATA_HOME/localchat/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.localchat/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("localchat");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".localchat")
}

/// Install the global tracing subscriber.
///
/// With a `log_dir`, rotates existing logs (keeps the last 3) and writes a
/// fresh `localchat.log` through a line-flushing writer. Without one, logs go
/// to stderr. `RUST_LOG` overrides the default filter; setting
/// `LOCALCHAT_LOG_FORMAT=json` switches to JSON lines.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(log_dir: Option<&Path>) -> io::Result<bool> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("localchat=info,warn"));
    let json = std::env::var("LOCALCHAT_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let (installed, log_path) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let log_path = dir.join(LOG_FILE_NAME);
            rotate_log_file(&log_path, LOG_FILES_KEPT);

            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?;
            let writer = FlushingWriter::new(log_file);

            let builder = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            let installed = if json {
                builder.json().try_init().is_ok()
            } else {
                builder.try_init().is_ok()
            };
            (installed, Some(log_path))
        }
        None => {
            let builder = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true);
            let installed = if json {
                builder.json().try_init().is_ok()
            } else {
                builder.try_init().is_ok()
            };
            (installed, None)
        }
    };

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_file = ?log_path.as_ref().map(|p| p.display().to_string()),
            pid = std::process::id(),
            "=== LocalChat starting ==="
        );
    }
    Ok(installed)
}

/// `localchat.log` plus `n` gives `localchat.log.n`.
fn rotated_path(base_path: &Path, n: u32) -> PathBuf {
    let mut name = base_path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Shift `base_path` into `.1`, `.1` into `.2`, and so on up to `.{keep}`;
/// whatever was at `.{keep}` is discarded. Gaps in the chain are fine.
fn rotate_log_file(base_path: &Path, keep: u32) {
    if keep == 0 {
        let _ = std::fs::remove_file(base_path);
        return;
    }
    let _ = std::fs::remove_file(rotated_path(base_path, keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(rotated_path(base_path, n), rotated_path(base_path, n + 1));
    }
    let _ = std::fs::rename(base_path, rotated_path(base_path, 1));
}

/// Log file handle shared by every subscriber writer; each write is flushed
/// before returning.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<File>>,
}

impl FlushingWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    fn file(&self) -> io::Result<MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file()?;
        let written = file.write(buf)?;
        file.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_rotate_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(LOG_FILE_NAME);
        for (suffix, content) in [("", "current"), (".1", "one"), (".2", "two"), (".3", "three")] {
            std::fs::write(format!("{}{suffix}", base.display()), content).unwrap();
        }

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        assert_eq!(read(&dir.path().join("localchat.log.1")), "current");
        assert_eq!(read(&dir.path().join("localchat.log.2")), "one");
        assert_eq!(read(&dir.path().join("localchat.log.3")), "two");
    }

    #[test]
    fn test_rotate_with_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join(LOG_FILE_NAME);
        std::fs::write(&base, "current").unwrap();

        rotate_log_file(&base, 3);
        rotate_log_file(&base, 3);

        assert!(!base.exists());
        assert!(!dir.path().join("localchat.log.1").exists());
        assert_eq!(read(&dir.path().join("localchat.log.2")), "current");
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();

        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line\n").unwrap();
        let mut clone = writer.clone();
        clone.write_all(b"more\n").unwrap();

        assert_eq!(read(&path), "line\nmore\n");
    }

    #[test]
    fn test_data_dir_is_named_for_app() {
        let dir = data_dir();
        let name = dir.file_name().unwrap().to_string_lossy();
        assert!(name == "localchat" || name == ".localchat");
    }
}
