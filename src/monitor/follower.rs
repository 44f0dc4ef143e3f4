//! Follows a growing text file line by line, surviving truncation (reseek to the
//! start) and rotation (reopen when the path names a different file).

use std::fs::{File, Metadata};
use std::io::{Read as _, Seek as _, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info};

use crate::core::errors::{IprepError, Result};
use crate::daemon::supervisor::Shutdown;

const READ_CHUNK: usize = 8192;

/// Character encodings accepted for followed files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Charset {
    /// Invalid sequences are replaced with U+FFFD.
    #[default]
    Utf8,
    Latin1,
    /// Bytes above 0x7F are replaced with U+FFFD.
    Ascii,
}

impl Charset {
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|b| char::from(*b)).collect(),
            Self::Ascii => bytes
                .iter()
                .map(|b| {
                    if b.is_ascii() {
                        char::from(*b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
        }
    }
}

impl FromStr for Charset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('_', "-");
        match normalized.as_str() {
            "UTF-8" | "UTF8" => Ok(Self::Utf8),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Ok(Self::Latin1),
            "US-ASCII" | "ASCII" => Ok(Self::Ascii),
            other => Err(format!("unsupported charset {other}")),
        }
    }
}

/// Identity of the file a path currently names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity(meta: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt as _;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn identity(_meta: &Metadata) -> Option<FileIdentity> {
    None
}

/// An open, followed file. Reading starts at the beginning of the file.
#[derive(Debug)]
pub struct LogFollower {
    path: PathBuf,
    poll_interval: Duration,
    charset: Charset,
    file: File,
    identity: Option<FileIdentity>,
    position: u64,
    pending: Vec<u8>,
}

impl LogFollower {
    pub fn open(path: &Path, poll_interval: Duration, charset: Charset) -> Result<Self> {
        let file = File::open(path).map_err(|err| IprepError::io(path, err))?;
        let meta = file.metadata().map_err(|err| IprepError::io(path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
            poll_interval,
            charset,
            file,
            identity: identity(&meta),
            position: 0,
            pending: Vec::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next complete line without its terminator, waiting for more data as
    /// needed. `Ok(None)` once shutdown is requested.
    pub fn next_line(&mut self, shutdown: &Shutdown) -> Result<Option<String>> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            if let Some(end) = memchr::memchr(b'\n', &self.pending) {
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(self.charset.decode(&line)));
            }
            if shutdown.is_triggered() {
                return Ok(None);
            }
            let read = self
                .file
                .read(&mut chunk)
                .map_err(|err| IprepError::io(&self.path, err))?;
            if read > 0 {
                self.pending.extend_from_slice(&chunk[..read]);
                self.position += read as u64;
                continue;
            }
            self.check_replaced()?;
            if shutdown.sleep(self.poll_interval) {
                return Ok(None);
            }
        }
    }

    /// At end of file: reopen if the path now names another file, reseek if the
    /// file shrank. A missing path is an error for the caller's retry loop.
    fn check_replaced(&mut self) -> Result<()> {
        let meta = std::fs::metadata(&self.path).map_err(|err| IprepError::io(&self.path, err))?;
        let current = identity(&meta);
        if current.is_some() && current != self.identity {
            info!(path = %self.path.display(), "followed file rotated; reopening");
            let file = File::open(&self.path).map_err(|err| IprepError::io(&self.path, err))?;
            self.reset(file, current);
        } else if meta.len() < self.position {
            info!(path = %self.path.display(), "followed file truncated; reading from start");
            self.file
                .seek(SeekFrom::Start(0))
                .map_err(|err| IprepError::io(&self.path, err))?;
            self.position = 0;
            self.discard_partial();
        }
        Ok(())
    }

    fn reset(&mut self, file: File, identity: Option<FileIdentity>) {
        self.file = file;
        self.identity = identity;
        self.position = 0;
        self.discard_partial();
    }

    fn discard_partial(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                path = %self.path.display(),
                bytes = self.pending.len(),
                "dropping unterminated line"
            );
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::Write as _;
    use std::time::Duration;

    use super::{Charset, LogFollower};
    use crate::daemon::supervisor::Shutdown;

    fn append(path: &std::path::Path, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open for append");
        file.write_all(text.as_bytes()).expect("append");
    }

    #[test]
    fn reads_complete_lines_and_waits_for_terminator() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        append(&path, "first\r\nsecond\npart");
        let shutdown = Shutdown::new();
        let mut follower =
            LogFollower::open(&path, Duration::from_millis(5), Charset::Utf8).expect("open");

        assert_eq!(follower.next_line(&shutdown).expect("read").as_deref(), Some("first"));
        assert_eq!(follower.next_line(&shutdown).expect("read").as_deref(), Some("second"));
        append(&path, "ial\n");
        assert_eq!(follower.next_line(&shutdown).expect("read").as_deref(), Some("partial"));
    }

    #[test]
    fn truncation_restarts_from_the_beginning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        append(&path, "a long first line\n");
        let shutdown = Shutdown::new();
        let mut follower =
            LogFollower::open(&path, Duration::from_millis(5), Charset::Utf8).expect("open");
        assert!(follower.next_line(&shutdown).expect("read").is_some());

        std::fs::write(&path, "new\n").expect("truncate and rewrite");
        assert_eq!(follower.next_line(&shutdown).expect("read").as_deref(), Some("new"));
    }

    #[cfg(unix)]
    #[test]
    fn rotation_reopens_the_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        append(&path, "old\n");
        let shutdown = Shutdown::new();
        let mut follower =
            LogFollower::open(&path, Duration::from_millis(5), Charset::Utf8).expect("open");
        assert_eq!(follower.next_line(&shutdown).expect("read").as_deref(), Some("old"));

        std::fs::rename(&path, dir.path().join("app.log.1")).expect("rotate");
        append(&path, "fresh line after rotation\n");
        assert_eq!(
            follower.next_line(&shutdown).expect("read").as_deref(),
            Some("fresh line after rotation")
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(
            LogFollower::open(&dir.path().join("absent.log"), Duration::from_millis(5), Charset::Utf8)
                .is_err()
        );
    }

    #[test]
    fn shutdown_interrupts_the_idle_poll() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("idle.log");
        append(&path, "");
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut follower =
            LogFollower::open(&path, Duration::from_secs(60), Charset::Utf8).expect("open");
        assert_eq!(follower.next_line(&shutdown).expect("read"), None);
    }

    #[test]
    fn charsets_decode_high_bytes() {
        assert_eq!(Charset::Latin1.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
        assert_eq!(Charset::Ascii.decode(&[0x41, 0xE9]), "A\u{FFFD}");
        assert_eq!(Charset::Utf8.decode("é".as_bytes()), "é");
        assert_eq!("iso_8859-1".parse::<Charset>(), Ok(Charset::Latin1));
        assert!("EBCDIC".parse::<Charset>().is_err());
    }
}
