//! Small filesystem helpers shared by the persistent components.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::OffsetDateTime;

/// Atomic write: write to .tmp then rename.
///
/// A crash before the rename leaves the previous file untouched.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = tmp_path(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// `foo.dat` -> `foo.dat.tmp`, keeping the original extension visible.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Local wall-clock time, falling back to UTC when the offset is unknown.
fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// `yyyymmdd-hhmm` tag for renamed-aside files.
pub fn timestamp_tag() -> String {
    let format = format_description!("[year][month][day]-[hour][minute]");
    now_local()
        .format(&format)
        .unwrap_or_else(|_| "00000000-0000".to_string())
}

/// Current local calendar year.
pub fn current_year() -> i32 {
    now_local().year()
}

/// Current local date as `(year, month, day)`.
pub fn current_date() -> (i32, u8, u8) {
    let now = now_local();
    (now.year(), u8::from(now.month()), now.day())
}

/// Rename a corrupt file aside as `[CRASH][yyyymmdd-hhmm]<name>` in the same
/// folder. Returns the new path, or `None` if there was nothing to move.
pub fn quarantine(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "file name is not valid UTF-8",
        ));
    };
    let target = path.with_file_name(format!("[CRASH][{}]{}", timestamp_tag(), name));
    fs::rename(path, &target)?;
    Ok(Some(target))
}

/// Exclusive, non-blocking write lock on an existing file.
///
/// Opening for writing fails on read-only files; on unix an advisory
/// `flock` additionally rejects a second concurrent writer.
pub struct WriteLock {
    #[allow(dead_code)] // held only for its lifetime
    file: File,
}

impl WriteLock {
    pub fn try_acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = file.as_raw_fd();
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("{} is locked by another writer", path.display()),
                ));
            }
        }

        Ok(Self { file })
    }
}

#[cfg(unix)]
impl Drop for WriteLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let fd = self.file.as_raw_fd();
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("a.txt.tmp").exists());
    }

    #[test]
    fn timestamp_tag_shape() {
        let tag = timestamp_tag();
        assert_eq!(tag.len(), 13);
        assert_eq!(&tag[8..9], "-");
        assert!(tag.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn quarantine_renames_with_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.dat");
        fs::write(&path, b"junk").unwrap();
        let moved = quarantine(&path).unwrap().unwrap();
        assert!(!path.exists());
        let name = moved.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("[CRASH]["));
        assert!(name.ends_with("]model.dat"));
        assert_eq!(fs::read(&moved).unwrap(), b"junk");
    }

    #[test]
    fn quarantine_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert!(quarantine(&dir.path().join("none.dat")).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn second_lock_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.txt");
        fs::write(&path, "x").unwrap();
        let _first = WriteLock::try_acquire(&path).unwrap();
        let err = WriteLock::try_acquire(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
