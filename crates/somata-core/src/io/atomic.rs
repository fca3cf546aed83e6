use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Result, SomataError};

/// A file that only becomes visible at its destination when committed.
///
/// Content goes to a temporary file in the destination's directory and is
/// renamed over the target on [`AtomicFile::commit`]. Dropping an uncommitted
/// `AtomicFile` deletes the temporary file and leaves the target untouched.
pub struct AtomicFile {
    writer: BufWriter<NamedTempFile>,
    target: PathBuf,
}

impl AtomicFile {
    pub fn create(target: &Path) -> Result<Self> {
        let dir = target.parent().ok_or_else(|| {
            SomataError::Pipeline(format!("{} has no parent directory", target.display()))
        })?;
        std::fs::create_dir_all(dir)?;
        let tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(dir)?;
        Ok(Self {
            writer: BufWriter::new(tmp),
            target: target.to_path_buf(),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Flush, fsync and move the file into place.
    pub fn commit(self) -> Result<()> {
        let tmp = self
            .writer
            .into_inner()
            .map_err(|e| SomataError::Io(e.into_error()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.target).map_err(|e| SomataError::Io(e.error))?;
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Replace `path` with `bytes` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = AtomicFile::create(path)?;
    file.write_all(bytes)?;
    file.commit()
}

/// Replace `path` with the pretty-printed JSON encoding of `value` atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_file_leaves_target_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("out.bin");
        std::fs::write(&target, b"old").unwrap();

        let mut file = AtomicFile::create(&target).unwrap();
        file.write_all(b"new content").unwrap();
        drop(file);

        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn commit_replaces_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("out.bin");
        std::fs::write(&target, b"old").unwrap();
        write_atomic(&target, b"new").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }
}
