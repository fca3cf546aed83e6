use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::consts::{CANDIDATES_FILE_NAME, CURATION_FILE_NAME, LOCK_FILE_NAME, VOLUME_FILE_NAME};
use crate::error::Result;

/// On-disk layout of a session's outputs:
/// `<dest>/<save_folder>/plane<N>/{data.bin, candidates.json, curation.json}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(dest: &Path, save_folder: &str) -> Self {
        Self {
            root: dest.join(save_folder),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plane_dir(&self, plane: usize) -> PathBuf {
        self.root.join(format!("plane{plane}"))
    }

    pub fn volume_path(&self, plane: usize) -> PathBuf {
        self.plane_dir(plane).join(VOLUME_FILE_NAME)
    }

    pub fn candidates_path(&self, plane: usize) -> PathBuf {
        self.plane_dir(plane).join(CANDIDATES_FILE_NAME)
    }

    pub fn curation_path(&self, plane: usize) -> PathBuf {
        self.plane_dir(plane).join(CURATION_FILE_NAME)
    }

    pub fn lock_path(&self, plane: usize) -> PathBuf {
        self.plane_dir(plane).join(LOCK_FILE_NAME)
    }

    pub fn ensure_plane_dir(&self, plane: usize) -> Result<PathBuf> {
        let dir = self.plane_dir(plane);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Indices of existing `plane<N>` directories, ascending.
    pub fn discover_planes(&self) -> Result<Vec<usize>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut planes: Vec<usize> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("plane"))
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        planes.sort_unstable();
        Ok(planes)
    }
}

/// Read a JSON document, or `None` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_plane_directories() {
        let layout = OutputLayout::new(Path::new("/data/session"), "somata");
        assert_eq!(
            layout.volume_path(2),
            PathBuf::from("/data/session/somata/plane2/data.bin")
        );
        assert_eq!(
            layout.curation_path(0),
            PathBuf::from("/data/session/somata/plane0/curation.json")
        );
    }

    #[test]
    fn discovers_only_plane_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path(), "somata");
        layout.ensure_plane_dir(3).unwrap();
        layout.ensure_plane_dir(1).unwrap();
        fs::create_dir_all(layout.root().join("planeX")).unwrap();
        fs::write(layout.root().join("plane7"), b"not a dir").unwrap();
        assert_eq!(layout.discover_planes().unwrap(), vec![1, 3]);
    }
}
