use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::{Frame, FrameSource, SourceError};

/// Frame source over a directory of still images.
///
/// The file list is snapshotted and sorted at construction; later changes to
/// the directory are not observed.
pub struct FilesystemSource {
    paths: Vec<PathBuf>,
    cursor: usize,
}

impl FilesystemSource {
    /// Enumerate regular files directly under `dir` whose extension matches
    /// `extension` (leading dot optional), sorted lexicographically.
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Result<Self, SourceError> {
        let dir = dir.into();
        let wanted = extension.trim_start_matches('.');

        let entries = fs::read_dir(&dir).map_err(|source| SourceError::Enumerate {
            dir: dir.clone(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SourceError::Enumerate {
                dir: dir.clone(),
                source,
            })?;
            let path = entry.path();
            let matches = path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == wanted);
            if matches {
                paths.push(path);
            }
        }
        paths.sort();

        debug!(dir = %dir.display(), frames = paths.len(), "filesystem frame source ready");
        Ok(Self { paths, cursor: 0 })
    }

    /// Number of frames remaining, including the current one.
    pub fn remaining(&self) -> usize {
        self.paths.len().saturating_sub(self.cursor)
    }
}

impl FrameSource for FilesystemSource {
    fn is_finished(&self) -> bool {
        self.cursor >= self.paths.len()
    }

    fn read_next(&mut self) -> Option<Frame> {
        if self.is_finished() {
            return None;
        }
        let path = self.paths[self.cursor].clone();
        self.cursor += 1;

        match image::open(&path) {
            Ok(decoded) => Some(Frame::from_rgb8(decoded.to_rgb8())),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable frame");
                None
            }
        }
    }
}
