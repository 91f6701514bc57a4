use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::domain::PartLocation;
use crate::error::PkgError;

pub const PIECE_EXTENSION: &str = ".pkg";
pub const INCOMPLETE_SUFFIX: &str = ".incomplete_piece";
pub const MERGED_MARKER: &str = "merged";

/// On-disk paths for one piece. `final_path` only ever appears by renaming a
/// fully written `temp_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPiece {
    pub index: usize,
    pub temp_path: Utf8PathBuf,
    pub final_path: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct StagingStore {
    output_dir: Utf8PathBuf,
}

impl StagingStore {
    pub fn new(output_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    pub fn ensure_output_dir(&self) -> Result<(), PkgError> {
        fs::create_dir_all(self.output_dir.as_std_path())
            .map_err(|err| PkgError::Filesystem(format!("create {}: {err}", self.output_dir)))
    }

    pub fn staged_piece(&self, location: &PartLocation) -> Result<StagedPiece, PkgError> {
        let name = location
            .base_name()
            .ok_or_else(|| PkgError::InvalidPartUrl(location.url.clone()))?;
        let stem = name.strip_suffix(PIECE_EXTENSION).unwrap_or(name);
        Ok(StagedPiece {
            index: location.index,
            temp_path: self.output_dir.join(format!("{stem}{INCOMPLETE_SUFFIX}")),
            final_path: self.output_dir.join(name),
        })
    }

    /// `<base>merged.pkg`, where `<base>` is the first piece's name without
    /// its extension and its own index.
    pub fn merged_path(&self, first: &PartLocation) -> Result<Utf8PathBuf, PkgError> {
        let name = first
            .base_name()
            .ok_or_else(|| PkgError::InvalidPartUrl(first.url.clone()))?;
        let stem = name.strip_suffix(PIECE_EXTENSION).unwrap_or(name);
        let index = first.index.to_string();
        let base = stem.strip_suffix(index.as_str()).unwrap_or(stem);
        Ok(self
            .output_dir
            .join(format!("{base}{MERGED_MARKER}{PIECE_EXTENSION}")))
    }

    pub fn promote(&self, piece: &StagedPiece) -> Result<(), PkgError> {
        fs::rename(piece.temp_path.as_std_path(), piece.final_path.as_std_path()).map_err(
            |err| match err.kind() {
                io::ErrorKind::NotFound if !piece.temp_path.as_std_path().exists() => {
                    PkgError::StagingMissing(piece.temp_path.clone())
                }
                _ => PkgError::Filesystem(format!(
                    "rename {} -> {}: {err}",
                    piece.temp_path, piece.final_path
                )),
            },
        )?;
        debug!(index = piece.index, path = %piece.final_path, "promoted piece");
        Ok(())
    }

    /// Remove staging files left behind by an interrupted run.
    pub fn purge_incomplete(&self) -> Result<usize, PkgError> {
        let entries = match fs::read_dir(self.output_dir.as_std_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(PkgError::Filesystem(format!(
                    "read {}: {err}",
                    self.output_dir
                )));
            }
        };

        let mut purged = 0;
        for entry in entries {
            let entry = entry.map_err(|err| PkgError::Filesystem(err.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(INCOMPLETE_SUFFIX) {
                continue;
            }
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            info!(file = %name, "removing incomplete piece");
            fs::remove_file(&path)
                .map_err(|err| PkgError::Filesystem(format!("remove {}: {err}", path.display())))?;
            purged += 1;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = StagingStore::new("out");
        let loc = PartLocation::new(3, "http://cdn/pkg/UP0001-CUSA00001_00-X-A0101-V0100_3.pkg");
        let piece = store.staged_piece(&loc).unwrap();

        assert_eq!(piece.index, 3);
        assert!(piece.final_path.ends_with("UP0001-CUSA00001_00-X-A0101-V0100_3.pkg"));
        assert!(
            piece
                .temp_path
                .ends_with("UP0001-CUSA00001_00-X-A0101-V0100_3.incomplete_piece")
        );
    }

    #[test]
    fn merged_name_strips_part_number() {
        let store = StagingStore::new("out");
        let first = PartLocation::new(0, "http://cdn/pkg/UP0001-CUSA00001_00-X-A0101-V0100_0.pkg");
        let merged = store.merged_path(&first).unwrap();
        assert_eq!(
            merged,
            Utf8PathBuf::from("out/UP0001-CUSA00001_00-X-A0101-V0100_merged.pkg")
        );
    }

    #[test]
    fn merged_name_keeps_digits_of_the_base() {
        let store = StagingStore::new("out");
        let first = PartLocation::new(0, "http://x/GAME120.pkg");
        assert_eq!(
            store.merged_path(&first).unwrap(),
            Utf8PathBuf::from("out/GAME12merged.pkg")
        );

        let unnumbered = PartLocation::new(0, "http://x/GAME.pkg");
        assert_eq!(
            store.merged_path(&unnumbered).unwrap(),
            Utf8PathBuf::from("out/GAMEmerged.pkg")
        );
    }
}
