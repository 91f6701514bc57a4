use std::fs::{self, File};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::PartLocation;
use crate::error::PkgError;
use crate::fetcher::{CHUNK_SIZE, read_chunk};
use crate::staging::{StagedPiece, StagingStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Only one piece: it already is the artifact.
    Skipped { path: Utf8PathBuf },
    Merged {
        path: Utf8PathBuf,
        pieces: usize,
        bytes: u64,
        sources_deleted: bool,
    },
}

impl MergeOutcome {
    pub fn path(&self) -> &Utf8Path {
        match self {
            MergeOutcome::Skipped { path } | MergeOutcome::Merged { path, .. } => path,
        }
    }
}

/// Where merged bytes go. `commit` must make everything written durable.
pub(crate) trait MergeOutput: Write {
    fn commit(&mut self) -> io::Result<()>;
}

impl MergeOutput for File {
    fn commit(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_all()
    }
}

pub fn merge_pieces(
    store: &StagingStore,
    locations: &[PartLocation],
    delete_sources: bool,
    sink: &dyn ProgressSink,
) -> Result<MergeOutcome, PkgError> {
    merge_with(store, locations, delete_sources, sink, |path| {
        File::create(path.as_std_path())
    })
}

pub(crate) fn merge_with<W, F>(
    store: &StagingStore,
    locations: &[PartLocation],
    delete_sources: bool,
    sink: &dyn ProgressSink,
    create: F,
) -> Result<MergeOutcome, PkgError>
where
    W: MergeOutput,
    F: FnOnce(&Utf8Path) -> io::Result<W>,
{
    match locations {
        [] => return Err(PkgError::NoPieces),
        [only] => {
            let piece = store.staged_piece(only)?;
            sink.event(ProgressEvent::message(
                "phase=Merge; merging skipped as there is only one piece",
            ));
            return Ok(MergeOutcome::Skipped {
                path: piece.final_path,
            });
        }
        _ => {}
    }

    let pieces = ordered_pieces(store, locations)?;
    for piece in &pieces {
        if !piece.final_path.as_std_path().is_file() {
            return Err(PkgError::MergeMissingPiece {
                index: piece.index,
                path: piece.final_path.clone(),
            });
        }
    }

    let first = locations
        .iter()
        .find(|location| location.index == 0)
        .ok_or_else(|| PkgError::MergeOrder("no piece with index 0".to_string()))?;
    let merged_path = store.merged_path(first)?;
    if pieces.iter().any(|piece| piece.final_path == merged_path) {
        return Err(PkgError::MergeOrder(format!(
            "merged output {merged_path} collides with a piece"
        )));
    }

    let total = pieces.len();
    info!(pieces = total, path = %merged_path, "merging pieces");
    sink.event(ProgressEvent::merged(0, total));

    let mut output = create(&merged_path)
        .map_err(|err| PkgError::Filesystem(format!("create {merged_path}: {err}")))?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;
    for (done, piece) in pieces.iter().enumerate() {
        bytes += append_piece(&mut output, piece, &mut buffer)?;
        sink.event(ProgressEvent::merged(done + 1, total));
    }
    output
        .commit()
        .map_err(|err| PkgError::Filesystem(format!("finish {merged_path}: {err}")))?;
    drop(output);

    if delete_sources {
        for piece in &pieces {
            fs::remove_file(piece.final_path.as_std_path()).map_err(|err| {
                PkgError::Filesystem(format!("remove {}: {err}", piece.final_path))
            })?;
        }
        info!(pieces = total, "deleted merged pieces");
    }

    info!(bytes, path = %merged_path, "merge complete");
    Ok(MergeOutcome::Merged {
        path: merged_path,
        pieces: total,
        bytes,
        sources_deleted: delete_sources,
    })
}

/// Staged pieces sorted by their catalog index. Indices must be exactly
/// `0..len`.
fn ordered_pieces(
    store: &StagingStore,
    locations: &[PartLocation],
) -> Result<Vec<StagedPiece>, PkgError> {
    let mut pieces = locations
        .iter()
        .map(|location| store.staged_piece(location))
        .collect::<Result<Vec<_>, PkgError>>()?;
    pieces.sort_by_key(|piece| piece.index);

    for (expected, piece) in pieces.iter().enumerate() {
        if piece.index != expected {
            return Err(PkgError::MergeOrder(format!(
                "expected index {expected}, found {}",
                piece.index
            )));
        }
    }
    Ok(pieces)
}

fn append_piece<W: Write>(
    output: &mut W,
    piece: &StagedPiece,
    buffer: &mut [u8],
) -> Result<u64, PkgError> {
    let fail = |err: io::Error| PkgError::MergeWrite {
        index: piece.index,
        path: piece.final_path.clone(),
        message: err.to_string(),
    };
    let mut input = File::open(piece.final_path.as_std_path()).map_err(fail)?;
    let mut copied = 0u64;
    loop {
        let read = read_chunk(&mut input, buffer).map_err(fail)?;
        if read == 0 {
            break;
        }
        output.write_all(&buffer[..read]).map_err(fail)?;
        copied += read as u64;
    }
    Ok(copied)
}
