use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::catalog::CatalogClient;
use crate::domain::{Catalog, FetchOutcome, PartLocation, PatchEntry, TitleId};
use crate::error::PkgError;
use crate::fetcher::{PieceFetcher, PieceSource};
use crate::merge::{self, MergeOutcome};
use crate::staging::StagingStore;

#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    pub merge: bool,
    pub delete_pieces: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResult {
    pub output_dir: Utf8PathBuf,
    pub purged: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PieceReport {
    pub index: usize,
    pub url: String,
    #[serde(flatten)]
    pub outcome: FetchOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub pieces_fetched: usize,
    pub pieces_skipped: usize,
    pub pieces: Vec<PieceReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub title_id: TitleId,
    pub update_version: String,
    pub output_dir: Utf8PathBuf,
    pub retrieval: RetrievalResult,
    pub merge: Option<MergeOutcome>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Piece { position: usize, total: usize },
    Bytes { written: u64, total: Option<u64> },
    Merge { merged: usize, total: usize },
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub progress: Option<Progress>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            progress: None,
        }
    }

    pub fn piece(position: usize, total: usize) -> Self {
        Self {
            message: format!("phase=Fetch; downloading piece {position} of {total}"),
            progress: Some(Progress::Piece { position, total }),
        }
    }

    pub fn bytes(written: u64, total: Option<u64>) -> Self {
        Self {
            message: format!("transferred {written} bytes"),
            progress: Some(Progress::Bytes { written, total }),
        }
    }

    pub fn merged(merged: usize, total: usize) -> Self {
        Self {
            message: format!("phase=Merge; merged {merged}/{total} pieces"),
            progress: Some(Progress::Merge { merged, total }),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: CatalogClient, S: PieceSource> {
    catalog: C,
    fetcher: PieceFetcher<S>,
}

impl<C: CatalogClient, S: PieceSource> App<C, S> {
    pub fn new(store: StagingStore, catalog: C, source: S) -> Self {
        Self {
            catalog,
            fetcher: PieceFetcher::new(source, store),
        }
    }

    pub fn store(&self) -> &StagingStore {
        self.fetcher.store()
    }

    pub fn output_dir(&self) -> &Utf8Path {
        self.store().output_dir()
    }

    pub fn run_startup_recovery(&self, sink: &dyn ProgressSink) -> Result<RecoveryResult, PkgError> {
        sink.event(ProgressEvent::message(
            "phase=Recover; removing incomplete pieces",
        ));
        let purged = self.store().purge_incomplete()?;
        if purged > 0 {
            info!(purged, dir = %self.output_dir(), "startup recovery removed stale pieces");
        }
        Ok(RecoveryResult {
            output_dir: self.output_dir().to_path_buf(),
            purged,
        })
    }

    pub fn lookup(&self, title_id: &TitleId, sink: &dyn ProgressSink) -> Result<Catalog, PkgError> {
        sink.event(ProgressEvent::message(format!(
            "phase=Resolve; looking up {title_id}"
        )));
        self.catalog.lookup(title_id)
    }

    /// Fetches every piece in index order and stops at the first failure.
    pub fn run_retrieval(
        &self,
        locations: &[PartLocation],
        sink: &dyn ProgressSink,
    ) -> Result<RetrievalResult, PkgError> {
        let total = locations.len();
        let mut ordered: Vec<&PartLocation> = locations.iter().collect();
        ordered.sort_by_key(|location| location.index);

        let mut result = RetrievalResult::default();
        for (position, location) in ordered.into_iter().enumerate() {
            sink.event(ProgressEvent::piece(position + 1, total));
            let outcome =
                self.fetcher
                    .fetch(location, sink)
                    .map_err(|err| PkgError::PieceFailed {
                        index: location.index,
                        total,
                        source: Box::new(err),
                    })?;
            match outcome {
                FetchOutcome::AlreadyPresent => result.pieces_skipped += 1,
                FetchOutcome::Fetched { .. } => result.pieces_fetched += 1,
            }
            result.pieces.push(PieceReport {
                index: location.index,
                url: location.url.clone(),
                outcome,
            });
        }
        Ok(result)
    }

    pub fn run_merge(
        &self,
        locations: &[PartLocation],
        delete_sources: bool,
        sink: &dyn ProgressSink,
    ) -> Result<MergeOutcome, PkgError> {
        sink.event(ProgressEvent::message("phase=Merge; merging pieces"));
        merge::merge_pieces(self.store(), locations, delete_sources, sink)
    }

    pub fn download(
        &self,
        title_id: &TitleId,
        entry: &PatchEntry,
        options: DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, PkgError> {
        sink.event(ProgressEvent::message(format!(
            "phase=Resolve; resolving pieces for {} {}",
            title_id, entry.update_version
        )));
        let locations = self.catalog.resolve_pieces(title_id, &entry.key)?;
        info!(title = %title_id, version = %entry.update_version, pieces = locations.len(), "resolved pieces");

        self.store().ensure_output_dir()?;
        let retrieval = self.run_retrieval(&locations, sink)?;
        let merge = if options.merge {
            Some(self.run_merge(&locations, options.delete_pieces, sink)?)
        } else {
            None
        };
        sink.event(ProgressEvent::message("phase=Done; all pieces in place"));

        Ok(DownloadResult {
            title_id: title_id.clone(),
            update_version: entry.update_version.clone(),
            output_dir: self.output_dir().to_path_buf(),
            retrieval,
            merge,
            finished_at: chrono::Utc::now().to_rfc3339(),
        })
    }
}
