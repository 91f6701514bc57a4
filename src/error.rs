use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PkgError {
    #[error("invalid title id: {0}")]
    #[diagnostic(help("expected something like CUSA12345 or cusa-12345"))]
    InvalidTitleId(String),

    #[error("no title id found in {0}")]
    TitleIdNotFound(Utf8PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("couldn't find any updates for {0}")]
    LookupNotFound(String),

    #[error("bad catalog response: {0}")]
    BadCatalogResponse(String),

    #[error("no catalog entry with id {0}")]
    InvalidChoice(u32),

    #[error("part url has no usable file name: {0}")]
    InvalidPartUrl(String),

    #[error("transfer of {url} failed: {message}")]
    Transfer { url: String, message: String },

    #[error("transfer of {url} returned status {status}")]
    TransferStatus { url: String, status: u16 },

    #[error("transfer of {url} ended after {received} of {expected} bytes")]
    ShortRead {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("piece {index} of {total} failed")]
    PieceFailed {
        index: usize,
        total: usize,
        #[source]
        source: Box<PkgError>,
    },

    #[error("staging file missing: {0}")]
    StagingMissing(Utf8PathBuf),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("no pieces to process")]
    NoPieces,

    #[error("piece {index} missing at {path}")]
    MergeMissingPiece { index: usize, path: Utf8PathBuf },

    #[error("piece indices are not contiguous: {0}")]
    MergeOrder(String),

    #[error("merging piece {index} from {path} failed: {message}")]
    MergeWrite {
        index: usize,
        path: Utf8PathBuf,
        message: String,
    },

    #[error("cancelled by user")]
    UserCancelled,
}
