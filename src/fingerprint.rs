use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::TitleId;
use crate::error::PkgError;

pub const PARAM_SFO: &str = "app_param.sfo";

const TITLE_ID_LEN: usize = 9;

/// Reads the title id out of `app_param.sfo`. `path` may be the file itself
/// or the directory holding it.
pub fn extract_title_id(path: &Utf8Path) -> Result<TitleId, PkgError> {
    let sfo_path: Utf8PathBuf = if path.as_std_path().is_dir() {
        path.join(PARAM_SFO)
    } else {
        path.to_path_buf()
    };
    let data = fs::read(sfo_path.as_std_path())
        .map_err(|err| PkgError::Filesystem(format!("read {sfo_path}: {err}")))?;
    title_id_from_bytes(&data).ok_or(PkgError::TitleIdNotFound(sfo_path))
}

pub fn title_id_from_bytes(data: &[u8]) -> Option<TitleId> {
    let pos = data.windows(4).position(|window| window == b"CUSA")?;
    let raw = data.get(pos..pos + TITLE_ID_LEN)?;
    std::str::from_utf8(raw).ok()?.parse().ok()
}
