use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ps4_pkg_fetch::error::PkgError;
use ps4_pkg_fetch::fingerprint::{PARAM_SFO, extract_title_id, title_id_from_bytes};

fn sfo_bytes(title: &[u8]) -> Vec<u8> {
    let mut data = b"\0PSF\x01\x01\0\0CATEGORY\0gd\0\0".to_vec();
    data.extend_from_slice(title);
    data.extend_from_slice(b"\0\0TITLE\0Some Game\0");
    data
}

#[test]
fn reads_title_id_from_game_directory() {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    fs::write(dir.join(PARAM_SFO).as_std_path(), sfo_bytes(b"CUSA07010")).unwrap();

    let from_dir = extract_title_id(&dir).unwrap();
    let from_file = extract_title_id(&dir.join(PARAM_SFO)).unwrap();
    assert_eq!(from_dir.as_str(), "CUSA07010");
    assert_eq!(from_dir, from_file);
}

#[test]
fn sfo_without_title_id_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    fs::write(dir.join(PARAM_SFO).as_std_path(), sfo_bytes(b"NPXS20001")).unwrap();

    assert_matches!(extract_title_id(&dir), Err(PkgError::TitleIdNotFound(_)));
}

#[test]
fn missing_sfo_is_a_filesystem_error() {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    assert_matches!(extract_title_id(&dir), Err(PkgError::Filesystem(_)));
}

#[test]
fn truncated_marker_is_ignored() {
    assert!(title_id_from_bytes(b"....CUSA01").is_none());
}
