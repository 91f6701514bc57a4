use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ps4_pkg_fetch::config::{Config, ConfigLoader, ConfigOverrides, DEFAULT_CATALOG_URL};
use ps4_pkg_fetch::error::PkgError;

#[test]
fn file_values_apply_over_defaults() {
    let config: Config = serde_json::from_str(
        r#"{ "output_dir": "downloads", "merge": false, "delete_pieces": true,
             "catalog_url": "https://mirror.example/" }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config, &ConfigOverrides::default());
    assert_eq!(resolved.output_dir, Utf8PathBuf::from("downloads"));
    assert!(!resolved.merge);
    assert!(resolved.delete_pieces);
    assert_eq!(resolved.catalog_url, "https://mirror.example");
}

#[test]
fn flags_override_file_values() {
    let config: Config =
        serde_json::from_str(r#"{ "output_dir": "downloads", "merge": true }"#).unwrap();
    let overrides = ConfigOverrides {
        output_dir: Some(Utf8PathBuf::from("elsewhere")),
        merge: Some(false),
        delete_pieces: Some(true),
    };

    let resolved = ConfigLoader::resolve_config(config, &overrides);
    assert_eq!(resolved.output_dir, Utf8PathBuf::from("elsewhere"));
    assert!(!resolved.merge);
    assert!(resolved.delete_pieces);
    assert_eq!(resolved.catalog_url, DEFAULT_CATALOG_URL);
}

#[test]
fn blank_output_dir_falls_back_to_cwd() {
    let config: Config = serde_json::from_str(r#"{ "output_dir": "  " }"#).unwrap();
    let resolved = ConfigLoader::resolve_config(config, &ConfigOverrides::default());
    assert_eq!(resolved.output_dir, Utf8PathBuf::from("."));
}

#[test]
fn explicit_config_path_is_read() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    fs::write(&path, r#"{ "delete_pieces": true }"#).unwrap();

    let resolved =
        ConfigLoader::resolve(Some(path.to_str().unwrap()), &ConfigOverrides::default()).unwrap();
    assert!(resolved.delete_pieces);
    assert!(resolved.merge);
}

#[test]
fn missing_explicit_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap()), &ConfigOverrides::default())
        .unwrap_err();
    assert_matches!(err, PkgError::ConfigRead(_));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    fs::write(&path, "{ merge: yes }").unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap()), &ConfigOverrides::default())
        .unwrap_err();
    assert_matches!(err, PkgError::ConfigParse(_));
}
