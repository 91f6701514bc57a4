use assert_matches::assert_matches;

use ps4_pkg_fetch::catalog::{parse_catalog_html, parse_piece_response};
use ps4_pkg_fetch::domain::TitleId;
use ps4_pkg_fetch::error::PkgError;

const TITLE_PAGE: &str = r#"
<html><body>
  <div class="container">
    <h3 class="h3-title text-white">Gravity Rush&trade; 2 &amp; Friends</h3>
    <div class="patch-container latest">
      <a class="patch-link main" href="javascript:void(0)" data-version="01.09" data-key="a1b2c3">
        <span>Version 01.09</span>
      </a>
      <div class="col-auto ml-auto py-2">  1.2 GB </div>
      <div class="col-auto ml-auto py-2"><b>5.05</b></div>
    </div>
    <div class="patch-container">
      <a class="other" data-version="nope" data-key="nope"></a>
      <a class="main" data-version="01.00" data-key="ffee">Version 01.00</a>
      <div class="col-auto ml-auto py-2">800 MB</div>
      <div class="col-auto ml-auto py-2">4.50</div>
    </div>
  </div>
</body></html>
"#;

fn title() -> TitleId {
    "CUSA04943".parse().unwrap()
}

#[test]
fn title_page_entries_are_numbered_from_one() {
    let catalog = parse_catalog_html(&title(), TITLE_PAGE).unwrap();

    assert_eq!(catalog.title, "Gravity Rush\u{2122} 2 & Friends");
    assert_eq!(catalog.entries.len(), 2);

    let latest = catalog.entry(1).unwrap();
    assert_eq!(latest.update_version, "01.09");
    assert_eq!(latest.key, "a1b2c3");
    assert_eq!(latest.size, "1.2 GB");
    assert_eq!(latest.required_firmware, "5.05");

    let first = catalog.entry(2).unwrap();
    assert_eq!(first.update_version, "01.00");
    assert_eq!(first.key, "ffee");
    assert_eq!(first.required_firmware, "4.50");
}

#[test]
fn data_class_does_not_count_as_class() {
    let page = r#"
      <h3 class="h3-title">Decoy</h3>
      <div class="patch-container">
        <a data-class="main" class="other" data-version="9.99" data-key="bad"></a>
        <a class="main" data-version="01.01" data-key="good"></a>
      </div>
      <div class="patch-container">
        <a data-class="x" class="btn main" data-version="01.00" data-key="second"></a>
      </div>
    "#;

    let catalog = parse_catalog_html(&title(), page).unwrap();
    assert_eq!(catalog.entry(1).unwrap().key, "good");
    assert_eq!(catalog.entry(1).unwrap().update_version, "01.01");
    assert_eq!(catalog.entry(2).unwrap().key, "second");
}

#[test]
fn numeric_and_named_entities_are_decoded() {
    let page = r#"<h3 class="h3-title">Marvel&#039;s Spider-Man&#8482; &#x26; Co &bogus;</h3>"#;
    let catalog = parse_catalog_html(&title(), page).unwrap();
    assert_eq!(catalog.title, "Marvel's Spider-Man\u{2122} & Co &bogus;");
    assert!(catalog.entries.is_empty());
}

#[test]
fn unknown_entry_id_is_invalid_choice() {
    let catalog = parse_catalog_html(&title(), TITLE_PAGE).unwrap();
    assert_matches!(catalog.entry(0), Err(PkgError::InvalidChoice(0)));
    assert_matches!(catalog.entry(3), Err(PkgError::InvalidChoice(3)));
}

#[test]
fn page_without_title_is_not_found() {
    let err = parse_catalog_html(&title(), "<html><body>Not found</body></html>").unwrap_err();
    assert_matches!(err, PkgError::LookupNotFound(id) => assert_eq!(id, "CUSA04943"));
}

#[test]
fn piece_response_keeps_server_order() {
    let body = r#"{
        "success": true,
        "pieces": [
            { "pkg_url": "http://gs2.ww.prod.dl.playstation.net/x/UP9000_2.pkg" },
            { "pkg_url": "http://gs2.ww.prod.dl.playstation.net/x/UP9000_0.pkg" },
            { "pkg_url": "http://gs2.ww.prod.dl.playstation.net/x/UP9000_1.pkg" }
        ]
    }"#;

    let locations = parse_piece_response(body).unwrap();
    let names: Vec<(usize, &str)> = locations
        .iter()
        .map(|loc| (loc.index, loc.base_name().unwrap()))
        .collect();
    assert_eq!(
        names,
        vec![(0, "UP9000_2.pkg"), (1, "UP9000_0.pkg"), (2, "UP9000_1.pkg")]
    );
}

#[test]
fn piece_response_failures() {
    assert_matches!(
        parse_piece_response(r#"{ "success": false }"#),
        Err(PkgError::BadCatalogResponse(_))
    );
    assert_matches!(
        parse_piece_response(r#"{ "success": true, "pieces": [] }"#),
        Err(PkgError::NoPieces)
    );
    assert_matches!(
        parse_piece_response("<html>rate limited</html>"),
        Err(PkgError::BadCatalogResponse(_))
    );
}
