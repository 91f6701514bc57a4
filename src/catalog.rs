use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::REFERER;
use serde::Deserialize;
use tracing::debug;

use crate::domain::{Catalog, PartLocation, PatchEntry, TitleId};
use crate::error::PkgError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<h3[^>]*\sclass="[^"]*\bh3-title\b[^"]*"[^>]*>(.*?)</h3>"#)
        .expect("title pattern")
});
static CONTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div[^>]*\sclass="[^"]*\bpatch-container\b[^"]*"[^>]*>"#)
        .expect("container pattern")
});
static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<a\b[^>]*>").expect("anchor pattern"));
static CELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<div[^>]*\sclass="col-auto ml-auto py-2"[^>]*>(.*?)</div>"#)
        .expect("cell pattern")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern"));
static CLASS_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| attribute_pattern("class"));
static VERSION_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| attribute_pattern("data-version"));
static KEY_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| attribute_pattern("data-key"));
static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,7});")
        .expect("entity pattern")
});

/// Matches `name="value"` only where a whole attribute starts, so
/// `class` never picks up `data-class`.
fn attribute_pattern(name: &str) -> Regex {
    Regex::new(&format!(r#"\s{}\s*=\s*"([^"]*)""#, regex::escape(name)))
        .expect("attribute pattern")
}

pub trait CatalogClient: Send + Sync {
    fn lookup(&self, title_id: &TitleId) -> Result<Catalog, PkgError>;
    fn resolve_pieces(&self, title_id: &TitleId, key: &str)
    -> Result<Vec<PartLocation>, PkgError>;
}

#[derive(Clone)]
pub struct OrbisPatchesClient {
    client: Client,
    base_url: String,
}

impl OrbisPatchesClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn title_url(&self, title_id: &TitleId) -> String {
        format!("{}/{}", self.base_url, title_id.as_str())
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, PkgError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(PkgError::CatalogStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, PkgError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().timeout(REQUEST_TIMEOUT).send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(status, attempt, "catalog retry");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(error = %err, attempt, "catalog retry");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(PkgError::CatalogHttp(err.to_string()));
                }
            }
        }
    }
}

impl CatalogClient for OrbisPatchesClient {
    fn lookup(&self, title_id: &TitleId) -> Result<Catalog, PkgError> {
        let url = self.title_url(title_id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PkgError::LookupNotFound(title_id.to_string()));
        }
        let html = Self::handle_status(response)?
            .text()
            .map_err(|err| PkgError::CatalogHttp(err.to_string()))?;
        parse_catalog_html(title_id, &html)
    }

    fn resolve_pieces(
        &self,
        title_id: &TitleId,
        key: &str,
    ) -> Result<Vec<PartLocation>, PkgError> {
        let url = format!("{}/api/patch.php", self.base_url);
        let referer = self.title_url(title_id);
        let response = self.send_with_retries(|| {
            self.client
                .post(&url)
                .header("X-Requested-With", "XMLHttpRequest")
                .header(REFERER, referer.as_str())
                .form(&[("key", key)])
        })?;
        let body = Self::handle_status(response)?
            .text()
            .map_err(|err| PkgError::CatalogHttp(err.to_string()))?;
        parse_piece_response(&body)
    }
}

/// Reads the title page into numbered entries, starting at 1 in page order.
pub fn parse_catalog_html(title_id: &TitleId, html: &str) -> Result<Catalog, PkgError> {
    let title = TITLE_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| clean_text(m.as_str()))
        .ok_or_else(|| PkgError::LookupNotFound(title_id.to_string()))?;

    let starts: Vec<usize> = CONTAINER_RE.find_iter(html).map(|m| m.start()).collect();
    let mut entries = BTreeMap::new();
    for (pos, start) in starts.iter().enumerate() {
        let end = starts.get(pos + 1).copied().unwrap_or(html.len());
        let entry = parse_container(&html[*start..end])?;
        entries.insert(pos as u32 + 1, entry);
    }

    Ok(Catalog {
        title_id: title_id.clone(),
        title,
        entries,
    })
}

fn parse_container(block: &str) -> Result<PatchEntry, PkgError> {
    let anchor = ANCHOR_RE
        .find_iter(block)
        .map(|m| m.as_str())
        .find(|tag| {
            attribute(tag, &CLASS_ATTR_RE)
                .map(|class| class.split_whitespace().any(|c| c == "main"))
                .unwrap_or(false)
        })
        .ok_or_else(|| PkgError::BadCatalogResponse("patch entry without link".to_string()))?;

    let update_version = attribute(anchor, &VERSION_ATTR_RE)
        .ok_or_else(|| PkgError::BadCatalogResponse("patch entry without version".to_string()))?;
    let key = attribute(anchor, &KEY_ATTR_RE)
        .ok_or_else(|| PkgError::BadCatalogResponse("patch entry without key".to_string()))?;

    let mut cells = CELL_RE
        .captures_iter(block)
        .filter_map(|caps| caps.get(1).map(|m| clean_text(m.as_str())));
    let size = cells.next().unwrap_or_default();
    let required_firmware = cells.next().unwrap_or_default();

    Ok(PatchEntry {
        update_version,
        size,
        required_firmware,
        key,
    })
}

fn attribute(tag: &str, pattern: &Regex) -> Option<String> {
    pattern
        .captures(tag)
        .and_then(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str()))
}

fn clean_text(raw: &str) -> String {
    let text = TAG_RE.replace_all(raw, "");
    decode_entities(&text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Decodes numeric references and the common named entities in one pass.
/// Unknown names are left as written.
fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures| {
            let body = &caps[1];
            let decoded = match body.strip_prefix('#') {
                Some(num) => match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                }
                .and_then(char::from_u32),
                None => named_entity(body),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "trade" => '\u{2122}',
        "reg" => '\u{00AE}',
        "copy" => '\u{00A9}',
        _ => return None,
    };
    Some(ch)
}

#[derive(Debug, Deserialize)]
struct PatchResponse {
    success: bool,
    #[serde(default)]
    pieces: Vec<PieceUrl>,
}

#[derive(Debug, Deserialize)]
struct PieceUrl {
    pkg_url: String,
}

/// Piece urls in the order the server listed them; that order is the merge
/// order.
pub fn parse_piece_response(body: &str) -> Result<Vec<PartLocation>, PkgError> {
    let response: PatchResponse =
        serde_json::from_str(body).map_err(|err| PkgError::BadCatalogResponse(err.to_string()))?;
    if !response.success {
        return Err(PkgError::BadCatalogResponse(
            "server reported failure".to_string(),
        ));
    }
    if response.pieces.is_empty() {
        return Err(PkgError::NoPieces);
    }
    Ok(PartLocation::from_urls(
        response.pieces.into_iter().map(|piece| piece.pkg_url),
    ))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
