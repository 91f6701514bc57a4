use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::PkgError;

// The catalog site rejects obvious non-browser agents.
const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/75.0.3770.100 Safari/537.36";

/// Builds the one client shared by the catalog lookup and piece transfers.
/// No overall timeout: a piece can take as long as the transport allows.
pub fn build_client() -> Result<Client, PkgError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_AGENT));
    Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(30))
        .timeout(None)
        .build()
        .map_err(|err| PkgError::CatalogHttp(err.to_string()))
}
