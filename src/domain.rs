use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PkgError;

static TITLE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^cusa-?\d{5}$").expect("title id pattern"));

/// A PS4 title id in its canonical `CUSAnnnnn` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TitleId(String);

impl TitleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TitleId {
    type Err = PkgError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !TITLE_ID_PATTERN.is_match(trimmed) {
            return Err(PkgError::InvalidTitleId(value.to_string()));
        }
        Ok(Self(trimmed.replace('-', "").to_uppercase()))
    }
}

/// One part of a package as listed by the catalog. `index` is the position
/// the catalog returned it in and decides merge order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartLocation {
    pub index: usize,
    pub url: String,
}

impl PartLocation {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
        }
    }

    pub fn from_urls<I, S>(urls: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(index, url)| Self::new(index, url))
            .collect()
    }

    /// Last path segment of the url, without query or fragment.
    pub fn base_name(&self) -> Option<&str> {
        let path = self
            .url
            .split(['?', '#'])
            .next()
            .unwrap_or(self.url.as_str());
        let name = path.rsplit('/').next()?;
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }
        Some(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEntry {
    pub update_version: String,
    pub size: String,
    pub required_firmware: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub title_id: TitleId,
    pub title: String,
    pub entries: BTreeMap<u32, PatchEntry>,
}

impl Catalog {
    pub fn entry(&self, id: u32) -> Result<&PatchEntry, PkgError> {
        self.entries.get(&id).ok_or(PkgError::InvalidChoice(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    AlreadyPresent,
    Fetched { bytes: u64 },
}
