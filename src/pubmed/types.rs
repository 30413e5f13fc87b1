use serde::Deserialize;
use std::time::Duration;

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const TOOL_NAME: &str = "medlit";

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_FETCH_ATTEMPTS: u32 = 3;
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Body of an `esearch.fcgi?retmode=json` response.
#[derive(Debug, Deserialize)]
pub struct ESearchResponse {
    pub esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
pub struct ESearchResult {
    #[serde(default)]
    pub count: Option<String>,
    #[serde(default)]
    pub idlist: Vec<String>,
    #[serde(default, rename = "ERROR")]
    pub error: Option<String>,
}
