//! Wire types for the in-guest agent's HTTP endpoints (spec.md §6).

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClipboardContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(rename = "changeCount", skip_serializing_if = "Option::is_none")]
    pub change_count: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SetClipboardRequest {
    pub content: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FileReceiveResponse {
    pub path: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileList {
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UrlList {
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LogLines {
    #[serde(default)]
    pub lines: Vec<String>,
}

/// `/urls` is filtered to `http`/`https` schemes per spec.md §6.
pub fn filter_http_urls(urls: Vec<String>) -> Vec<String> {
    urls.into_iter()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .collect()
}
