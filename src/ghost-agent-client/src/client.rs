//! Host-side HTTP client for the in-guest agent (spec.md §6).
//!
//! The controller's call sites are synchronous, so this follows the
//! teacher's own `reqwest::blocking::Client` shape rather than an async
//! client — there's no executor running on the coordination domain to
//! drive one.

use std::time::Duration;

use crate::error::{GhostClientError, Result};
use crate::types::{
    filter_http_urls, ClipboardContent, FileList, FileReceiveResponse, LogLines,
    SetClipboardRequest, UrlList,
};

pub const DEFAULT_AGENT_PORT: u16 = 5000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const LOG_RING_CAPACITY: usize = 500;

pub struct GhostAgentClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl GhostAgentClient {
    /// `host` is the guest's virtio-socket-facing address; in production
    /// this is the guest's well-known loopback-equivalent endpoint, in
    /// tests it's `127.0.0.1` against the fixture server.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(GhostClientError::from)?;
        Ok(Self {
            client,
            base_url: format!("http://{host}:{port}"),
        })
    }

    pub fn with_default_port(host: &str) -> Result<Self> {
        Self::new(host, DEFAULT_AGENT_PORT)
    }

    pub fn get_clipboard(&self) -> Result<ClipboardContent> {
        let response = self.client.get(format!("{}/clipboard", self.base_url)).send()?;
        Self::check_status(&response)?;
        response.json::<ClipboardContent>().map_err(GhostClientError::from)
    }

    pub fn set_clipboard(&self, content: String, content_type: String) -> Result<()> {
        let body = SetClipboardRequest { content, content_type };
        let response = self
            .client
            .post(format!("{}/clipboard", self.base_url))
            .json(&body)
            .send()?;
        Self::check_status(&response)?;
        Ok(())
    }

    /// `file_name` is sanitized before being sent: empty, or containing
    /// `..`, `/`, or `\`, is rejected on the host side as well as the
    /// guest's (spec.md §6).
    pub fn send_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) || file_name.contains("..") {
            return Err(GhostClientError::Encode(format!("invalid file name: {file_name}")));
        }
        let response = self
            .client
            .post(format!("{}/files/receive", self.base_url))
            .header("X-Ghost-File-Name", file_name)
            .body(bytes)
            .send()?;
        Self::check_status(&response)?;
        let decoded = response
            .json::<FileReceiveResponse>()
            .map_err(GhostClientError::from)?;
        Ok(decoded.path)
    }

    pub fn list_outgoing_files(&self) -> Result<Vec<String>> {
        let response = self.client.get(format!("{}/files", self.base_url)).send()?;
        Self::check_status(&response)?;
        Ok(response.json::<FileList>().map_err(GhostClientError::from)?.paths)
    }

    /// Pending URLs, filtered to `http`/`https` schemes.
    pub fn list_urls(&self) -> Result<Vec<String>> {
        let response = self.client.get(format!("{}/urls", self.base_url)).send()?;
        Self::check_status(&response)?;
        let urls = response.json::<UrlList>().map_err(GhostClientError::from)?.urls;
        Ok(filter_http_urls(urls))
    }

    /// Buffered log lines, bounded to the agent's 500-line ring.
    pub fn logs(&self) -> Result<Vec<String>> {
        let response = self.client.get(format!("{}/logs", self.base_url)).send()?;
        Self::check_status(&response)?;
        let mut lines = response.json::<LogLines>().map_err(GhostClientError::from)?.lines;
        if lines.len() > LOG_RING_CAPACITY {
            lines = lines.split_off(lines.len() - LOG_RING_CAPACITY);
        }
        Ok(lines)
    }

    fn check_status(response: &reqwest::blocking::Response) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(GhostClientError::Status(response.status().as_u16()))
        }
    }
}
