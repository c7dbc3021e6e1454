//! Host-side client for the in-guest agent's HTTP surface. Does not
//! implement the agent's own server side.

pub mod client;
pub mod error;
pub mod types;

pub use client::{GhostAgentClient, DEFAULT_AGENT_PORT};
pub use error::{GhostClientError, Result};
pub use types::{ClipboardContent, FileList, LogLines, UrlList};

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Arc;

    /// A minimal fixture standing in for the agent's HTTP server, enough to
    /// exercise every client method this crate ships.
    fn spawn_fixture() -> (Arc<tiny_http::Server>, u16) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = match server.server_addr() {
            tiny_http::ListenAddr::IP(addr) => addr.port(),
            _ => unreachable!("http fixture always binds an IP address"),
        };
        (Arc::new(server), port)
    }

    fn serve_one(server: Arc<tiny_http::Server>, body: &'static str, status: u16) {
        std::thread::spawn(move || {
            if let Ok(mut request) = server.recv() {
                let mut buf = String::new();
                let _ = request.as_reader().read_to_string(&mut buf);
                let response = tiny_http::Response::from_string(body)
                    .with_status_code(tiny_http::StatusCode(status))
                    .with_header(
                        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                            .unwrap(),
                    );
                let _ = request.respond(response);
            }
        });
    }

    #[test]
    fn get_clipboard_decodes_json_body() {
        let (server, port) = spawn_fixture();
        serve_one(server, r#"{"content":"hello","type":"text"}"#, 200);

        let client = GhostAgentClient::new("127.0.0.1", port).unwrap();
        let clipboard = client.get_clipboard().unwrap();
        assert_eq!(clipboard.content.as_deref(), Some("hello"));
    }

    #[test]
    fn non_success_status_becomes_status_error() {
        let (server, port) = spawn_fixture();
        serve_one(server, "", 500);

        let client = GhostAgentClient::new("127.0.0.1", port).unwrap();
        let err = client.get_clipboard().unwrap_err();
        assert!(matches!(err, GhostClientError::Status(500)));
    }

    #[test]
    fn list_urls_filters_non_http_schemes() {
        let (server, port) = spawn_fixture();
        serve_one(
            server,
            r#"{"urls":["https://example.com","mailto:a@b.com","http://foo.test"]}"#,
            200,
        );

        let client = GhostAgentClient::new("127.0.0.1", port).unwrap();
        let urls = client.list_urls().unwrap();
        assert_eq!(urls, vec!["https://example.com", "http://foo.test"]);
    }

    #[test]
    fn send_file_rejects_path_traversal_locally() {
        let client = GhostAgentClient::new("127.0.0.1", 1).unwrap();
        let err = client.send_file("../escape", vec![]).unwrap_err();
        assert!(matches!(err, GhostClientError::Encode(_)));
    }
}
