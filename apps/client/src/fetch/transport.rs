//! Transport seam between the retry/cancel logic and the actual HTTP stack.
//!
//! Requests and responses are plain owned data so a scripted transport can
//! stand in for the network in tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};

use crate::errors::TransportError;
use crate::upload::{FileBlob, ProgressSink};

/// Upload bodies are fed to the HTTP stack in chunks of this size.
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    /// Already-encoded JSON document.
    Json(Bytes),
    /// A single-field multipart form. The transport picks the boundary.
    Multipart { field: String, file: FileBlob },
}

/// One fully-resolved attempt: absolute URL, final headers, encoded body.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub payload: Payload,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Executes one HTTP round-trip. Non-2xx statuses are data, not errors;
/// only connection-level failures and unbuildable requests return `Err`.
///
/// Dropping the returned future must abandon the request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: PreparedRequest,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<RawResponse, TransportError>;
}

/// `reqwest`-backed transport used outside of tests.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: PreparedRequest,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<RawResponse, TransportError> {
        let mut builder = self.client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.payload {
            Payload::Empty => builder,
            Payload::Json(body) => builder.body(body),
            Payload::Multipart { field, file } => {
                builder.multipart(multipart_form(field, file, progress)?)
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn multipart_form(
    field: String,
    file: FileBlob,
    progress: Option<Arc<dyn ProgressSink>>,
) -> Result<Form, TransportError> {
    let length = file.len() as u64;
    let part = Part::stream_with_length(progress_body(file.bytes.clone(), progress), length)
        .file_name(file.name.clone())
        .mime_str(&file.content_type)
        .map_err(|e| {
            TransportError::Rejected(format!("invalid content type {:?}: {e}", file.content_type))
        })?;
    Ok(Form::new().part(field, part))
}

/// Wraps the file in a chunked stream that reports cumulative progress as
/// the HTTP stack pulls each chunk.
fn progress_body(bytes: Bytes, progress: Option<Arc<dyn ProgressSink>>) -> reqwest::Body {
    let Some(sink) = progress else {
        return reqwest::Body::from(bytes);
    };

    let total = bytes.len();
    if total == 0 {
        sink.on_progress(1.0);
        return reqwest::Body::from(bytes);
    }

    let chunks: Vec<Bytes> = (0..total)
        .step_by(UPLOAD_CHUNK_BYTES)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_BYTES).min(total)))
        .collect();

    let mut sent = 0usize;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len();
        sink.on_progress(sent as f64 / total as f64);
        Ok::<Bytes, std::io::Error>(chunk)
    });

    reqwest::Body::wrap_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = RawResponse::new(200, "application/json; charset=utf-8", "{}");
        assert_eq!(
            response.header("Content-Type"),
            Some("application/json; charset=utf-8")
        );
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_method_names() {
        let names: Vec<String> = [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
        ]
        .iter()
        .map(|m| m.to_string())
        .collect();
        assert_eq!(names, vec!["GET", "POST", "PUT", "PATCH", "DELETE"]);
        assert_eq!(reqwest::Method::from(Method::Patch), reqwest::Method::PATCH);
    }

    fn request_with(headers: Vec<(String, String)>, payload: Payload) -> PreparedRequest {
        PreparedRequest {
            method: Method::Post,
            // Nothing listens here; rejected requests must fail before connecting.
            url: "http://127.0.0.1:9/cv/upload".to_string(),
            headers,
            payload,
        }
    }

    #[tokio::test]
    async fn test_invalid_header_is_rejected_not_a_connection_error() {
        let request = request_with(
            vec![("bad header".to_string(), "v".to_string())],
            Payload::Empty,
        );
        let err = ReqwestTransport::new().send(request, None).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_invalid_file_content_type_is_rejected() {
        let mut file = FileBlob::new("resume.pdf", b"%PDF".to_vec());
        file.content_type = "not a mime type".to_string();
        let request = request_with(
            Vec::new(),
            Payload::Multipart {
                field: "cv".to_string(),
                file,
            },
        );
        let err = ReqwestTransport::new().send(request, None).await.unwrap_err();
        match err {
            TransportError::Rejected(msg) => assert!(msg.contains("not a mime type")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_file_reports_single_completion() {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = {
            let events = events.clone();
            move |fraction: f64| events.lock().unwrap().push(fraction)
        };
        let _body = progress_body(Bytes::new(), Some(Arc::new(sink)));
        assert_eq!(*events.lock().unwrap(), vec![1.0]);
    }
}
