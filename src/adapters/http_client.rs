use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use http::{HeaderMap, HeaderValue, header::CONTENT_TYPE};
use reqwest::{
    Client, RequestBuilder,
    multipart::{Form, Part},
};

use crate::{
    core::request::{FormPart, GatewayResponse, RequestBody},
    ports::transport::{OutgoingRequest, Transport, TransportError, TransportResult},
};

/// Transport adapter over `reqwest` (rustls, connection pooling, HTTP/1.1 + h2).
///
/// Responsibilities:
/// * Encodes the request body and sets its content type unless the caller already did.
/// * Buffers the whole response body before returning it.
/// * Classifies failures as timeout, connect, invalid request or other.
///
/// Retries and circuit breaking live in the pipeline, not here.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .wrap_err("Failed to build HTTP client")?;
        tracing::debug!("Created reqwest transport");
        Ok(Self { client })
    }

    /// Use a preconfigured client (proxies, custom roots, ...).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn attach_body(
        builder: RequestBuilder,
        mut headers: HeaderMap,
        body: Option<RequestBody>,
    ) -> TransportResult<RequestBuilder> {
        match body {
            None => Ok(builder.headers(headers)),
            Some(RequestBody::Json(value)) => {
                let data = serde_json::to_vec(&value)
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Ok(builder.headers(headers).body(data))
            }
            Some(RequestBody::Bytes { content_type, data }) => {
                if let Some(content_type) = content_type {
                    if !headers.contains_key(CONTENT_TYPE) {
                        let value = HeaderValue::from_str(&content_type).map_err(|e| {
                            TransportError::InvalidRequest(format!(
                                "Invalid content type {content_type}: {e}"
                            ))
                        })?;
                        headers.insert(CONTENT_TYPE, value);
                    }
                }
                Ok(builder.headers(headers).body(data))
            }
            Some(RequestBody::Multipart(parts)) => {
                // reqwest sets the content type together with the boundary.
                headers.remove(CONTENT_TYPE);
                Ok(builder.headers(headers).multipart(build_form(parts)?))
            }
        }
    }
}

fn build_form(parts: Vec<FormPart>) -> TransportResult<Form> {
    parts.into_iter().try_fold(Form::new(), |form, part| {
        let mut field = Part::bytes(part.data.to_vec());
        if let Some(file_name) = part.file_name {
            field = field.file_name(file_name);
        }
        if let Some(content_type) = part.content_type {
            field = field.mime_str(&content_type).map_err(|e| {
                TransportError::InvalidRequest(format!("Invalid part content type: {e}"))
            })?;
        }
        Ok(form.part(part.name, field))
    })
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::ConnectionError(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutgoingRequest) -> TransportResult<GatewayResponse> {
        let timeout = request.timeout;
        let builder = self
            .client
            .request(request.method.to_http(), request.url.clone())
            .timeout(timeout);
        let builder = Self::attach_body(builder, request.headers, request.body)?;

        tracing::debug!("Sending {} {}", request.method, request.url);

        let response = builder.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        Ok(GatewayResponse {
            status,
            headers,
            body,
        })
    }

    async fn health_check(&self, url: &str, timeout: Duration) -> TransportResult<bool> {
        tracing::debug!("Health checking URL: {}", url);

        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => {
                let is_healthy = response.status().is_success();
                tracing::debug!("Health check for {} result: {}", url, is_healthy);
                Ok(is_healthy)
            }
            Err(err) if err.is_timeout() => Err(TransportError::Timeout(timeout)),
            Err(err) => {
                tracing::debug!("Health check error for {}: {}", url, err);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };
    use url::Url;

    use super::*;
    use crate::{core::request::HttpMethod, ports::transport::TransportErrorKind};

    /// Accept one connection, capture the raw request and answer with `reply`.
    async fn serve_once(reply: &'static str) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });

        (Url::parse(&format!("http://{addr}/")).unwrap(), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let head = text[..header_end].to_ascii_lowercase();
        let body_len = raw.len() - (header_end + 4);

        if let Some(line) = head.lines().find(|l| l.starts_with("content-length:")) {
            let expected: usize = line["content-length:".len()..].trim().parse().unwrap_or(0);
            return body_len >= expected;
        }
        if head.contains("transfer-encoding: chunked") {
            return text.ends_with("0\r\n\r\n");
        }
        true
    }

    fn outgoing(url: Url, method: HttpMethod, body: Option<RequestBody>) -> OutgoingRequest {
        OutgoingRequest {
            method,
            url,
            headers: HeaderMap::new(),
            body,
            timeout: Duration::from_secs(5),
        }
    }

    const OK_JSON: &str =
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 11\r\nconnection: close\r\n\r\n{\"ok\":true}";

    #[tokio::test]
    async fn test_json_body_and_response() {
        let (base, server) = serve_once(OK_JSON).await;
        let transport = ReqwestTransport::new().unwrap();

        let response = transport
            .send(outgoing(
                base.join("flows").unwrap(),
                HttpMethod::Post,
                Some(RequestBody::Json(serde_json::json!({"name": "demo"}))),
            ))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(b"{\"ok\":true}"));

        let raw = server.await.unwrap();
        let lower = raw.to_ascii_lowercase();
        assert!(raw.starts_with("POST /flows HTTP/1.1"));
        assert!(lower.contains("content-type: application/json"));
        assert!(raw.ends_with("{\"name\":\"demo\"}"));
    }

    #[tokio::test]
    async fn test_multipart_replaces_caller_content_type() {
        let (base, server) = serve_once(OK_JSON).await;
        let transport = ReqwestTransport::new().unwrap();

        let mut request = outgoing(
            base.join("files/upload").unwrap(),
            HttpMethod::Post,
            Some(RequestBody::Multipart(vec![
                FormPart::text("folder", "docs"),
                FormPart::file("file", "notes.txt", "text/plain", "hello"),
            ])),
        );
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("multipart/form-data"));

        transport.send(request).await.unwrap();

        let raw = server.await.unwrap();
        let lower = raw.to_ascii_lowercase();
        assert!(lower.contains("content-type: multipart/form-data; boundary="));
        assert!(raw.contains("filename=\"notes.txt\""));
        assert!(raw.contains("hello"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::new().unwrap();
        let url = Url::parse(&format!("http://{addr}/flows")).unwrap();
        let err = transport
            .send(outgoing(url.clone(), HttpMethod::Get, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::Connect);

        assert!(!transport
            .health_check(url.as_str(), Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_health_check_success() {
        let (base, _server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let transport = ReqwestTransport::new().unwrap();
        let url = base.join("health").unwrap();
        assert!(transport
            .health_check(url.as_str(), Duration::from_secs(5))
            .await
            .unwrap());
    }
}
