//! Request and response value types passed through the pipeline.
use std::{fmt, str::FromStr};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header::IntoHeaderName};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use crate::core::error::GatewayError;

/// HTTP methods the gateway forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn to_http(self) -> http::Method {
        match self {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(GatewayError::InvalidRequest(format!(
                "Unsupported method: {other}"
            ))),
        }
    }
}

/// One field of a multipart form body.
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub data: Bytes,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl FormPart {
    /// A plain text form field
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Bytes::from(value.into()),
            file_name: None,
            content_type: None,
        }
    }

    /// A file field
    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
        }
    }
}

/// Request payload. Kept cloneable so that retries can resend it.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Bytes {
        content_type: Option<String>,
        data: Bytes,
    },
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Serialize any value into a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, GatewayError> {
        serde_json::to_value(value)
            .map(RequestBody::Json)
            .map_err(|e| GatewayError::InvalidRequest(format!("Body is not valid JSON: {e}")))
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Json(value)
    }
}

/// Per-request options. Only headers can be overridden; method, endpoint and body
/// are positional.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A logical request as issued by a caller.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: HttpMethod,
    /// Path relative to the configured base URL, e.g. `/api/v1/flows`.
    pub endpoint: String,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl GatewayRequest {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Option<RequestBody>) -> Self {
        self.body = body;
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.headers.extend(options.headers);
        self
    }
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Whether this response counts as a successful attempt (status in `[200, 399)`).
    pub fn is_success(&self) -> bool {
        is_success_status(self.status.as_u16())
    }

    /// Deserialize the body as JSON. An empty body is treated as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        let parsed = if self.body.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_value(serde_json::Value::Null)
        } else {
            serde_json::from_slice(&self.body)
        };
        parsed.map_err(|source| GatewayError::Decode {
            source,
            body: self.body.clone(),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub fn is_success_status(status: u16) -> bool {
    (200..399).contains(&status)
}

/// Resolve a relative endpoint against the base URL with exactly one `/` between them.
pub fn join_endpoint(base_url: &str, endpoint: &str) -> Result<Url, GatewayError> {
    let path = endpoint
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    if path.contains("://") {
        return Err(GatewayError::InvalidRequest(format!(
            "Endpoint must be a relative path: {endpoint}"
        )));
    }

    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid URL {joined}: {e}")))
}
