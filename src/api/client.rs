use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::{extract_data, parse_content_disposition, ApiRequest, Download};
use crate::error::{ApiError, Result, SyncError};
use crate::store::{Method, QueryParams};

/// Seam between the coordinator and the remote service.
///
/// Implementations return the `data` part of a successful response, or a
/// normalized [`ApiError`].
pub trait Transport: Send + Sync {
  fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<Value, ApiError>>;

  fn download<'a>(
    &'a self,
    endpoint: &'a str,
    query: &'a QueryParams,
  ) -> BoxFuture<'a, Result<Download, ApiError>>;

  fn set_auth_token(&self, token: &str);

  fn clear_auth_token(&self);
}

/// reqwest-backed transport speaking the service's `{data, message}` envelope.
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  token: RwLock<Option<String>>,
}

impl HttpTransport {
  pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ApiError::transport(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url: with_trailing_slash(base_url),
      token: RwLock::new(None),
    })
  }

  /// Resolve `endpoint` against the base URL and append the query.
  pub fn url_for(&self, endpoint: &str, query: &QueryParams) -> Result<Url> {
    let mut url = self
      .base_url
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| SyncError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    if !query.is_empty() {
      url.query_pairs_mut().extend_pairs(query.iter());
    }
    Ok(url)
  }

  fn builder(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self.client.request(to_reqwest(method), url);
    match self.token.read().ok().and_then(|t| t.clone()) {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError> {
    let url = self
      .url_for(&request.endpoint, &request.query)
      .map_err(|e| ApiError::new(e.to_string(), e.status()))?;
    debug!(method = %request.method, %url, "Sending request");

    let mut builder = self.builder(request.method, url);
    if request.method.has_body() {
      builder = builder.json(request.payload.as_ref().unwrap_or(&Value::Null));
    }

    let response = builder.send().await.map_err(normalize_transport)?;
    let response = check_status(response).await?;

    let body = response
      .text()
      .await
      .map_err(|e| ApiError::transport(format!("Failed to read response: {}", e)))?;
    Ok(extract_data(&body))
  }

  async fn fetch_file(&self, endpoint: &str, query: &QueryParams) -> Result<Download, ApiError> {
    let url = self
      .url_for(endpoint, query)
      .map_err(|e| ApiError::new(e.to_string(), e.status()))?;
    debug!(%url, "Downloading file");

    let response = self
      .builder(Method::Get, url)
      .send()
      .await
      .map_err(normalize_transport)?;
    let response = check_status(response).await?;

    let header = |name: reqwest::header::HeaderName| {
      response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
    };
    let content_type = header(CONTENT_TYPE);
    let file_name = header(CONTENT_DISPOSITION).and_then(|v| parse_content_disposition(&v));

    let bytes = response
      .bytes()
      .await
      .map_err(|e| ApiError::transport(format!("Failed to read download: {}", e)))?;

    Ok(Download {
      bytes: bytes.to_vec(),
      file_name,
      content_type,
    })
  }
}

impl Transport for HttpTransport {
  fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<Value, ApiError>> {
    self.execute(request).boxed()
  }

  fn download<'a>(
    &'a self,
    endpoint: &'a str,
    query: &'a QueryParams,
  ) -> BoxFuture<'a, Result<Download, ApiError>> {
    self.fetch_file(endpoint, query).boxed()
  }

  fn set_auth_token(&self, token: &str) {
    if let Ok(mut guard) = self.token.write() {
      *guard = Some(token.to_string());
    }
  }

  fn clear_auth_token(&self) {
    if let Ok(mut guard) = self.token.write() {
      *guard = None;
    }
  }
}

fn to_reqwest(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Delete => reqwest::Method::DELETE,
  }
}

fn with_trailing_slash(mut url: Url) -> Url {
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  url
}

/// No response at all: the status defaults to 500.
fn normalize_transport(err: reqwest::Error) -> ApiError {
  let message = if err.is_timeout() {
    format!("Request timed out: {}", err)
  } else {
    format!("HTTP request failed: {}", err)
  };
  ApiError::transport(message)
}

/// Turn a non-2xx response into an `ApiError` carrying its body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let text = response.text().await.unwrap_or_default();
  let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
  let message = body
    .get("message")
    .and_then(Value::as_str)
    .map(String::from)
    .unwrap_or_else(|| format!("Request failed with status {}", status));

  Err(ApiError::new(message, status.as_u16()).with_body(body))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::{Arc, Mutex};
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// One-shot HTTP server: replies with `response` and hands back the raw request.
  async fn serve_once(response: &'static str) -> (Url, Arc<Mutex<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);

    tokio::spawn(async move {
      if let Ok((mut socket, _)) = listener.accept().await {
        let mut buf = vec![0u8; 8192];
        let n = socket.read(&mut buf).await.unwrap_or(0);
        *sink.lock().unwrap() = String::from_utf8_lossy(&buf[..n]).to_string();
        let _ = socket.write_all(response.as_bytes()).await;
      }
    });

    (Url::parse(&format!("http://{}/api", addr)).unwrap(), seen)
  }

  fn transport(base: Url) -> HttpTransport {
    HttpTransport::new(base, Duration::from_secs(5)).unwrap()
  }

  #[test]
  fn test_url_for_joins_and_sorts_query() {
    let t = transport(Url::parse("https://example.com/api").unwrap());
    let mut query = QueryParams::new();
    query.insert("page".into(), "2".into());
    query.insert("class".into(), "7b".into());

    let url = t.url_for("/students", &query).unwrap();
    assert_eq!(url.as_str(), "https://example.com/api/students?class=7b&page=2");
  }

  #[tokio::test]
  async fn test_send_unwraps_envelope_and_sends_bearer() {
    let (base, seen) = serve_once(
      "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 37\r\nConnection: close\r\n\r\n{\"data\":{\"id\":1},\"message\":\"Success\"}",
    )
    .await;
    let t = transport(base);
    t.set_auth_token("secret");

    let request = ApiRequest::new(Method::Post, "/students").with_payload(Some(json!({"n": 1})));
    let data = t.send(&request).await.unwrap();

    assert_eq!(data, json!({"id": 1}));
    let raw = seen.lock().unwrap().clone();
    assert!(raw.starts_with("POST /api/students"));
    assert!(raw.to_lowercase().contains("authorization: bearer secret"));
  }

  #[tokio::test]
  async fn test_error_response_is_normalized() {
    let (base, _) = serve_once(
      "HTTP/1.1 422 Unprocessable Entity\r\nContent-Type: application/json\r\nContent-Length: 22\r\nConnection: close\r\n\r\n{\"message\":\"invalid\"}\n",
    )
    .await;
    let t = transport(base);

    let err = t
      .send(&ApiRequest::new(Method::Put, "/students/1"))
      .await
      .unwrap_err();
    assert_eq!(err.status, 422);
    assert_eq!(err.message, "invalid");
    assert_eq!(err.body, Some(json!({"message": "invalid"})));
  }

  #[tokio::test]
  async fn test_connection_failure_defaults_to_500() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let t = transport(Url::parse(&format!("http://{}/", addr)).unwrap());
    let err = t
      .send(&ApiRequest::new(Method::Get, "/anything"))
      .await
      .unwrap_err();
    assert_eq!(err.status, 500);
  }

  #[tokio::test]
  async fn test_download_reads_file_name() {
    let (base, _) = serve_once(
      "HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Disposition: attachment; filename=\"grades.csv\"\r\nContent-Length: 4\r\nConnection: close\r\n\r\na,b\n",
    )
    .await;
    let t = transport(base);

    let file = t.download("/reports/grades", &QueryParams::new()).await.unwrap();
    assert_eq!(file.bytes, b"a,b\n");
    assert_eq!(file.file_name.as_deref(), Some("grades.csv"));
    assert_eq!(file.content_type.as_deref(), Some("text/csv"));
  }
}
