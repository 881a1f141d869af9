//! The REST call dispatcher and its GET/HEAD/POST/PUT wrappers.

pub mod status;

use bytes::Bytes;
use log::{debug, info};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::config::ClientConfig;
use crate::error::{CallError, Cause, ErrorKind, FailedResponse};
use crate::naming::{expand_name_template, url_from_filename};
use crate::session::SessionProvider;

/// Number of body bytes included in failure diagnostics.
const BODY_PREVIEW_LEN: usize = 100;

/// Transport-level arguments of a single call.
#[derive(Debug, Default)]
pub struct CallOptions {
    pub headers: HeaderMap,
    pub query: Option<Vec<(String, String)>>,
    pub body: Option<Bytes>,
    pub form: Option<Form>,
}

impl CallOptions {
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            ..Default::default()
        }
    }

    pub fn query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Multipart bodies are streamed and are never replayed by the retry adapter.
    pub fn multipart(mut self, form: Form) -> Self {
        self.form = Some(form);
        self
    }
}

/// Reference to a file being uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFile {
    pub name: String,
}

impl UserFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for UserFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Issues REST calls through sessions obtained from a [`SessionProvider`].
pub struct RestClient<P: SessionProvider> {
    provider: P,
    config: ClientConfig,
}

impl<P: SessionProvider> RestClient<P> {
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, ClientConfig::default())
    }

    pub fn with_config(provider: P, config: ClientConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Performs exactly one HTTP request and maps its outcome.
    ///
    /// Returns the response for 200 and 202. Any other status becomes a
    /// [`CallError`] whose kind is given by [`status::classify`]; status
    /// failures are never retried.
    #[tracing::instrument(skip(self, options))]
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        options: CallOptions,
    ) -> Result<Response, CallError> {
        let mut session = self.provider.get_session().await.map_err(|e| {
            CallError::new(
                ErrorKind::Transport,
                format!("Failed to open a session: {:#}", e),
            )
            .with_cause(Cause::Session(e.into()))
        })?;
        session.mount("https://", self.config.retry_adapter());

        info!("About to make REST call: {} {}", method, url);
        debug!(
            "REST call headers: {:?}, query: {:?}",
            options.headers, options.query
        );
        debug!(
            "Opened session with max retries: {}",
            self.config.max_retries
        );

        let mut builder = session
            .client()
            .request(method, url)
            .headers(options.headers);
        if let Some(query) = &options.query {
            builder = builder.query(query);
        }
        if let Some(body) = options.body {
            builder = builder.body(body);
        }
        if let Some(form) = options.form {
            builder = builder.multipart(form);
        }
        let request = builder.build().map_err(CallError::transport)?;
        let request_headers = request.headers().clone();

        let response = session.send(request).await.map_err(CallError::transport)?;

        debug!(
            "Request response received, status: {}, headers: {:?}, request headers: {:?}",
            response.status(),
            response.headers(),
            request_headers
        );

        check_status(response).await
    }

    /// GET `url` and decode the JSON body.
    #[tracing::instrument(skip(self, headers))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &HeaderMap,
        params: Option<&[(&str, &str)]>,
    ) -> Result<T, CallError> {
        debug!(
            "Get call url: {}, headers: {:?}, params: {:?}",
            url, headers, params
        );

        let mut options = CallOptions::new(headers.clone());
        if let Some(params) = params {
            options = options.query(
                params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }

        let response = self.call(Method::GET, url, options).await?;
        let body = response.bytes().await.map_err(CallError::transport)?;

        serde_json::from_slice(&body).map_err(|e| {
            CallError::new(
                ErrorKind::DecodeFailure,
                "No json object to be decoded from GET call.",
            )
            .with_cause(e)
        })
    }

    /// HEAD a file URL and return its `content-length`.
    ///
    /// `url` is a template containing `{name}`, filled with the escaped
    /// `filename` (empty when absent).
    #[tracing::instrument(skip(self, headers))]
    pub async fn head(
        &self,
        url: &str,
        headers: &HeaderMap,
        filename: Option<&str>,
    ) -> Result<u64, CallError> {
        let url = expand_name_template(url, &url_from_filename(filename.unwrap_or_default()))?;
        debug!("Head call url: {}, headers: {:?}", url, headers);

        let response = self
            .call(Method::HEAD, &url, CallOptions::new(headers.clone()))
            .await?;
        content_length(response.headers())
    }

    /// POST an optional JSON message and decode the JSON reply.
    #[tracing::instrument(skip(self, headers, message))]
    pub async fn post<M, T>(
        &self,
        url: &str,
        headers: &HeaderMap,
        message: Option<&M>,
    ) -> Result<T, CallError>
    where
        M: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let message = message
            .map(|m| {
                serde_json::to_value(m).map_err(|e| {
                    CallError::new(
                        ErrorKind::DecodeFailure,
                        "Message could not be encoded as json for POST call.",
                    )
                    .with_cause(e)
                })
            })
            .transpose()?
            .filter(|m| !is_empty_message(m));

        let mut options = CallOptions::new(headers.clone());
        if let Some(message) = message {
            let encoded = message.to_string();
            debug!(
                "Post call url: {}, headers: {:?}, message: {}",
                url, headers, encoded
            );
            options = options.body(encoded);
        } else {
            debug!("Post call url: {}, headers: {:?}, no message", url, headers);
        }

        let response = self.call(Method::POST, url, options).await?;
        let text = response.text().await.map_err(|e| {
            CallError::new(ErrorKind::DecodeFailure, "Response object has no text body.")
                .with_cause(e)
        })?;

        serde_json::from_str(&text).map_err(|e| {
            CallError::new(
                ErrorKind::DecodeFailure,
                "No json object to be decoded from POST call.",
            )
            .with_cause(e)
        })
    }

    /// Upload file data with a multipart PUT and return the raw response.
    ///
    /// `url` is a `{name}` template filled with the escaped name of
    /// `userfile`. The caller's `Content-Type` header is dropped so the
    /// multipart boundary header is used. `description` entries become text
    /// fields; each reader in `file_data` is streamed as a file part.
    #[tracing::instrument(skip(self, headers, description, file_data))]
    pub async fn put<R>(
        &self,
        url: &str,
        headers: &HeaderMap,
        userfile: &UserFile,
        description: &BTreeMap<String, String>,
        file_data: Vec<(String, R)>,
    ) -> Result<Response, CallError>
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        let url = expand_name_template(url, &url_from_filename(&userfile.name))?;

        let mut put_headers = headers.clone();
        put_headers.remove(CONTENT_TYPE);

        info!("url={}, headers={:?}", url, put_headers);
        debug!(
            "Put call url: {}, headers: {:?}, file: {}, description: {:?}",
            url, put_headers, userfile, description
        );

        let mut form = Form::new();
        for (field, value) in description {
            form = form.text(field.clone(), value.clone());
        }
        for (field, reader) in file_data {
            let part = Part::stream(Body::wrap_stream(ReaderStream::new(reader)))
                .file_name(userfile.name.clone());
            form = form.part(field, part);
        }

        self.call(Method::PUT, &url, CallOptions::new(put_headers).multipart(form))
            .await
    }
}

async fn check_status(response: Response) -> Result<Response, CallError> {
    let Some(kind) = status::classify(response.status()) else {
        info!("Successful REST call with status: {}", response.status());
        return Ok(response);
    };

    let failed = FailedResponse::capture(response).await;
    debug!(
        "REST call failed, status: {}, url: {}, content: {:?}",
        failed.status,
        failed.url,
        preview(&failed.body)
    );

    let message = status::failure_message(kind, &failed);
    Err(CallError::new(kind, message).with_cause(Cause::Response(failed)))
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Empty objects, arrays and strings, `null`, `false` and zero are sent
/// as no body at all.
fn is_empty_message(message: &Value) -> bool {
    match message {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

/// Parses the `content-length` header.
pub fn content_length(headers: &HeaderMap) -> Result<u64, CallError> {
    let value = headers.get(CONTENT_LENGTH).ok_or_else(|| {
        CallError::new(
            ErrorKind::MissingHeader,
            "No content-length key in response headers.",
        )
    })?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            CallError::new(
                ErrorKind::MissingHeader,
                format!("Invalid content-length header: {:?}", value),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockSessionProvider, TokenProvider};
    use mockito::Matcher;
    use reqwest::header::HeaderValue;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn client() -> RestClient<TokenProvider> {
        RestClient::with_config(
            TokenProvider::new(None).unwrap(),
            ClientConfig::default().with_retry_delay(Duration::ZERO),
        )
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers
    }

    async fn call_with_status(code: usize) -> Result<Response, CallError> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/jobs")
            .with_status(code)
            .with_body("server detail")
            .expect(1)
            .create_async()
            .await;

        let result = client()
            .call(
                Method::GET,
                &format!("{}/api/jobs", server.url()),
                CallOptions::default(),
            )
            .await;

        mock.assert_async().await;
        result
    }

    #[tokio::test]
    async fn test_call_success_statuses() {
        for code in [200, 202] {
            let response = call_with_status(code).await.unwrap();
            assert_eq!(response.status().as_u16() as usize, code);
        }
    }

    #[tokio::test]
    async fn test_call_bad_request() {
        let err = call_with_status(400).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);
        assert!(!err.is_silent());
        assert!(err.message().contains("server detail"));
        assert_eq!(err.status(), Some(reqwest::StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_call_unauthorized() {
        let err = call_with_status(401).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(!err.is_silent());
    }

    #[tokio::test]
    async fn test_call_forbidden_is_silent_failure() {
        let err = call_with_status(403).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotApplicable);
        assert!(err.is_silent());
        assert_eq!(err.response().unwrap().body, "server detail");
    }

    #[tokio::test]
    async fn test_call_not_found() {
        let err = call_with_status(404).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_silent());
        assert!(err.message().contains("/api/jobs"));
    }

    #[tokio::test]
    async fn test_call_other_status_not_retried() {
        for code in [201, 409, 500] {
            let err = call_with_status(code).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CallFailed);
            assert!(!err.is_silent());
            assert_eq!(err.message(), format!("Call failed with status: {}", code));
        }
    }

    #[tokio::test]
    async fn test_call_session_failure_is_transport() {
        let mut provider = MockSessionProvider::new();
        provider
            .expect_get_session()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("refresh token expired")));

        let client = RestClient::new(provider);
        let err = client
            .call(Method::GET, "https://batch.example.com/api", CallOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.message().contains("refresh token expired"));
        assert!(matches!(err.cause(), Some(Cause::Session(_))));
    }

    #[tokio::test]
    async fn test_call_connection_refused_is_transport() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = client()
            .call(
                Method::GET,
                &format!("http://127.0.0.1:{}/api", port),
                CallOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(matches!(err.cause(), Some(Cause::Http(_))));
    }

    #[tokio::test]
    async fn test_get_decodes_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/jobs?skip=0&top=10")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"a": 1}"#)
            .create_async()
            .await;

        let value: Value = client()
            .get(
                &format!("{}/api/jobs", server.url()),
                &json_headers(),
                Some(&[("skip", "0"), ("top", "10")]),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_get_decode_failures() {
        for body in ["", "not json", "{\"a\":"] {
            let mut server = mockito::Server::new_async().await;
            let _mock = server
                .mock("GET", "/api/jobs")
                .with_status(200)
                .with_body(body)
                .create_async()
                .await;

            let err = client()
                .get::<Value>(&format!("{}/api/jobs", server.url()), &json_headers(), None)
                .await
                .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::DecodeFailure, "body {:?}", body);
            assert_eq!(err.message(), "No json object to be decoded from GET call.");
            assert!(matches!(err.cause(), Some(Cause::Json(_))));
        }
    }

    #[tokio::test]
    async fn test_get_status_failure_passes_through() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/jobs")
            .with_status(401)
            .create_async()
            .await;

        let err = client()
            .get::<Value>(&format!("{}/api/jobs", server.url()), &json_headers(), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_head_returns_content_length() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/api/files/my%20scene.max")
            .with_status(200)
            .with_header("content-length", "42")
            .create_async()
            .await;

        let size = client()
            .head(
                &format!("{}/api/files/{{name}}", server.url()),
                &json_headers(),
                Some("my scene.max"),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(size, 42);
    }

    #[tokio::test]
    async fn test_head_malformed_template_makes_no_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = client()
            .head(
                &format!("{}/api/files/{{}}", server.url()),
                &json_headers(),
                Some("a.txt"),
            )
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert_eq!(err.kind(), ErrorKind::MalformedUrl);
    }

    #[test]
    fn test_content_length_parsing() {
        let mut headers = HeaderMap::new();
        let err = content_length(&headers).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingHeader);
        assert_eq!(err.message(), "No content-length key in response headers.");

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert_eq!(content_length(&headers).unwrap(), 42);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        let err = content_length(&headers).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingHeader);
    }

    #[tokio::test]
    async fn test_post_encodes_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/jobs")
            .match_body(Matcher::Json(json!({"x": 1})))
            .with_status(202)
            .with_body(r#""ok""#)
            .create_async()
            .await;

        let value: Value = client()
            .post(
                &format!("{}/api/jobs", server.url()),
                &json_headers(),
                Some(&json!({"x": 1})),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(value, Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn test_post_without_message_sends_no_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/jobs/1/cancel")
            .match_body(Matcher::Exact(String::new()))
            .with_status(200)
            .with_body(r#"{"status": "Cancelling"}"#)
            .create_async()
            .await;

        let value: Value = client()
            .post(
                &format!("{}/api/jobs/1/cancel", server.url()),
                &json_headers(),
                None::<&Value>,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(value["status"], "Cancelling");
    }

    #[tokio::test]
    async fn test_post_empty_message_sends_no_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/jobs/1/cancel")
            .match_body(Matcher::Exact(String::new()))
            .with_status(200)
            .with_body(r#"{"status": "Cancelling"}"#)
            .expect(2)
            .create_async()
            .await;

        let url = format!("{}/api/jobs/1/cancel", server.url());
        let client = client();
        let _: Value = client
            .post(&url, &json_headers(), Some(&json!({})))
            .await
            .unwrap();
        let _: Value = client
            .post(&url, &json_headers(), Some(&Vec::<String>::new()))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[test]
    fn test_is_empty_message() {
        assert!(is_empty_message(&json!(null)));
        assert!(is_empty_message(&json!({})));
        assert!(is_empty_message(&json!([])));
        assert!(is_empty_message(&json!("")));
        assert!(is_empty_message(&json!(false)));
        assert!(is_empty_message(&json!(0)));
        assert!(!is_empty_message(&json!({"x": 1})));
        assert!(!is_empty_message(&json!([0])));
        assert!(!is_empty_message(&json!("Cancel")));
        assert!(!is_empty_message(&json!(true)));
        assert!(!is_empty_message(&json!(3)));
    }

    #[tokio::test]
    async fn test_post_invalid_json_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/jobs")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let err = client()
            .post::<Value, Value>(
                &format!("{}/api/jobs", server.url()),
                &json_headers(),
                Some(&json!({})),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DecodeFailure);
        assert_eq!(err.message(), "No json object to be decoded from POST call.");
    }

    #[test_log::test(tokio::test)]
    async fn test_put_uploads_multipart_without_caller_content_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/files/scene_1.max")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".into()),
            )
            .match_header("accept", "application/json")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="Name""#.into()),
                Matcher::Regex("scene 1.max".into()),
                Matcher::Regex(r#"name="Filename"; filename="scene_1.max""#.into()),
                Matcher::Regex("file payload".into()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        let mut description = BTreeMap::new();
        description.insert("Name".to_string(), "scene 1.max".to_string());
        let file_data = vec![(
            "Filename".to_string(),
            std::io::Cursor::new(b"file payload".to_vec()),
        )];

        let response = client()
            .put(
                &format!("{}/api/files/{{name}}", server.url()),
                &json_headers(),
                &UserFile::new("scene_1.max"),
                &description,
                file_data,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_put_malformed_template() {
        let err = client()
            .put(
                "https://batch.example.com/api/files/",
                &json_headers(),
                &UserFile::new("a.txt"),
                &BTreeMap::new(),
                Vec::<(String, std::io::Cursor<Vec<u8>>)>::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MalformedUrl);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "a".repeat(250);
        assert_eq!(preview(&long).len(), 100);
        assert_eq!(preview("short"), "short");
    }
}
