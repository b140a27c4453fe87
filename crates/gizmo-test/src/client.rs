//! In-memory client driving a [`Server`].

use std::net::SocketAddr;

use bytes::Bytes;
use http::{header, HeaderName, HeaderValue, Method};
use serde::Serialize;

use gizmo_core::codec::JSON_CONTENT_TYPE;
use gizmo_server::Server;

use crate::error::TestError;
use crate::response::TestResponse;

/// Remote address used when a request does not set one.
pub const DEFAULT_REMOTE: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 40_000);

/// Sends requests through [`Server::dispatch`] without opening a socket.
///
/// Requests pass through the same middleware, activity accounting and
/// routing as requests accepted on the listener. The server does not need
/// to be started, but health checks only report ready after
/// [`Server::start`].
///
/// ```no_run
/// use gizmo_config::ServerConfig;
/// use gizmo_server::Server;
/// use gizmo_test::TestClient;
///
/// # async fn run() {
/// let server = Server::new(ServerConfig::default()).unwrap();
/// let client = TestClient::new(server);
/// let response = client.get("/_ah/warmup").send().await;
/// assert_eq!(response.status_code(), 200);
/// # }
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct TestClient {
    server: Server,
    remote: SocketAddr,
    default_headers: Vec<(String, String)>,
}

impl TestClient {
    /// Creates a client for `server`.
    pub fn new(server: Server) -> Self {
        Self {
            server,
            remote: DEFAULT_REMOTE,
            default_headers: Vec::new(),
        }
    }

    /// Sets the remote address reported for every request.
    pub fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remote = remote;
        self
    }

    /// Adds a header sent with every request.
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// The server under test.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Starts a `GET` request.
    pub fn get(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::GET, uri)
    }

    /// Starts a `POST` request.
    pub fn post(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::POST, uri)
    }

    /// Starts a `PUT` request.
    pub fn put(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::PUT, uri)
    }

    /// Starts a `DELETE` request.
    pub fn delete(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::DELETE, uri)
    }

    /// Starts an `OPTIONS` request.
    pub fn options(&self, uri: impl Into<String>) -> TestClientRequest<'_> {
        self.request(Method::OPTIONS, uri)
    }

    /// Starts a request with any method.
    pub fn request(&self, method: Method, uri: impl Into<String>) -> TestClientRequest<'_> {
        TestClientRequest {
            client: self,
            method,
            uri: uri.into(),
            headers: self.default_headers.clone(),
            body: Bytes::new(),
            remote: self.remote,
            error: None,
        }
    }
}

/// A request being built for a [`TestClient`].
#[derive(Debug)]
#[must_use]
pub struct TestClientRequest<'a> {
    client: &'a TestClient,
    method: Method,
    uri: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    remote: SocketAddr,
    error: Option<TestError>,
}

impl<'a> TestClientRequest<'a> {
    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the caller address for this request.
    pub fn remote(mut self, remote: SocketAddr) -> Self {
        self.remote = remote;
        self
    }

    /// Sets the raw body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a JSON body and content type.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = Bytes::from(body);
                self.headers
                    .push((header::CONTENT_TYPE.to_string(), JSON_CONTENT_TYPE.to_string()));
            }
            Err(err) => self.error = Some(TestError::Json(err)),
        }
        self
    }

    fn build(self) -> Result<(&'a TestClient, gizmo_core::Request, SocketAddr), TestError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut request = http::Request::builder()
            .method(self.method)
            .uri(&self.uri)
            .body(self.body)
            .map_err(|e| TestError::RequestBuild(e.to_string()))?;

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TestError::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TestError::InvalidHeader(format!("{name}: {e}")))?;
            request.headers_mut().append(name, value);
        }
        Ok((self.client, request, self.remote))
    }

    /// Sends the request.
    ///
    /// # Panics
    ///
    /// Panics if the request could not be built.
    pub async fn send(self) -> TestResponse {
        match self.try_send().await {
            Ok(response) => response,
            Err(err) => panic!("failed to build test request: {err}"),
        }
    }

    /// Sends the request, returning build errors.
    pub async fn try_send(self) -> Result<TestResponse, TestError> {
        let (client, request, remote) = self.build()?;
        let response = client.server.dispatch(request, Some(remote)).await;
        Ok(TestResponse::from_response(response))
    }
}
