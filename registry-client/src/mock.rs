//! A canned-response HTTP service for exercising [`HttpRegistry`](crate::HttpRegistry)
//! without a network.
//!
//! Responses are matched on path and query first, then on path alone.
//! Unmatched requests get an empty `404`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{header, response, HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl MockResponse {
    /// A response with a status, headers and body.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A `200 OK` JSON response.
    pub fn json(body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(StatusCode::OK, headers, body)
    }

    /// A bare status with no body.
    pub fn status(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }

    /// Set a header, replacing any previous value.
    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }
}

/// A request the mock has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Path and query of the request.
    pub path: String,

    /// The `Authorization` header, if one was sent.
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
struct Guard {
    prefix: String,
    authorization: String,
    challenge: String,
}

/// A [`tower::Service`] answering from a table of canned responses.
#[derive(Debug, Default, Clone)]
pub struct MockService {
    responses: HashMap<String, MockResponse>,
    guards: Vec<Guard>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    /// An empty mock, which answers `404` to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests for `path` (optionally including the query) with `response`.
    pub fn add(&mut self, path: &str, response: MockResponse) -> &mut Self {
        self.responses.insert(path.to_owned(), response);
        self
    }

    /// Require `authorization` on every path starting with `prefix`.
    /// Other requests are answered `401` with `challenge` as `WWW-Authenticate`.
    pub fn protect(&mut self, prefix: &str, authorization: &str, challenge: &str) -> &mut Self {
        self.guards.push(Guard {
            prefix: prefix.to_owned(),
            authorization: authorization.to_owned(),
            challenge: challenge.to_owned(),
        });
        self
    }

    /// Every request seen so far, across all clones of this mock.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn respond(&self, req: &http::Request<hyperdriver::Body>) -> MockResponse {
        let path = req.uri().path();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(path);
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        self.requests.lock().push(RecordedRequest {
            path: path_and_query.to_owned(),
            authorization: authorization.map(str::to_owned),
        });

        if let Some(guard) = self
            .guards
            .iter()
            .find(|guard| path.starts_with(&guard.prefix))
        {
            if authorization != Some(guard.authorization.as_str()) {
                return MockResponse::status(StatusCode::UNAUTHORIZED)
                    .with_header(header::WWW_AUTHENTICATE, &guard.challenge);
            }
        }

        self.responses
            .get(path_and_query)
            .or_else(|| self.responses.get(path))
            .cloned()
            .unwrap_or_else(|| MockResponse::status(StatusCode::NOT_FOUND))
    }
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockService {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        let canned = self.respond(&req);

        let mut builder = response::Builder::new()
            .status(canned.status)
            .version(http::Version::HTTP_11);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(canned.headers);
        }

        let response = builder
            .body(hyperdriver::Body::from(canned.body))
            .expect("canned response is valid");

        std::future::ready(Ok(response))
    }
}
