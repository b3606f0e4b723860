//! Scripted fetcher for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use tokio::sync::mpsc;

use crate::{Fetcher, NetError, Request, Response};

/// A canned reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond {
        status: u16,
        content_type: Option<&'static str>,
        body: Bytes,
    },
    NetworkError,
}

impl Reply {
    /// 200 with a text body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::Respond {
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }

    /// Empty body with the given status.
    pub fn status(status: u16) -> Self {
        Self::Respond {
            status,
            content_type: None,
            body: Bytes::new(),
        }
    }

    /// JSON body with the given status.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::Respond {
            status,
            content_type: Some("application/json"),
            body: Bytes::from(value.to_string()),
        }
    }
}

/// Fetcher answering from a table of URLs and recording every request.
///
/// Unknown URLs get an empty 404. A URL scripted with several replies
/// consumes them in order and keeps repeating the last one.
#[derive(Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<Request>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `url` with `reply`.
    pub fn route(self, url: &str, reply: Reply) -> Self {
        self.sequence(url, vec![reply])
    }

    /// Answer `url` with `replies` in order.
    pub fn sequence(self, url: &str, replies: Vec<Reply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
        self
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests seen so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Number of requests seen for `url`.
    pub fn calls_to(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(replies) if replies.len() > 1 => replies.pop_front().unwrap(),
            Some(replies) => replies.front().cloned().unwrap_or(Reply::status(404)),
            None => Reply::status(404),
        }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        match self.next_reply(url.as_str()) {
            Reply::NetworkError => Err(NetError::RequestFailed(format!("{url}: unreachable"))),
            Reply::Respond {
                status,
                content_type,
                body,
            } => {
                let mut headers = HeaderMap::new();
                if let Some(ct) = content_type {
                    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
                }
                let (tx, rx) = mpsc::channel(1);
                if !body.is_empty() {
                    let _ = tx.try_send(Ok(body));
                }
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Ok(Response::streaming(url, status, headers, rx))
            }
        }
    }
}
