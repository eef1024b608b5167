//! HTTP and timing seams for the fetcher.
//!
//! The fetch protocol only needs "GET with query, give me status + Retry-After +
//! body" and "wait this long". Both are traits so the batch logic can run
//! against scripted replies in tests.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use thiserror::Error;

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    /// Raw `Retry-After` header value, if any.
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// `Retry-After` as whole seconds; HTTP-date values are ignored.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.as_deref()?.trim().parse().ok()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

pub trait Transport {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpReply, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpReply, TransportError> {
        (**self).get(url, query)
    }
}

/// Blocking `reqwest` transport.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpReply, TransportError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| TransportError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().map_err(|e| TransportError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(HttpReply {
            status,
            retry_after,
            body,
        })
    }
}

/// Something that can block the current thread for a while.
pub trait Pause {
    fn pause(&self, duration: Duration);
}

impl<P: Pause + ?Sized> Pause for &P {
    fn pause(&self, duration: Duration) {
        (**self).pause(duration)
    }
}

/// Real sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport and recording pause shared by fetcher tests.

    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    /// Replies are handed out in order; once exhausted, `fallback` repeats.
    pub struct ScriptedTransport {
        replies: RefCell<VecDeque<Result<HttpReply, TransportError>>>,
        fallback: Box<dyn Fn(&str, &[(&str, String)]) -> Result<HttpReply, TransportError>>,
        pub calls: RefCell<Vec<(String, Vec<(String, String)>)>>,
    }

    impl ScriptedTransport {
        pub fn new(
            fallback: impl Fn(&str, &[(&str, String)]) -> Result<HttpReply, TransportError> + 'static,
        ) -> Self {
            Self {
                replies: RefCell::new(VecDeque::new()),
                fallback: Box::new(fallback),
                calls: RefCell::new(Vec::new()),
            }
        }

        pub fn push(&self, reply: Result<HttpReply, TransportError>) {
            self.replies.borrow_mut().push_back(reply);
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }

        /// `(start, end)` query values of every call, in order.
        pub fn requested_windows(&self) -> Vec<(String, String)> {
            self.calls
                .borrow()
                .iter()
                .map(|(_, q)| {
                    let get = |k: &str| {
                        q.iter()
                            .find(|(name, _)| name == k)
                            .map(|(_, v)| v.clone())
                            .unwrap_or_default()
                    };
                    (get("start"), get("end"))
                })
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, url: &str, query: &[(&str, String)]) -> Result<HttpReply, TransportError> {
            self.calls.borrow_mut().push((
                url.to_string(),
                query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ));
            match self.replies.borrow_mut().pop_front() {
                Some(reply) => reply,
                None => (self.fallback)(url, query),
            }
        }
    }

    pub fn reply(status: u16, body: &str) -> Result<HttpReply, TransportError> {
        Ok(HttpReply {
            status,
            retry_after: None,
            body: body.to_string(),
        })
    }

    pub fn rate_limited(retry_after: Option<&str>) -> Result<HttpReply, TransportError> {
        Ok(HttpReply {
            status: 429,
            retry_after: retry_after.map(str::to_string),
            body: String::new(),
        })
    }

    #[derive(Default)]
    pub struct RecordingPause {
        pub pauses: RefCell<Vec<Duration>>,
    }

    impl Pause for RecordingPause {
        fn pause(&self, duration: Duration) {
            self.pauses.borrow_mut().push(duration);
        }
    }
}
