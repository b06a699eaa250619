// src/core/testing.rs

//! In-memory fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_compression::tokio::write::GzipEncoder;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::core::fetch::{ByteStream, FetchOptions, HttpFetcher};
use crate::error::FetchError;

pub fn gzip(data: &[u8]) -> Vec<u8> {
    futures::executor::block_on(async {
        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(data).await.unwrap();
        encoder.shutdown().await.unwrap();
        encoder.into_inner()
    })
}

#[derive(Debug, Clone)]
enum Route {
    Body(Bytes),
    Chunked(Vec<u8>, usize),
    Status(u16),
    Stall,
    Flaky { failures: u32, then: Box<Route> },
}

/// Routes exact URLs to canned responses. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<HashMap<String, u32>>,
}

impl StubFetcher {
    pub fn respond(&self, url: &str, body: impl Into<Bytes>) {
        self.route(url, Route::Body(body.into()));
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.route(url, Route::Status(status));
    }

    /// Never answers; only a timeout or cancellation ends the request.
    pub fn stall(&self, url: &str) {
        self.route(url, Route::Stall);
    }

    pub fn stream_chunked(&self, url: &str, body: Vec<u8>, chunk: usize) {
        self.route(url, Route::Chunked(body, chunk.max(1)));
    }

    /// Fails with a 503 `failures` times, then streams `body`.
    pub fn flaky_stream(&self, url: &str, body: Vec<u8>, chunk: usize, failures: u32) {
        let then = Box::new(Route::Chunked(body, chunk.max(1)));
        self.route(url, Route::Flaky { failures, then });
    }

    pub fn hits(&self, url: &str) -> u32 {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn route(&self, url: &str, route: Route) {
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    fn resolve(&self, url: &str) -> Route {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(Route::Flaky { failures, then }) => {
                if *failures == 0 {
                    (**then).clone()
                } else {
                    *failures -= 1;
                    Route::Status(503)
                }
            }
            Some(route) => route.clone(),
            None => Route::Status(404),
        }
    }
}

fn status_error(url: &str, status: u16) -> FetchError {
    FetchError::Status { url: url.to_string(), status }
}

async fn stall(url: &str, options: &FetchOptions) -> FetchError {
    let timeout = async {
        match options.timeout {
            Some(after) => tokio::time::sleep(after).await,
            None => futures::future::pending::<()>().await,
        }
    };
    let cancelled = async {
        match &options.cancel {
            Some(token) => token.cancelled().await,
            None => futures::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = timeout => FetchError::Timeout { url: url.to_string(), after: options.timeout.unwrap_or_default() },
        _ = cancelled => FetchError::Cancelled(url.to_string()),
    }
}

#[async_trait]
impl HttpFetcher for StubFetcher {
    async fn get(&self, url: &str, options: &FetchOptions) -> Result<Bytes, FetchError> {
        match self.resolve(url) {
            Route::Body(body) => Ok(body),
            Route::Chunked(body, _) => Ok(Bytes::from(body)),
            Route::Status(status) => Err(status_error(url, status)),
            Route::Flaky { .. } => Err(status_error(url, 503)),
            Route::Stall => Err(stall(url, options).await),
        }
    }

    async fn stream(&self, url: &str) -> Result<ByteStream, FetchError> {
        match self.resolve(url) {
            Route::Body(body) => Ok(futures::stream::iter(vec![Ok(body)]).boxed()),
            Route::Chunked(body, size) => {
                let chunks: Vec<Result<Bytes, FetchError>> = body
                    .chunks(size)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(futures::stream::iter(chunks).boxed())
            }
            Route::Status(status) => Err(status_error(url, status)),
            Route::Flaky { .. } => Err(status_error(url, 503)),
            Route::Stall => Err(stall(url, &FetchOptions::default()).await),
        }
    }
}
