use crate::error::FetchError;
use crate::http_client::build_http_client;
use crate::models::BasicAuth;
use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use reqwest::header::HeaderMap;
use std::num::NonZeroU32;
use url::Url;

/// Raw result of a GET request. Any HTTP status is a valid result.
#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

pub struct Fetcher {
    client: reqwest::Client,
    auth: Option<BasicAuth>,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl Fetcher {
    pub fn new(
        timeout_secs: u64,
        requests_per_second: Option<f64>,
        auth: Option<BasicAuth>,
    ) -> Result<Self, reqwest::Error> {
        let rate_limiter = requests_per_second
            .filter(|rps| *rps > 0.0)
            .and_then(|rps| NonZeroU32::new(rps.ceil() as u32))
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client: build_http_client(timeout_secs)?,
            auth,
            rate_limiter,
        })
    }

    pub async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        // Wait for rate limiter before making request
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let mut request = self.client.get(url.as_str());
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await.map_err(|e| classify(url, e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| classify(url, e))?;

        tracing::debug!(url = %url, status, size = body.len(), "Fetched page");

        Ok(FetchResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

fn classify(url: &Url, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Connection {
            url: url.to_string(),
            source: err,
        }
    }
}
