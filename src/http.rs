use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::HttpSettings;

const BASE_DELAY_MS: u64 = 200;

pub fn build_client(
    settings: HttpSettings,
    mut headers: HeaderMap,
) -> Result<Client, reqwest::Error> {
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("foph-harvest/", env!("CARGO_PKG_VERSION"))),
    );
    Client::builder()
        .default_headers(headers)
        .timeout(settings.timeout)
        .build()
}

/// Sends the request built by `make_req`, retrying transient failures with linear backoff.
pub fn send_with_retries<F>(max_retries: usize, mut make_req: F) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < max_retries && is_retryable_status(status) {
                    tracing::debug!(status, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < max_retries && is_retryable_error(&err) {
                    tracing::debug!(error = %err, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

fn backoff(attempt: usize) {
    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
