//! HTTP hop loop: times every request in a redirect chain.

use std::time::Instant;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, Url};

use super::{millis, ProbeError};
use crate::metric::Metric;

/// Redirect chain length past which the cycle is aborted.
pub const MAX_REDIRECTS: i16 = 20;

/// Issue GETs hop by hop, accumulating timings into `metric`, until a
/// non-redirect response arrives (or redirect following is off).
///
/// Returns the terminal body and its Content-Type header. The client must
/// have automatic redirect handling disabled; every hop is observed here.
pub(super) async fn time_http(
    metric: &mut Metric,
    client: &Client,
    mut url: Url,
    follow_redirect: bool,
) -> Result<(Vec<u8>, Option<String>), ProbeError> {
    loop {
        if metric.num_redirects > MAX_REDIRECTS {
            return Err(ProbeError::TooManyRedirects);
        }

        let start = Instant::now();
        let response = client.get(url.clone()).send().await?;
        // Hop time runs up to the response headers; the body transfer is not
        // part of the measurement.
        let elapsed = millis(start.elapsed());
        let status = response.status();

        metric.total_rt += elapsed;
        metric.final_response_code = Some(status.as_u16() as i16);
        if metric.initial_response_code.is_none() {
            metric.http_rt = elapsed;
            metric.initial_response_code = Some(status.as_u16() as i16);
        }

        // A 3xx without a usable Location header (304 and friends) is
        // terminal; only an unparseable location aborts the cycle.
        let location = if follow_redirect && status.is_redirection() {
            response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        } else {
            None
        };

        match location {
            Some(location) => {
                // Resolve relative redirects against the hop URL.
                url = url.join(&location).map_err(|e| ProbeError::InvalidLocation {
                    location,
                    reason: e.to_string(),
                })?;
                metric.num_redirects += 1;
            }
            None => {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let body = response.bytes().await?.to_vec();
                return Ok((body, content_type));
            }
        }
    }
}
