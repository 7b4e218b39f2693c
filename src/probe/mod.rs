//! Probe engine: one measurement cycle per call.
//!
//! A cycle times a raw TCP connect, then walks the HTTP redirect chain hop by
//! hop, and optionally runs a content-regex check on the terminal body. The
//! outcome of all of it is a single [`Metric`].

mod content;
mod http;
mod tcp;

pub use content::{extract_charset, match_content};
pub use http::MAX_REDIRECTS;
pub use tcp::{time_connect, TcpProbe};

use std::time::Duration;

use regex::Regex;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use thiserror::Error;

use crate::metric::Metric;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Reasons the HTTP phase of a cycle can abort.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("too many redirects (more than 20)")]
    TooManyRedirects,
    #[error("invalid redirect location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },
    #[error("http request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A cycle abort. Carries the partially populated metric so the caller
/// decides whether to publish the partial record.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CycleError {
    #[source]
    pub error: ProbeError,
    pub metric: Box<Metric>,
}

/// Rejected probe target configuration.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("invalid target url: {0}")]
    Url(String),
    #[error("target url has no host")]
    MissingHost,
}

/// A configured probe target. One instance drives one URL.
pub struct Prober {
    url: Url,
    host: String,
    port: u16,
    follow_redirect: bool,
    content_pattern: Option<Regex>,
    connect_timeout: Duration,
}

impl Prober {
    pub fn new(
        url: &str,
        follow_redirect: bool,
        content_pattern: Option<Regex>,
        connect_timeout: Duration,
    ) -> Result<Self, TargetError> {
        let url = Url::parse(url).map_err(|e| TargetError::Url(e.to_string()))?;
        let host = url.host_str().ok_or(TargetError::MissingHost)?.to_string();
        // Explicit port, else 443 for https, else 80.
        let port = url.port_or_known_default().unwrap_or(80);
        Ok(Self {
            url,
            host,
            port,
            follow_redirect,
            content_pattern,
            connect_timeout,
        })
    }

    /// Run one measurement cycle.
    ///
    /// A TCP failure is data, not an error: the returned metric carries the
    /// classification and the HTTP fields stay at their defaults. Only a
    /// redirect overflow or an HTTP transport fault aborts the cycle, and
    /// even then the partial metric rides along in the error.
    pub async fn run_cycle(&self) -> Result<Metric, CycleError> {
        let mut metric = Metric::new();

        match tcp::time_connect(&self.host, self.port, self.connect_timeout).await {
            TcpProbe::Connected(rt) => metric.tcp_rt = millis(rt),
            failure => {
                metric.tcp_exception = failure.failure();
                return Ok(metric);
            }
        }

        // A fresh client per cycle: connections pooled across cycles would
        // hide the true cost of establishing each HTTP path.
        let client = match Client::builder()
            .redirect(Policy::none())
            .pool_max_idle_per_host(1)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                return Err(CycleError {
                    error: ProbeError::Transport(e),
                    metric: Box::new(metric),
                })
            }
        };

        match http::time_http(&mut metric, &client, self.url.clone(), self.follow_redirect).await {
            Ok((body, content_type)) => {
                if let Some(pattern) = &self.content_pattern {
                    metric.content_found =
                        Some(content::match_content(pattern, &body, content_type.as_deref()));
                }
                Ok(metric)
            }
            Err(error) => Err(CycleError {
                error,
                metric: Box::new(metric),
            }),
        }
    }
}

pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}
