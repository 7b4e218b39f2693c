//! TCP connect timing with tagged failure classification.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use tokio::net::{lookup_host, TcpStream};

/// Outcome of a timed TCP connect attempt. Classification never fails; every
/// way the connect can go wrong maps onto a variant here.
#[derive(Debug)]
pub enum TcpProbe {
    /// The connect succeeded within the timeout.
    Connected(Duration),
    /// The host name did not resolve to any address.
    ResolutionFailure { host: String },
    /// The host actively refused the connection.
    ConnectionRefused { port: u16 },
    /// The connect did not complete within the timeout.
    TimedOut { timeout: Duration },
    /// Any other socket-level failure (e.g. network unreachable).
    Failed(io::Error),
}

impl TcpProbe {
    /// The failure description recorded into `Metric.tcp_exception`, or None
    /// on success.
    pub fn failure(&self) -> Option<String> {
        match self {
            TcpProbe::Connected(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for TcpProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcpProbe::Connected(rt) => write!(f, "connected in {:?}", rt),
            TcpProbe::ResolutionFailure { host } => {
                write!(f, "could not resolve host name: {}", host)
            }
            TcpProbe::ConnectionRefused { port } => {
                write!(f, "host refused connection on port {}", port)
            }
            TcpProbe::TimedOut { timeout } => {
                write!(f, "connection timed out after {}s", timeout.as_secs_f64())
            }
            TcpProbe::Failed(e) => write!(f, "connect failed: {}", e),
        }
    }
}

/// Open a raw socket to (host, port), timing the connect.
///
/// Each call resolves and connects from scratch so the measured duration is
/// the true cost of establishing a fresh TCP path.
pub async fn time_connect(host: &str, port: u16, timeout: Duration) -> TcpProbe {
    let addr = match lookup_host((host, port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                return TcpProbe::ResolutionFailure {
                    host: host.to_string(),
                }
            }
        },
        Err(_) => {
            return TcpProbe::ResolutionFailure {
                host: host.to_string(),
            }
        }
    };

    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let rt = start.elapsed();
            drop(stream);
            TcpProbe::Connected(rt)
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            TcpProbe::ConnectionRefused { port }
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => TcpProbe::TimedOut { timeout },
        Ok(Err(e)) => TcpProbe::Failed(e),
        Err(_) => TcpProbe::TimedOut { timeout },
    }
}
