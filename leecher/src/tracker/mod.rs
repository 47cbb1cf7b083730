use std::{net::SocketAddr, time::Duration};
use tokio::time;
use tracing::Instrument;
use url::Url;
use crate::{config::{Config, PeerId}, ID};

mod udp;
pub use udp::UdpTracker;

type Result<T> = std::result::Result<T, TrackerError>;

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("response error: {0}")]
    ResponseError(String),

    // The tracker answered with an error action.
    #[error("tracker error: {0}")]
    TrackerFailure(String),

    #[error("all trackers failed")]
    Exhausted,

}

// How hard to try each tracker before moving on.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {

    // Timeout of the first attempt of each step.
    pub timeout: Duration,

    pub max_retries: u32,

    // Wait before moving on to the next tracker.
    pub cooldown: Duration,

}

impl RetryPolicy {

    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.tracker_timeout,
            max_retries: config.tracker_max_retries,
            cooldown: config.tracker_cooldown,
        }
    }

    // Timeout doubles with every retry, 15s, 30s, 60s...
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.timeout.saturating_mul(1 << attempt.min(16))
    }
}

#[derive(Debug, Copy, Clone)]
pub struct AnnounceParams {

    // Hash of info dict.
    pub info_hash: ID,

    // Unique ID for the client.
    pub client_id: PeerId,

    // Port number.
    pub port: u16,

    // The total amount uploaded since the client sent the 'started' event.
    pub uploaded: u64,

    // The total amount downloaded since the client sent the 'started' event.
    pub downloaded: u64,

    // The number of bytes this client still has to download.
    pub left: u64,

    // If not specified, then this request is one performed at regular intervals.
    pub event: Option<Event>,

    // Number of peers that the client would like to receive from the tracker.
    pub num_want: Option<usize>,

}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub enum Event {

    Completed,

    #[default]
    Started,

    Stopped,

}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Completed => write!(f, "completed"),
            Event::Started => write!(f, "started"),
            Event::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {

    // Seconds to wait before announcing again.
    pub interval: u32,

    pub leechers: u32,

    pub seeders: u32,

    // In the order the tracker listed them, may contain duplicates.
    pub peers: Vec<SocketAddr>,

}

// Announce to each tracker in turn until one answers.
pub async fn announce(urls: &[Url], params: AnnounceParams, policy: RetryPolicy) -> Result<AnnounceResponse> {

    let urls = udp_endpoints(urls);
    for (i, url) in urls.iter().enumerate() {

        if i > 0 {
            time::sleep(policy.cooldown).await;
        }

        let res = async {
            let mut tracker = UdpTracker::new(url, policy).await?;
            tracker.announce(&params).await
        }
            .instrument(tracing::info_span!("tracker", url = %url))
            .await;

        match res {
            Ok(resp) => {
                tracing::info!("tracker {} provided {} peers", url, resp.peers.len());
                return Ok(resp);
            },
            Err(e) => tracing::warn!("tracker {} failed: {}", url, e),
        }
    }

    Err(TrackerError::Exhausted)
}

// Only udp trackers are supported, duplicates after the first are dropped.
fn udp_endpoints(urls: &[Url]) -> Vec<Url> {
    let mut endpoints: Vec<Url> = Vec::with_capacity(urls.len());
    for url in urls {
        if url.scheme() != "udp" {
            tracing::warn!("unsupported tracker scheme: {}", url.scheme());
            continue;
        }
        if !endpoints.contains(url) {
            endpoints.push(url.clone());
        }
    }
    endpoints
}
