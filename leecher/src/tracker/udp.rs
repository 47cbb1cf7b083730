use std::net::{Ipv4Addr, SocketAddr};
use bytes::{Buf, BufMut, BytesMut};
use tokio::{net::UdpSocket, time};
use url::Url;
use super::{AnnounceParams, AnnounceResponse, Event, Result, RetryPolicy, TrackerError};

// Reference: https://www.bittorrent.org/beps/bep_0015.html

const PROTOCOL_ID: i64      = 0x41727101980;
const ACTION_CONNECT: i32   = 0;
const ACTION_ANNOUNCE: i32  = 1;
const ACTION_ERROR: i32     = 3;

const CONNECT_LEN: usize    = 16;
const ANNOUNCE_LEN: usize   = 98;

// Largest payload a UDP datagram can carry over IPv4.
const MAX_DATAGRAM: usize   = 65_507;

pub struct UdpTracker {

    socket: UdpSocket,

    policy: RetryPolicy,

    conn_id: Option<i64>,

}

impl UdpTracker {

    pub async fn new(url: &Url, policy: RetryPolicy) -> Result<Self> {

        let host = url.host_str().ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;
        let port = url.port().ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| TrackerError::InvalidUrl(url.to_string()))?;

        // Uses first available local port.
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;

        Ok(Self {
            socket,
            policy,
            conn_id: None,
        })
    }

    pub async fn announce(&mut self, params: &AnnounceParams) -> Result<AnnounceResponse> {

        let conn_id = match self.conn_id {
            Some(conn_id) => conn_id,
            None => self.connect().await?,
        };

        let trans_id = rand::random();
        let req = announce_request(conn_id, trans_id, params, rand::random());
        let resp = self.transact(&req, |resp| parse_announce(resp, trans_id)).await?;

        tracing::info!(
            "announced, interval {}s, {} seeders, {} leechers, {} peers",
            resp.interval, resp.seeders, resp.leechers, resp.peers.len(),
        );
        Ok(resp)
    }

    async fn connect(&mut self) -> Result<i64> {
        let trans_id = rand::random();
        let req = connect_request(trans_id);
        let conn_id = self.transact(&req, |resp| parse_connect(resp, trans_id)).await?;
        tracing::trace!("connected to tracker");
        self.conn_id = Some(conn_id);
        Ok(conn_id)
    }

    // Send a request until a valid response comes back.
    // Timeouts and malformed responses are retried with a growing timeout,
    // an error from the tracker is returned straight away.
    async fn transact<T>(&self, req: &[u8], parse: impl Fn(&[u8]) -> Result<T>) -> Result<T> {

        let mut buf = vec![0u8; MAX_DATAGRAM];
        for attempt in 0..=self.policy.max_retries {

            let timeout = self.policy.timeout_for(attempt);
            self.socket.send(req).await?;

            match time::timeout(timeout, self.socket.recv(&mut buf)).await {
                Err(_) => tracing::warn!("no response within {:?} (attempt {})", timeout, attempt + 1),
                Ok(res) => match parse(&buf[..res?]) {
                    Ok(resp) => return Ok(resp),
                    Err(e @ TrackerError::TrackerFailure(_)) => return Err(e),
                    Err(e) => tracing::warn!("{} (attempt {})", e, attempt + 1),
                },
            }
        }

        Err(TrackerError::Timeout)
    }
}

fn connect_request(trans_id: i32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(CONNECT_LEN);
    buf.put_i64(PROTOCOL_ID);
    buf.put_i32(ACTION_CONNECT);
    buf.put_i32(trans_id);
    buf
}

fn announce_request(conn_id: i64, trans_id: i32, params: &AnnounceParams, key: i32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(ANNOUNCE_LEN);
    buf.put_i64(conn_id);
    buf.put_i32(ACTION_ANNOUNCE);
    buf.put_i32(trans_id);
    buf.put(&params.info_hash[..]);
    buf.put(&params.client_id.0[..]);
    buf.put_u64(params.downloaded);
    buf.put_u64(params.left);
    buf.put_u64(params.uploaded);
    buf.put_i32(
        match params.event {
            Some(Event::Started) => 2,
            Some(Event::Completed) => 1,
            Some(Event::Stopped) => 3,
            None => 0,
        }
    );
    buf.put_i32(0); // IP address, default = 0.
    buf.put_i32(key);
    buf.put_i32(
        match params.num_want {
            Some(num_want) => num_want as i32,
            None => -1,
        }
    );
    buf.put_u16(params.port);
    buf
}

// Checks the action and transaction id common to every response.
fn check_header(mut resp: &[u8], action: i32, trans_id: i32, min_len: usize) -> Result<()> {

    if resp.len() < 8 {
        return Err(TrackerError::ResponseError(format!("invalid response length {}", resp.len())));
    }
    if i32::from_be_bytes([resp[4], resp[5], resp[6], resp[7]]) != trans_id {
        return Err(TrackerError::ResponseError("invalid transaction id".to_string()));
    }
    if i32::from_be_bytes([resp[0], resp[1], resp[2], resp[3]]) == ACTION_ERROR {
        let msg = String::from_utf8_lossy(&resp[8..]).into_owned();
        return Err(TrackerError::TrackerFailure(msg));
    }
    if resp.len() < min_len {
        return Err(TrackerError::ResponseError(format!("invalid response length {}", resp.len())));
    }
    let got = resp.get_i32();
    if got != action {
        return Err(TrackerError::ResponseError(format!("expected action {}, got {}", action, got)));
    }
    Ok(())
}

fn parse_connect(resp: &[u8], trans_id: i32) -> Result<i64> {
    check_header(resp, ACTION_CONNECT, trans_id, 16)?;
    Ok((&resp[8..]).get_i64())
}

fn parse_announce(resp: &[u8], trans_id: i32) -> Result<AnnounceResponse> {

    check_header(resp, ACTION_ANNOUNCE, trans_id, 20)?;
    let mut body = &resp[8..];
    let interval = body.get_u32();
    let leechers = body.get_u32();
    let seeders = body.get_u32();

    // Trailing bytes that don't make a whole record are ignored.
    let peers = body
        .chunks_exact(6)
        .map(|mut peer| {
            let ip = peer.get_u32();
            let port = peer.get_u16();
            SocketAddr::new(Ipv4Addr::from(ip).into(), port)
        })
        .collect();

    Ok(AnnounceResponse { interval, leechers, seeders, peers })
}
