use std::time::Duration;
use rand::Rng;
use crate::ID;

const CLIENT_PREFIX: &[u8; 8] = b"-LE0100-";

// 20 byte id we identify ourselves with, to trackers and peers.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PeerId(pub ID);

impl PeerId {
    // Client prefix followed by random alphanumerics.
    pub fn generate() -> Self {
        let mut id = [0; 20];
        id[..8].copy_from_slice(CLIENT_PREFIX);
        let mut rng = rand::thread_rng();
        for b in id[8..].iter_mut() {
            *b = rng.sample(rand::distributions::Alphanumeric);
        }
        PeerId(id)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}

#[derive(Debug, Clone)]
pub struct Config {

    pub client_id: PeerId,

    // Port announced to trackers.
    pub port: u16,

    // Maximum number of concurrent peer sessions.
    pub max_connections: usize,

    // Delay between starting each of the initial sessions.
    pub connect_stagger: Duration,

    pub connect_timeout: Duration,

    // Session is closed if nothing is read for this long.
    pub read_timeout: Duration,

    // Timeout of the first attempt of a tracker step, doubled on every retry.
    pub tracker_timeout: Duration,

    pub tracker_max_retries: u32,

    // Wait before moving on to the next tracker.
    pub tracker_cooldown: Duration,

    pub progress_interval: Duration,

    // Whether a choke from the peer ends the session, otherwise requests pause until unchoked.
    pub close_on_choke: bool,

}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: PeerId::generate(),
            port: 6881,
            max_connections: 5,
            connect_stagger: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            tracker_timeout: Duration::from_secs(15),
            tracker_max_retries: 3,
            tracker_cooldown: Duration::from_secs(1),
            progress_interval: Duration::from_secs(1),
            close_on_choke: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_generate() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_eq!(&a.0[..8], CLIENT_PREFIX);
        assert!(a.0[8..].iter().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
