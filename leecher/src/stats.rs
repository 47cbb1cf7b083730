use std::time::Duration;

// Snapshot of a download, sent to the user periodically.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Progress {

    // Percentage of pieces with all blocks received.
    pub percent: f64,

    // Pieces with all blocks received.
    pub completed: usize,

    pub total: usize,

    // Bytes covered by the completed pieces.
    pub downloaded: u64,

    // Pieces that passed the hash check and are on disk.
    pub verified: usize,

    pub verified_bytes: u64,

    // Active peer sessions.
    pub num_peers: usize,

    // Sessions currently allowed to request from their peer.
    pub num_unchoked: usize,

    // Sessions whose peer has every piece.
    pub num_seeders: usize,

    pub time_elapsed: Duration,

    // Moving average of verified bytes per second.
    pub download_rate: u64,

    pub peak_rate: u64,

}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.verified == self.total
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1}% ({}/{} pieces, {} bytes), {} peers ({} unchoked, {} seeders), {} B/s (peak {} B/s)",
            self.percent, self.completed, self.total, self.downloaded,
            self.num_peers, self.num_unchoked, self.num_seeders,
            self.download_rate, self.peak_rate,
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Counter {
    total: u64,
    round: u64,
    avg: f64,
    peak: f64,
}

impl Counter {

    pub fn add(&mut self, n: u64) {
        self.total += n;
        self.round += n;
    }

    // Ends the round, folding its rate into the moving average.
    pub fn reset(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { self.round as f64 / secs } else { 0.0 };
        self.avg = (self.avg * (5 - 1) as f64 / 5.0) + (rate / 5.0);
        self.round = 0;
        if self.avg > self.peak {
            self.peak = self.avg;
        }
    }

    pub fn avg(&self) -> u64 {
        self.avg as u64
    }

    pub fn peak(&self) -> u64 {
        self.peak as u64
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl std::ops::AddAssign<u64> for Counter {
    fn add_assign(&mut self, n: u64) {
        self.add(n);
    }
}
