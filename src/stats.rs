use std::time::Instant;

/// All-time readout totals for this server process, used for the throughput
/// line logged after each download.
#[derive(Debug)]
pub struct ReadoutStats {
    pub total_size: usize,
    pub n_events: usize,
    pub t_begin: Instant,
}

impl Default for ReadoutStats {
    fn default() -> Self {
        Self {
            total_size: 0,
            n_events: 0,
            t_begin: Instant::now(),
        }
    }
}

impl ReadoutStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Record one completed readout of `n_events` events totalling `size`
    /// bytes of sample data.
    pub fn record(&mut self, n_events: usize, size: usize) {
        self.n_events += n_events;
        self.total_size += size;
    }

    /// Average rate since the server started, in MB/s.
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_size as f64 / secs) / (1024.0 * 1024.0)
    }
}
