//! Download progress observations.

/// One progress observation for an in-flight transfer.
///
/// Delivered over a `tokio::sync::watch` channel: a new observer attaching
/// mid-download immediately sees the current cumulative value rather than a
/// replay from zero, and the sequence ends when the sender side completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadProgress {
    /// Bytes received so far, including bytes carried over from a resumed
    /// partial file.
    pub bytes_received: u64,
    /// Total size of the complete resource, when known.
    pub bytes_total: Option<u64>,
}

impl DownloadProgress {
    /// Completed fraction in `[0, 1]`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.bytes_total {
            Some(total) if total > 0 => Some(self.bytes_received as f64 / total as f64),
            _ => None,
        }
    }
}
