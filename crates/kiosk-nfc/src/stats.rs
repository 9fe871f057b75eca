//! Reader operation counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    Read,
    Write,
    Error,
    AuthenticationFailure,
    ConnectionFailure,
}

/// Counters shared between the polling thread and its owner
#[derive(Debug, Default)]
pub struct ReaderStats {
    reads: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
    authentication_failures: AtomicU64,
    connection_failures: AtomicU64,
}

impl ReaderStats {
    pub(crate) fn record(&self, counter: Counter) {
        let slot = match counter {
            Counter::Read => &self.reads,
            Counter::Write => &self.writes,
            Counter::Error => &self.errors,
            Counter::AuthenticationFailure => &self.authentication_failures,
            Counter::ConnectionFailure => &self.connection_failures,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            authentication_failures: self.authentication_failures.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReaderStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Card sessions read completely
    pub reads: u64,
    /// Credential writes that passed verification
    pub writes: u64,
    /// Transport errors
    pub errors: u64,
    /// Blocks for which no key in the ring worked
    pub authentication_failures: u64,
    /// Failed reader reinitializations
    pub connection_failures: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reads={} writes={} errors={} auth_failures={} connection_failures={}",
            self.reads,
            self.writes,
            self.errors,
            self.authentication_failures,
            self.connection_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let stats = ReaderStats::default();
        stats.record(Counter::Read);
        stats.record(Counter::Read);
        stats.record(Counter::AuthenticationFailure);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.reads, 2);
        assert_eq!(snapshot.authentication_failures, 1);
        assert_eq!(snapshot.writes, 0);
        assert_eq!(
            snapshot.to_string(),
            "reads=2 writes=0 errors=0 auth_failures=1 connection_failures=0"
        );
    }
}
