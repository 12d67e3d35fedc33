use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::TableError;

/// Shared query-interrupted flag.
///
/// Clones observe the same flag. Orchestrators check it at batch
/// boundaries; the bowtie2 reader thread checks it between SAM batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Fresh, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), TableError> {
        if self.is_cancelled() {
            Err(TableError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// User-visible warnings collected during one query.
#[derive(Debug, Default)]
pub struct Warnings {
    messages: Mutex<Vec<String>>,
}

impl Warnings {
    /// Record a warning and log it.
    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Copy of the warnings so far.
    pub fn snapshot(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Hands out work unit indices `0..total`, each exactly once.
#[derive(Debug)]
pub struct WorkClaimer {
    next: Mutex<usize>,
    total: usize,
}

impl WorkClaimer {
    /// Claimer over `total` units.
    pub fn new(total: usize) -> Self {
        Self {
            next: Mutex::new(0),
            total,
        }
    }

    /// Next unclaimed unit, or `None` when all are taken.
    pub fn claim(&self) -> Option<usize> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        if *next >= self.total {
            return None;
        }
        let unit = *next;
        *next += 1;
        Some(unit)
    }

    /// Number of units.
    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_claims_each_unit_once_across_threads() {
        let claimer = WorkClaimer::new(100);
        let claimed = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while let Some(unit) = claimer.claim() {
                        claimed.lock().unwrap().push(unit);
                    }
                });
            }
        });
        let claimed = claimed.into_inner().unwrap();
        assert_eq!(claimed.len(), 100);
        assert_eq!(claimed.into_iter().collect::<HashSet<_>>().len(), 100);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[test]
    fn test_warnings_collected() {
        let warnings = Warnings::default();
        warnings.push("threads ignored");
        assert_eq!(warnings.snapshot(), ["threads ignored"]);
    }
}
