use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::KiraError;

/// Run-wide cancellation flag with an optional deadline.
///
/// Clones share the flag, so a signal handler can hold one copy while workers
/// poll another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: timeout.map(|value| Instant::now() + value),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    pub fn check(&self, during: &str) -> Result<(), KiraError> {
        if self.is_cancelled() {
            return Err(KiraError::Cancelled(format!("cancelled during {during}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(token.check("fetch").is_err());
    }

    #[test]
    fn elapsed_deadline_cancels() {
        let token = CancelToken::with_timeout(Some(Duration::ZERO));
        assert!(token.is_cancelled());
    }
}
