//! Cooperative cancellation for long-running fits.
//!
//! A token is handed to a fit and checked at stage boundaries (the
//! fork-join barriers). Dropping a session cancels its token; the fit
//! notices at the next barrier, unwinds with a `Cancelled` error, and the
//! caller discards the partial state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Errors out when the token was cancelled; called at barriers.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(format!("{what} was cancelled")))
        } else {
            Ok(())
        }
    }
}

/// Sets the token when dropped, unless disarmed. Used by connection
/// handlers so an abandoned session cancels its running fit.
pub struct CancelOnDrop {
    token: CancelToken,
    armed: bool,
}

impl CancelOnDrop {
    pub fn new(token: CancelToken) -> Self {
        CancelOnDrop { token, armed: true }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_check() {
        let token = CancelToken::new();
        assert!(token.check("fit").is_ok());
        token.cancel();
        let err = token.check("fit").unwrap_err();
        assert_eq!(err.tag(), "Cancelled");
    }

    #[test]
    fn test_cancel_on_drop() {
        let token = CancelToken::new();
        {
            let _guard = CancelOnDrop::new(token.clone());
        }
        assert!(token.is_cancelled());

        let token2 = CancelToken::new();
        {
            let mut guard = CancelOnDrop::new(token2.clone());
            guard.disarm();
        }
        assert!(!token2.is_cancelled());
    }
}
