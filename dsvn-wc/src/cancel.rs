//! Cooperative cancellation for long-running operations

use crate::error::{Result, WcError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait Cancel {
    /// `Err(WcError::Cancelled)` once the operation should stop
    fn check(&self) -> Result<()>;
}

impl<F> Cancel for F
where
    F: Fn() -> bool,
{
    fn check(&self) -> Result<()> {
        if self() { Err(WcError::Cancelled) } else { Ok(()) }
    }
}

/// Shareable flag, e.g. flipped from a signal handler
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Cancel for CancelFlag {
    fn check(&self) -> Result<()> {
        if self.is_cancelled() { Err(WcError::Cancelled) } else { Ok(()) }
    }
}

pub fn check_cancel(cancel: Option<&dyn Cancel>) -> Result<()> {
    match cancel {
        Some(c) => c.check(),
        None => Ok(()),
    }
}
