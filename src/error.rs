use core::fmt;
use std::{error, io};

use backtrace::Backtrace;

use crate::types::TxnId;

/// Why the lock manager aborted a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    IncompatibleUpgrade,
    AttemptedIntentionLockOnRow,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
    TableLockNotPresent,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// All frames are pinned, nothing can be evicted.
    BufferPoolFull,
    Io,
    /// A page's bytes do not decode to what the caller expected.
    Corrupted,
    /// An executor failed at an `init`/`next` boundary.
    Execution,
    TransactionAborted { txn_id: TxnId, reason: AbortReason },
}

pub struct Error {
    kind: ErrorKind,
    details: String,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: &str) -> Error {
        let bt = Backtrace::new();
        let details = format!("msg: [{}]\nerror backtrace:\n{:?}", msg, bt);
        Error { kind, details }
    }

    pub fn buffer_pool_full() -> Error {
        Error::new(ErrorKind::BufferPoolFull, "all frames are pinned")
    }

    pub fn corrupted(msg: &str) -> Error {
        Error::new(ErrorKind::Corrupted, msg)
    }

    pub fn execution(msg: &str) -> Error {
        Error::new(ErrorKind::Execution, msg)
    }

    pub fn abort(txn_id: TxnId, reason: AbortReason) -> Error {
        Error::new(
            ErrorKind::TransactionAborted { txn_id, reason },
            &format!("tx_{} aborted: {}", txn_id, reason),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The abort reason, if this error is a transaction abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self.kind {
            ErrorKind::TransactionAborted { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn show_backtrace(&self) {
        println!("{}", self.details);
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.details)
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::new(ErrorKind::Io, &format!("io error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_error_carries_reason() {
        let err = Error::abort(7, AbortReason::UpgradeConflict);
        assert_eq!(err.abort_reason(), Some(AbortReason::UpgradeConflict));
        assert_eq!(
            err.kind(),
            ErrorKind::TransactionAborted {
                txn_id: 7,
                reason: AbortReason::UpgradeConflict
            }
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::buffer_pool_full();
        assert!(format!("{}", err).contains("all frames are pinned"));
    }
}
