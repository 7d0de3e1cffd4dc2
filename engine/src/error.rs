use thiserror::Error;

/// Bad input, rejected before any state is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(f64),
    #[error("invalid price {0}")]
    InvalidPrice(f64),
    #[error("unsupported leverage {0}x")]
    InvalidLeverage(u32),
    #[error("chat message is empty")]
    EmptyMessage,
    #[error("chat message too long: {len} chars, max {max}")]
    MessageTooLong { len: usize, max: usize },
    #[error("match duration must be positive")]
    InvalidDuration,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("insufficient cash: needed {needed}, have {available}")]
    InsufficientCash { needed: f64, available: f64 },
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("session is full")]
    SessionFull,
    #[error("match already finished")]
    AlreadyFinished,
    #[error("match has not started")]
    NotStarted,
    #[error("player {0} is not in this session")]
    PlayerNotFound(String),
    #[error("player {0} already joined")]
    AlreadyJoined(String),
    #[error("only the host may drive the match clock")]
    NotHost,
    #[error("session {0} already exists")]
    DuplicateSession(String),
    #[error("gave up after {attempts} conflicting writes")]
    Contention { attempts: u32 },
}

impl LedgerError {
    /// Whether the caller may reasonably resubmit the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Contention { .. })
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
