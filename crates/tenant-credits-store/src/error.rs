//! Error types for tenant credits storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// Insufficient credits for a debit. Nothing was written.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// A referral reward already exists for the referred user. Nothing was written.
    #[error("duplicate referral reward for {referred_user_id}")]
    DuplicateReward {
        /// The referred user.
        referred_user_id: String,
    },

    /// A credit would push the balance past what it can hold. Nothing was written.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A unique key is already taken.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: String::new(),
            },
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<tenant_credits_core::CreditError> for StoreError {
    fn from(err: tenant_credits_core::CreditError) -> Self {
        match err {
            tenant_credits_core::CreditError::InvalidAmount(msg) => Self::InvalidAmount(msg),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<StoreError> for tenant_credits_core::CreditError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::DuplicateReward { referred_user_id } => {
                Self::DuplicateReward { referred_user_id }
            }
            StoreError::InvalidAmount(msg) => Self::InvalidAmount(msg),
            StoreError::Database(msg) => Self::ProviderUnavailable {
                service: "store".into(),
                message: msg,
            },
            other => Self::Storage(other.to_string()),
        }
    }
}
