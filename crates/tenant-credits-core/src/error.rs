//! Domain error type.

use crate::ids::IdError;

/// Result type for credit and entitlement operations.
pub type Result<T> = std::result::Result<T, CreditError>;

/// Errors raised by the credits subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    /// The balance cannot cover the requested spend. User-correctable.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Credits the operation needed.
        required: i64,
    },

    /// No authenticated user or no verified email.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The payment provider or the store could not be reached.
    #[error("provider unavailable: {service} - {message}")]
    ProviderUnavailable {
        /// Which collaborator failed.
        service: String,
        /// Error message.
        message: String,
    },

    /// A referral code resolves to no user.
    #[error("invalid referral code: {0}")]
    InvalidReferralCode(String),

    /// A reward already exists for the referred user.
    #[error("referral reward already granted for {referred_user_id}")]
    DuplicateReward {
        /// The referred user.
        referred_user_id: String,
    },

    /// The provider returned a price id missing from the price table.
    #[error("unknown price id: {0}")]
    UnknownPrice(String),

    /// Negative or otherwise unusable credit amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
