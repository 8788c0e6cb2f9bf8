//! Unified error codes for the market server
//!
//! Error codes are shared between the server and connected clients so error
//! frames carry a stable, language-neutral identifier. Codes are organized
//! by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 4xxx: Order errors
//! - 6xxx: Product / stock errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility (Rust, TypeScript, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 1xxx: Auth ====================
    /// Connection is not authenticated
    NotAuthenticated = 1001,
    /// Invalid credentials
    InvalidCredentials = 1002,
    /// Authentication grace period elapsed
    AuthTimeout = 1005,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Admin role required
    AdminRequired = 2003,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Order is not in a cancellable state
    OrderNotPending = 4002,
    /// Order has no line items
    OrderEmpty = 4007,
    /// Checkout did not complete within the allowed time
    CheckoutTimeout = 4008,

    // ==================== 6xxx: Product / Stock ====================
    /// Product not found
    ProductNotFound = 6001,
    /// Product has an invalid price
    ProductInvalidPrice = 6002,
    /// A concurrent reservation consumed the needed stock
    StockConflict = 6003,
    /// Product is not active
    ProductInactive = 6004,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Client channel closed or not writable
    ChannelClosed = 9003,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the default human-readable message for this code
    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => "OK",
            Self::Unknown => "Unknown error",
            Self::ValidationFailed => "Validation failed",
            Self::NotFound => "Resource not found",
            Self::AlreadyExists => "Resource already exists",
            Self::InvalidRequest => "Invalid request",
            Self::ValueOutOfRange => "Value out of range",

            Self::NotAuthenticated => "Authentication required",
            Self::InvalidCredentials => "Invalid credentials",
            Self::AuthTimeout => "Authentication grace period elapsed",

            Self::PermissionDenied => "Permission denied",
            Self::AdminRequired => "Admin role required",

            Self::OrderNotFound => "Order not found",
            Self::OrderNotPending => "Order is not pending",
            Self::OrderEmpty => "Order has no line items",
            Self::CheckoutTimeout => "Checkout timed out",

            Self::ProductNotFound => "Product not found",
            Self::ProductInvalidPrice => "Invalid product price",
            Self::StockConflict => "Insufficient stock",
            Self::ProductInactive => "Product is not active",

            Self::InternalError => "Internal server error",
            Self::DatabaseError => "Database error",
            Self::ChannelClosed => "Client channel closed",
        }
    }

    /// Get the category for this error code
    pub fn category(&self) -> super::ErrorCategory {
        super::ErrorCategory::from_code(self.code())
    }

    /// Whether a caller may retry the failed operation with fresh data
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StockConflict | Self::CheckoutTimeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        code.code()
    }
}

/// Error returned when converting an unknown u16 into an [`ErrorCode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Success,
            1 => Self::Unknown,
            2 => Self::ValidationFailed,
            3 => Self::NotFound,
            4 => Self::AlreadyExists,
            5 => Self::InvalidRequest,
            8 => Self::ValueOutOfRange,

            1001 => Self::NotAuthenticated,
            1002 => Self::InvalidCredentials,
            1005 => Self::AuthTimeout,

            2001 => Self::PermissionDenied,
            2003 => Self::AdminRequired,

            4001 => Self::OrderNotFound,
            4002 => Self::OrderNotPending,
            4007 => Self::OrderEmpty,
            4008 => Self::CheckoutTimeout,

            6001 => Self::ProductNotFound,
            6002 => Self::ProductInvalidPrice,
            6003 => Self::StockConflict,
            6004 => Self::ProductInactive,

            9001 => Self::InternalError,
            9002 => Self::DatabaseError,
            9003 => Self::ChannelClosed,

            other => return Err(InvalidErrorCode(other)),
        };
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in [
            ErrorCode::ValidationFailed,
            ErrorCode::StockConflict,
            ErrorCode::NotAuthenticated,
            ErrorCode::AdminRequired,
            ErrorCode::DatabaseError,
        ] {
            let raw = code.code();
            assert_eq!(ErrorCode::try_from(raw), Ok(code));
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert_eq!(ErrorCode::try_from(7777), Err(InvalidErrorCode(7777)));
    }

    #[test]
    fn test_stock_conflict_is_retryable() {
        assert!(ErrorCode::StockConflict.is_retryable());
        assert!(!ErrorCode::ValidationFailed.is_retryable());
    }
}
