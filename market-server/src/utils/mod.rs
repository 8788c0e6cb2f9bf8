//! Utility module
//!
//! - [`AppError`] / [`AppResult`] re-exported from `shared::error`
//! - Logging setup

pub mod logger;

pub use shared::error::{AppError, AppResult, ErrorCategory, ErrorCode};
