//! Reconciliation Module
//!
//! Background repair for the best-effort notification path. The reconciler
//! re-broadcasts recent ledger state on a timer; the sweeper evicts dead
//! and never-authenticated connections.

pub mod reconciler;
pub mod sweeper;

pub use reconciler::Reconciler;
pub use sweeper::ConnectionSweeper;
