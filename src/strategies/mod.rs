//! Strategy controllers
//!
//! Each controller owns its bookkeeping exclusively and reaches the exchange
//! through a shared [`Gateway`](crate::gateway::Gateway) handle.

pub mod grid;
pub mod oco;
pub mod schedule;
pub mod twap;

pub use grid::{GridConfig, GridController, GridParams, GridSummary};
pub use oco::{OcoController, OcoGroup, OcoState};
pub use twap::{TwapController, TwapPricing, TwapReport, TwapRequest};

/// Why a monitor loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The cancellation token fired
    Cancelled,
    /// The configured maximum runtime elapsed
    MaxRuntime,
    /// Nothing left to monitor
    Completed,
}
