//! Local volatility derived from the implied surface.
//!
//! [`DupireLocalVol`] differentiates a Black variance surface per the Dupire
//! relation; numerical arbitrage shows up as a caller-chosen sentinel value
//! instead of an error. [`FixedLocalVolGrid`] snapshots a local-vol surface
//! onto a fixed time/strike mesh for cheap repeated lookups.

pub mod dupire;
pub mod fixed_grid;

pub use dupire::DupireLocalVol;
pub use fixed_grid::{FixedLocalVolGrid, GridSpec};

use crate::error::Result;
use crate::types::Vol;

/// Instantaneous volatility queryable by time and underlying level.
pub trait LocalVol: Send + Sync {
    /// Local volatility at `(t, level)`.
    ///
    /// Implementations may report numerical no-arbitrage violations through
    /// an in-band sentinel value rather than an error; see
    /// [`DupireLocalVol::illegal_value`].
    fn local_vol(&self, t: f64, level: f64) -> Result<Vol>;
}
