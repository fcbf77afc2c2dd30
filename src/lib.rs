//! # fxvolsurf
//!
//! Arbitrage-aware FX implied volatility surfaces from delta quotes.
//!
//! Provides the full pipeline: delta/ATM vol quotes → strike conversion →
//! per-expiry smile calibration (SVI, SABR, Kahalé repair) → Black surface
//! queries → Dupire local volatility → fixed-grid discretization for pricing
//! engines.
//!
//! ## Architecture
//!
//! - **`quotes`** — Delta-quoted vol matrix with live, versioned quote handles
//! - **`delta`** — Spot/forward delta to strike conversion, ATM conventions
//! - **`smile`** — Single-expiry smile models (SVI, SABR, Kahalé no-arbitrage)
//! - **`surface`** — Surface orchestration: quote canonicalization, per-delta
//!   variance curves, cached smile sections
//! - **`local_vol`** — Dupire local volatility with an illegal-value sentinel,
//!   plus a fixed time/strike grid adapter
//! - **`time`** — FX date roll conventions (spot lag, joint calendars)
//!
//! ## Design
//!
//! - **Newtypes for outputs, bare `f64` for inputs.** [`Vol`], [`Variance`],
//!   [`Strike`] wrap return values to prevent accidental mixing. Inputs take
//!   raw `f64` for ergonomics — validation happens inside constructors and
//!   the builder.
//! - **No panics.** Every fallible operation returns [`Result`]. Library code
//!   never calls `unwrap()` or `expect()`.
//! - **Versioned invalidation instead of observers.** Quotes, spot and curves
//!   carry version counters; the surface rebuilds its canonical matrix,
//!   variance curves and smile cache lazily when the combined version moves.
//! - **Thread-safe.** All traits require `Send + Sync`; derived surface state
//!   sits behind a mutex so surfaces can be shared via `Arc` across pricing
//!   threads.
//! - **Serializable.** Model parameter structs implement Serde `Serialize` /
//!   `Deserialize` with validation on deserialization where invariants exist
//!   (SVI, SABR, Kahalé).

mod cache;
pub mod curve;
pub mod delta;
pub mod error;
pub mod implied;
pub mod local_vol;
mod math;
mod optim;
pub mod quotes;
pub mod smile;
pub mod surface;
pub mod time;
pub mod types;
mod validate;

#[doc(inline)]
pub use error::{FxVolError, Result};
#[doc(inline)]
pub use local_vol::{DupireLocalVol, FixedLocalVolGrid, GridSpec, LocalVol};
#[doc(inline)]
pub use optim::Termination;
#[doc(inline)]
pub use quotes::{AtmType, DeltaType, DeltaVolMatrix, DeltaVolQuote, VersionedQuote};
#[doc(inline)]
pub use smile::{FxSmile, SmileSection};
#[doc(inline)]
pub use surface::{FxBlackVolatilitySurface, FxSurfaceBuilder, SmileStrategy, VolSurface};
#[doc(inline)]
pub use time::{BusinessDayConvention, Calendar, DayCounter, Period, TimeUnit};
#[doc(inline)]
pub use types::{OptionType, Strike, Variance, Vol};
