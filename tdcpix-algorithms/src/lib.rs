//! tdcpix-algorithms: Reductions over tdcpix histograms.
//!
//! - **Projections** - sum an x/y/t cube along one or two axes into an
//!   image or a time spectrum
//! - **Auto-binning** - shrink a spectrum to a preview width
//!
#![warn(missing_docs)]

mod autobin;
mod projection;

pub use autobin::autobin_spectrum;
pub use projection::{clamp_bounds, project_time, project_x, project_xy, project_y};
