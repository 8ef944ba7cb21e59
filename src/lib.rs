mod acquisition;
mod averager;
mod config;
mod device;
mod error;
mod model;
mod plan;
mod pool;
mod postproc;
mod sim;
mod stats;
pub mod tui;

pub use acquisition::*;
pub use averager::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use model::*;
pub use plan::*;
pub use pool::*;
pub use postproc::*;
pub use sim::*;
pub use stats::*;
