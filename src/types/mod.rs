//! Type definitions

pub mod distance;
pub mod ids;
pub mod location;
pub mod phase;
pub mod problem;
pub mod settings;
pub mod snapshot;

pub use distance::*;
pub use ids::*;
pub use location::*;
pub use phase::*;
pub use problem::*;
pub use settings::*;
pub use snapshot::*;
