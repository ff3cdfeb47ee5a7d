//! Database queries

pub mod distance;
pub mod location;
pub mod provider_health;
pub mod visit_phase;
