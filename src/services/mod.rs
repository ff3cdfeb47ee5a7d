//! Business logic services

pub mod actuals;
pub mod distance_matrix;
pub mod geo;
pub mod historian;
pub mod problem;
pub mod reconciler;
pub mod rest_breaks;
pub mod routing;
pub mod validation;
