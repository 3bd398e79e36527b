//! Trains a regression model per condition-segment of historically comparable races and scores
//! each runner's engineered feature vector ("seed") against it, producing ranked pick-groups with
//! a confidence figure. Models are trained at most once per segment per processing batch and
//! served to concurrent workers from a single-flight cache.

pub mod batch;
pub mod cache;
pub mod data;
pub mod model;
pub mod normalize;
pub mod predict;
pub mod report;
pub mod seed;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

#[doc = include_str!("../README.md")]
#[cfg(doc)]
fn readme() {}
