pub mod artifacts;
pub mod batch;
pub mod cache;
pub mod classifier;
pub mod geometry;
pub mod tracker;
pub mod transport;
