pub mod api;
pub mod normalize;
pub mod snapshot;
pub mod types;
