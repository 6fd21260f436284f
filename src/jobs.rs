pub mod engine;
pub mod merge;
pub mod registry;
