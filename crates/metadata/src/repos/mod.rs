//! Repository traits for the metadata store.

pub mod nodes;

pub use nodes::{NodeQuery, NodeRepo, Visibility};
