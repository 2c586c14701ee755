//! Actor implementations

pub mod cluster;

pub use cluster::{ClusterActor, ClusterActorArgs};
