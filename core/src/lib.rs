//! Node power-lifecycle orchestration for Cray KNL clusters.
//!
//! Decodes a hostname-range expression into a node id set, drives the capmc
//! control plane to reconfigure and reboot the nodes, polls until they come
//! back on, and compensates (job requeue, node state revert) when the
//! transition fails.

pub mod capmc;
pub mod cli;
pub mod config;
pub mod logger;
pub mod nidset;
pub mod orchestrator;
pub mod slurm;
