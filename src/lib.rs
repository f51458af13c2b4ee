//! Weekly QC coaching engine: turns raw evaluation rows into per-agent risk
//! scores, coaching prescriptions and alerts, cached per (agent, week).

pub mod aggregate;
pub mod alert;
pub mod cache;
pub mod coaching;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod period;
pub mod pipeline;
pub mod report;
pub mod risk;
pub mod shrinkage;
pub mod stats;
pub mod store;
pub mod trend;
pub mod weakness;
