//! HTTP handlers

pub mod health;
pub mod findings;
pub mod correlations;
pub mod alerts;
