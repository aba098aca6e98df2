//! HTTP handlers

pub mod health;
pub mod logs;
pub mod anomalies;
pub mod patterns;
pub mod alerts;
pub mod stream;
