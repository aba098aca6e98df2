//! Data models

pub mod log_record;
pub mod anomaly;
pub mod pattern;
pub mod alert;

pub use log_record::*;
pub use anomaly::*;
pub use pattern::*;
pub use alert::*;
