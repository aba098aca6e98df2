//! Pattern mining result types

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::LogRecord;

#[derive(Debug, Clone, Serialize)]
pub struct PatternTemplate {
    pub template: String,
    pub count: usize,
    pub examples: Vec<LogRecord>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PatternQuery {
    /// Number of most recent messages to scan
    #[validate(range(min = 1, max = 100000))]
    pub window: Option<i64>,
    /// Templates to return
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<usize>,
    /// Examples per template
    #[validate(range(min = 0, max = 20))]
    pub examples: Option<i64>,
}
