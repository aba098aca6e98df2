//! Typed search predicates compiled to a parameterized query.
//!
//! User input only ever reaches PostgreSQL through `push_bind`, so the SQL
//! text is fixed by the set of predicates, never by their values.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use crate::models::{LogSearch, Severity, LOG_COLUMNS};

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Since(DateTime<Utc>),
    Until(DateTime<Utc>),
    Host(String),
    App(String),
    Severity(Severity),
    /// Case-insensitive substring match
    MessageContains(String),
    /// POSIX regular expression match
    MessageMatches(String),
    Anomalous,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid message pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogFilter {
    predicates: Vec<Predicate>,
    limit: i64,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            limit: Self::MAX_LIMIT,
        }
    }
}

impl LogFilter {
    pub const MAX_LIMIT: i64 = 1000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit.clamp(1, Self::MAX_LIMIT);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Translate a search request, rejecting patterns that cannot compile.
    pub fn from_search(search: &LogSearch) -> Result<Self, FilterError> {
        let mut filter = LogFilter::new();

        if let Some(start) = search.start_date {
            filter = filter.with(Predicate::Since(start));
        }
        if let Some(end) = search.end_date {
            filter = filter.with(Predicate::Until(end));
        }
        if let Some(host) = &search.host {
            filter = filter.with(Predicate::Host(host.clone()));
        }
        if let Some(app) = &search.app {
            filter = filter.with(Predicate::App(app.clone()));
        }
        if let Some(severity) = search.severity {
            filter = filter.with(Predicate::Severity(severity));
        }
        if let Some(message) = &search.message {
            if search.use_regex {
                regex::Regex::new(message)?;
                filter = filter.with(Predicate::MessageMatches(message.clone()));
            } else {
                filter = filter.with(Predicate::MessageContains(message.clone()));
            }
        }
        if search.anomalies_only {
            filter = filter.with(Predicate::Anomalous);
        }

        Ok(filter.limit(search.limit.unwrap_or(Self::MAX_LIMIT)))
    }

    /// `SELECT … WHERE … ORDER BY ts DESC LIMIT …`
    pub fn select_query(&self) -> QueryBuilder<'_, Postgres> {
        let mut query = QueryBuilder::new(format!("SELECT {LOG_COLUMNS} FROM logs"));
        self.push_where(&mut query);
        query.push(" ORDER BY ts DESC LIMIT ").push_bind(self.limit);
        query
    }

    fn push_where<'a>(&'a self, query: &mut QueryBuilder<'a, Postgres>) {
        for (i, predicate) in self.predicates.iter().enumerate() {
            query.push(if i == 0 { " WHERE " } else { " AND " });
            match predicate {
                Predicate::Since(ts) => query.push("ts >= ").push_bind(*ts),
                Predicate::Until(ts) => query.push("ts <= ").push_bind(*ts),
                Predicate::Host(host) => query.push("host = ").push_bind(host.as_str()),
                Predicate::App(app) => query.push("app = ").push_bind(app.as_str()),
                Predicate::Severity(sev) => query.push("severity = ").push_bind(sev.as_str()),
                Predicate::MessageContains(text) => query
                    .push("msg ILIKE ")
                    .push_bind(like_pattern(text))
                    .push(" ESCAPE '\\'"),
                Predicate::MessageMatches(pattern) => query.push("msg ~ ").push_bind(pattern.as_str()),
                Predicate::Anomalous => query.push("is_anomaly = true"),
            };
        }
    }
}

/// Wrap in `%…%`, escaping LIKE metacharacters so they match literally
fn like_pattern(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}
