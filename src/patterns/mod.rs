//! Pattern mining over a window of recent messages

use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;

use crate::config::PatternConfig;
use crate::error::StoreError;
use crate::models::{LogRecord, PatternTemplate};
use crate::store::RecordStore;

pub mod canonical;

pub use canonical::{canonicalize, matcher_for};

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("invalid matcher: {0}")]
    InvalidMatcher(#[from] regex::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct PatternMiner {
    store: Arc<dyn RecordStore>,
    config: PatternConfig,
}

impl PatternMiner {
    pub fn new(store: Arc<dyn RecordStore>, config: PatternConfig) -> Self {
        Self { store, config }
    }

    pub fn defaults(&self) -> &PatternConfig {
        &self.config
    }

    /// Top `limit` templates among the `window` most recent messages, each
    /// with up to `examples` matching records. Only the window read can fail;
    /// a template whose examples cannot be resolved gets none.
    pub async fn mine(
        &self,
        window: i64,
        limit: usize,
        examples: i64,
    ) -> Result<Vec<PatternTemplate>, PatternError> {
        let messages = self.store.recent_messages(window).await?;
        let ranked = rank(&messages, limit);

        tracing::debug!(
            "Mined {} messages into {} top templates",
            messages.len(),
            ranked.len()
        );

        let resolved = join_all(
            ranked
                .iter()
                .map(|(template, _)| self.examples_for(template, examples)),
        )
        .await;

        Ok(ranked
            .into_iter()
            .zip(resolved)
            .map(|((template, count), examples)| PatternTemplate {
                template,
                count,
                examples,
            })
            .collect())
    }

    async fn examples_for(&self, template: &str, limit: i64) -> Vec<LogRecord> {
        if limit <= 0 {
            return Vec::new();
        }

        let matcher = match matcher_for(template) {
            Ok(matcher) => matcher,
            Err(e) => {
                tracing::warn!("Cannot rebuild matcher for '{}': {}", template, e);
                return Vec::new();
            }
        };

        match self.store.find_matching(&matcher, limit).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Example lookup failed for '{}': {}", template, e);
                Vec::new()
            }
        }
    }
}

/// Count templates in first-seen order, then stable-sort by count so ties
/// keep that order.
pub fn rank(messages: &[String], limit: usize) -> Vec<(String, usize)> {
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for message in messages {
        *counts.entry(canonicalize(message)).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(limit);
    ranked
}
