//! Alert rule evaluation against freshly scored records

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::models::{AlertNotification, AlertRule, LogRecord, Severity};

struct CompiledRule {
    id: i32,
    name: String,
    floor: Severity,
    pattern: Regex,
}

/// Active rules compiled once per scoring cycle
#[derive(Default)]
pub struct AlertEvaluator {
    rules: Vec<CompiledRule>,
}

impl AlertEvaluator {
    /// Rules whose severity or pattern do not parse are skipped, not fatal.
    pub fn compile(rules: Vec<AlertRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                let floor = match rule.severity.parse::<Severity>() {
                    Ok(floor) => floor,
                    Err(e) => {
                        tracing::warn!("Skipping alert rule {} ({}): {}", rule.id, rule.name, e);
                        return None;
                    }
                };
                let pattern = match Regex::new(&rule.query) {
                    Ok(pattern) => pattern,
                    Err(e) => {
                        tracing::warn!("Skipping alert rule {} ({}): {}", rule.id, rule.name, e);
                        return None;
                    }
                };
                Some(CompiledRule {
                    id: rule.id,
                    name: rule.name,
                    floor,
                    pattern,
                })
            })
            .collect();

        Self { rules }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Notifications for every rule the record trips
    pub fn evaluate(&self, record: &LogRecord, at: DateTime<Utc>) -> Vec<AlertNotification> {
        let Ok(severity) = record.severity() else {
            return Vec::new();
        };

        self.rules
            .iter()
            .filter(|rule| severity.meets(rule.floor) && rule.pattern.is_match(&record.msg))
            .map(|rule| AlertNotification {
                alert_id: rule.id,
                alert_name: rule.name.clone(),
                severity: severity.to_string(),
                log_id: record.id,
                triggered_at: at,
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scoring::tests::record;

    pub(crate) fn rule(id: i32, severity: &str, query: &str) -> AlertRule {
        AlertRule {
            id,
            name: format!("rule-{id}"),
            description: None,
            severity: severity.into(),
            query: query.into(),
            is_active: true,
            created_at: Utc::now(),
            last_triggered: None,
        }
    }

    #[test]
    fn test_invalid_rules_are_skipped() {
        let evaluator = AlertEvaluator::compile(vec![
            rule(1, "error", "disk (full"),
            rule(2, "sometimes", "disk"),
            rule(3, "error", "disk"),
        ]);
        assert_eq!(evaluator.len(), 1);
    }

    #[test]
    fn test_severity_floor() {
        let evaluator = AlertEvaluator::compile(vec![rule(7, "error", "(?i)disk")]);
        let now = Utc::now();

        let hit = record("critical", "Disk full on /var");
        let alerts = evaluator.evaluate(&hit, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_id, 7);
        assert_eq!(alerts[0].severity, "critical");
        assert_eq!(alerts[0].log_id, hit.id);

        // Matches the pattern but is not severe enough
        assert!(evaluator.evaluate(&record("warning", "disk almost full"), now).is_empty());
    }

    #[test]
    fn test_multiple_rules_fire() {
        let evaluator = AlertEvaluator::compile(vec![
            rule(1, "debug", "timeout"),
            rule(2, "error", "upstream"),
            rule(3, "error", "database"),
        ]);
        let alerts = evaluator.evaluate(&record("error", "upstream timeout"), Utc::now());
        let ids: Vec<i32> = alerts.iter().map(|a| a.alert_id).collect();
        assert_eq!(ids, [1, 2]);
    }
}
