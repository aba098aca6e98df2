//! Message canonicalization and matcher reconstruction
//!
//! Variable substrings are replaced by placeholder tokens in a fixed order.
//! Each placeholder keeps the sub-pattern that produced it, so a template can
//! be turned back into an anchored matcher. Sub-patterns use only syntax that
//! Rust `regex` and PostgreSQL `~` agree on: explicit classes, no `\d`, no `\b`.

use once_cell::sync::Lazy;
use regex::Regex;

use super::PatternError;

struct Placeholder {
    token: &'static str,
    pattern: &'static str,
}

/// Applied top to bottom. No token contains a digit, so later rules never
/// re-match an earlier replacement and canonical output is a fixed point.
/// A raw message may already contain token text, so a rebuilt slot accepts
/// the literal token as well as the sub-pattern.
const PLACEHOLDERS: [Placeholder; 5] = [
    Placeholder {
        token: "<IP_ADDRESS>",
        pattern: r"(?:[0-9]{1,3}\.){3}[0-9]{1,3}",
    },
    Placeholder {
        token: "<UUID>",
        pattern: r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    },
    Placeholder {
        token: "<TIMESTAMP>",
        pattern: r"[0-9]{4}-[0-9]{2}-[0-9]{2}[T ][0-9]{2}:[0-9]{2}:[0-9]{2}(?:\.[0-9]+)?(?:Z|[+-][0-9]{2}:?[0-9]{2})?",
    },
    Placeholder {
        token: "<HEX_VALUE>",
        pattern: r"0[xX][0-9a-fA-F]+",
    },
    Placeholder {
        token: "<NUMBER>",
        pattern: r"[0-9]+",
    },
];

static COMPILED: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    PLACEHOLDERS
        .iter()
        .map(|p| (p.token, Regex::new(p.pattern).expect("placeholder pattern")))
        .collect()
});

/// Reduce a message to its template
pub fn canonicalize(message: &str) -> String {
    let mut template = message.to_string();
    for (token, re) in COMPILED.iter() {
        if re.is_match(&template) {
            template = re.replace_all(&template, *token).into_owned();
        }
    }
    template
}

/// Anchored matcher accepting every message that canonicalizes to `template`.
/// Literal text is escaped; placeholders become their sub-patterns or the
/// token itself.
pub fn matcher_for(template: &str) -> Result<String, PatternError> {
    let mut matcher = String::with_capacity(template.len() * 2 + 2);
    matcher.push('^');

    let mut rest = template;
    while !rest.is_empty() {
        let next = PLACEHOLDERS
            .iter()
            .filter_map(|p| rest.find(p.token).map(|at| (at, p)))
            .min_by_key(|(at, _)| *at);

        match next {
            Some((at, placeholder)) => {
                matcher.push_str(&regex::escape(&rest[..at]));
                matcher.push_str("(?:");
                matcher.push_str(placeholder.pattern);
                matcher.push('|');
                matcher.push_str(&regex::escape(placeholder.token));
                matcher.push(')');
                rest = &rest[at + placeholder.token.len()..];
            }
            None => {
                matcher.push_str(&regex::escape(rest));
                break;
            }
        }
    }
    matcher.push('$');

    Regex::new(&matcher)?;
    Ok(matcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_and_number() {
        assert_eq!(
            canonicalize("Connection timeout to 192.168.1.5 after 30 retries"),
            "Connection timeout to <IP_ADDRESS> after <NUMBER> retries"
        );
        assert_eq!(
            canonicalize("Connection from 10.0.0.5 failed after 3 retries"),
            "Connection from <IP_ADDRESS> failed after <NUMBER> retries"
        );
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            canonicalize("req 550e8400-e29b-41d4-a716-446655440000 at 2024-03-01T12:30:45.123Z"),
            "req <UUID> at <TIMESTAMP>"
        );
        assert_eq!(
            canonicalize("fault at 0xDEADbeef code 42"),
            "fault at <HEX_VALUE> code <NUMBER>"
        );
        assert_eq!(
            canonicalize("started 2024-03-01 08:00:00+02:00 on 192.168.1.20:8080"),
            "started <TIMESTAMP> on <IP_ADDRESS>:<NUMBER>"
        );
    }

    #[test]
    fn test_canonical_form_is_fixed_point() {
        for msg in [
            "user 42 logged in from 10.1.2.3",
            "trace 123e4567-e89b-12d3-a456-426614174000 took 15ms",
            "ptr=0x7ffd at 2023-11-05T01:02:03Z",
            "no variables here",
            "",
        ] {
            let once = canonicalize(msg);
            assert_eq!(canonicalize(&once), once, "{msg}");
        }
    }

    #[test]
    fn test_matcher_accepts_source_messages() {
        for msg in [
            "Connection from 10.0.0.5 failed after 3 retries",
            "GET /api/v1/items?id=7 (took 0.25s) [worker-3]",
            "fault at 0xdeadbeef, code 42",
            "job 123e4567-e89b-12d3-a456-426614174000 done at 2024-01-01 00:00:00",
        ] {
            let matcher = matcher_for(&canonicalize(msg)).unwrap();
            assert!(Regex::new(&matcher).unwrap().is_match(msg), "{matcher} vs {msg}");
        }
    }

    #[test]
    fn test_matcher_is_anchored() {
        let re = Regex::new(&matcher_for("disk <NUMBER> full").unwrap()).unwrap();
        assert!(re.is_match("disk 3 full"));
        assert!(!re.is_match("warning: disk 3 full"));
        assert!(!re.is_match("disk 3 full again"));
        assert!(!re.is_match("disk x full"));
    }

    #[test]
    fn test_matcher_escapes_literals() {
        let matcher = matcher_for("a.b (c) <NUMBER>").unwrap();
        assert_eq!(matcher, r"^a\.b \(c\) (?:[0-9]+|<NUMBER>)$");
        let re = Regex::new(&matcher).unwrap();
        assert!(!re.is_match("aXb (c) 1"));
    }

    #[test]
    fn test_matcher_accepts_literal_token_text() {
        let msg = "literal <NUMBER> then 5";
        let template = canonicalize(msg);
        assert_eq!(template, "literal <NUMBER> then <NUMBER>");

        let re = Regex::new(&matcher_for(&template).unwrap()).unwrap();
        assert!(re.is_match(msg));
        assert!(re.is_match("literal 4 then 5"));
        assert!(!re.is_match("literal <IP_ADDRESS> then 5"));
    }

    #[test]
    fn test_matcher_avoids_unportable_escapes() {
        let matcher = matcher_for(&canonicalize("x 1.2.3.4 0xff 2024-01-01T00:00:00Z 9")).unwrap();
        assert!(!matcher.contains(r"\d"));
        assert!(!matcher.contains(r"\b"));
    }
}
