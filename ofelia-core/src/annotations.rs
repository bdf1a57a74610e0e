//! Key=value annotation parsing and per-run default injection
//!
//! Annotations ride along on container labels and exec metadata. They are
//! plain `key=value` strings; the first `=` splits key from value, so a
//! value is free to contain more of them. A handful of defaults get
//! injected on every run and are overridden by a user-supplied key of the
//! same name.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Keys injected into every execution's annotation set before user
/// annotations are merged in.
pub const KEY_JOB_NAME: &str = "ofelia.job.name";
pub const KEY_JOB_TYPE: &str = "ofelia.job.type";
pub const KEY_EXECUTION_TIME: &str = "ofelia.execution.time";
pub const KEY_SCHEDULER_HOST: &str = "ofelia.scheduler.host";
pub const KEY_VERSION: &str = "ofelia.version";

/// The running binary's version, injected as `ofelia.version`.
pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse a list of raw `key=value` strings into an ordered map. Keys are
/// trimmed of surrounding whitespace; values are preserved verbatim,
/// including any further `=` characters. An entry with no `=` is skipped.
pub fn parse(raw: &[String]) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    for entry in raw {
        if let Some((key, value)) = entry.split_once('=') {
            annotations.insert(key.trim().to_string(), value.to_string());
        }
    }
    annotations
}

/// Render an annotation map back to `key=value` strings, sorted by key.
pub fn format(annotations: &BTreeMap<String, String>) -> Vec<String> {
    annotations.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Build the default annotation set for one execution, then merge in
/// `user` annotations, letting user keys win on collision.
pub fn with_defaults(
    job_name: &str,
    job_type: &str,
    execution_time: DateTime<Utc>,
    scheduler_host: &str,
    user: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(KEY_JOB_NAME.to_string(), job_name.to_string());
    annotations.insert(KEY_JOB_TYPE.to_string(), job_type.to_string());
    annotations.insert(KEY_EXECUTION_TIME.to_string(), execution_time.to_rfc3339());
    annotations.insert(KEY_SCHEDULER_HOST.to_string(), scheduler_host.to_string());
    annotations.insert(KEY_VERSION.to_string(), CRATE_VERSION.to_string());

    for (key, value) in user {
        annotations.insert(key.clone(), value.clone());
    }
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_equals_splits_key_from_value() {
        let raw = vec!["retries=3=backoff".to_string()];
        let parsed = parse(&raw);
        assert_eq!(parsed.get("retries").map(String::as_str), Some("3=backoff"));
    }

    #[test]
    fn keys_are_trimmed_values_are_not() {
        let raw = vec![" team = payments ".to_string()];
        let parsed = parse(&raw);
        assert_eq!(parsed.get("team").map(String::as_str), Some(" payments "));
    }

    #[test]
    fn entries_without_equals_are_skipped() {
        let raw = vec!["just-a-flag".to_string(), "k=v".to_string()];
        let parsed = parse(&raw);
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn parse_then_format_round_trips() {
        let raw = vec!["a=1".to_string(), "b=2".to_string()];
        let parsed = parse(&raw);
        let mut formatted = format(&parsed);
        formatted.sort();
        assert_eq!(formatted, vec!["a=1".to_string(), "b=2".to_string()]);
    }

    #[test]
    fn user_annotation_overrides_default_on_key_collision() {
        let mut user = BTreeMap::new();
        user.insert(KEY_JOB_NAME.to_string(), "overridden".to_string());

        let annotations = with_defaults("job", "local", Utc::now(), "host-1", &user);
        assert_eq!(annotations.get(KEY_JOB_NAME).map(String::as_str), Some("overridden"));
    }

    #[test]
    fn defaults_present_when_no_user_override() {
        let annotations = with_defaults("job", "local", Utc::now(), "host-1", &BTreeMap::new());
        assert_eq!(annotations.get(KEY_JOB_TYPE).map(String::as_str), Some("local"));
        assert!(annotations.contains_key(KEY_EXECUTION_TIME));
        assert_eq!(annotations.get(KEY_SCHEDULER_HOST).map(String::as_str), Some("host-1"));
        assert_eq!(annotations.get(KEY_VERSION).map(String::as_str), Some(CRATE_VERSION));
    }
}
