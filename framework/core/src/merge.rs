//! Pure merge rules for results and metrics.
//!
//! All provenance tagging lives here: await-joins tag child entries with
//! `{async, key, value}`, and cross-session merges overlay the originating
//! session name. Nothing else in the crate is allowed to tag.

use std::{collections::VecDeque, hash::Hash};

use crate::{
    session::Session,
    value::{ActionKey, MetricKey, Recorded, RecordedSeries},
};

/// Coalesce `from` into `into`. Per key, merged-in entries come first and
/// existing entries keep their relative order after them.
pub fn merge_series<K>(into: &mut RecordedSeries<K>, from: RecordedSeries<K>)
where
    K: Eq + Hash,
{
    for (key, mut incoming) in from {
        if let Some(existing) = into.remove(&key) {
            incoming.extend(existing);
        }
        into.insert(key, incoming);
    }
}

/// Coalesce a result map into a session's results.
pub fn merge_results(session: &mut Session, from: RecordedSeries<ActionKey>) {
    merge_series(session.results_mut(), from);
}

/// Coalesce a metric map into a session's metrics.
pub fn merge_metrics(session: &mut Session, from: RecordedSeries<MetricKey>) {
    merge_series(session.metrics_mut(), from);
}

/// Rewrite a joined child's results for the parent: every entry `(k, v)`
/// becomes `{async, k, v}` under the awaited task name.
pub fn tag_results(name: &str, results: RecordedSeries<ActionKey>) -> RecordedSeries<ActionKey> {
    let mut tagged: VecDeque<Recorded<ActionKey>> = VecDeque::new();
    for (key, entries) in results {
        for entry in entries {
            tagged.push_back(Recorded::Async {
                key: key.clone(),
                value: Box::new(entry),
            });
        }
    }

    let mut out = RecordedSeries::new();
    if !tagged.is_empty() {
        out.insert(
            ActionKey::Task {
                name: name.to_owned(),
            },
            tagged,
        );
    }
    out
}

/// Rewrite a joined child's metrics the same way, under a metric series
/// named after the task.
pub fn tag_metrics(name: &str, metrics: RecordedSeries<MetricKey>) -> RecordedSeries<MetricKey> {
    let mut tagged: VecDeque<Recorded<MetricKey>> = VecDeque::new();
    for (key, entries) in metrics {
        for entry in entries {
            tagged.push_back(Recorded::Async {
                key: key.clone(),
                value: Box::new(entry),
            });
        }
    }

    let mut out = RecordedSeries::new();
    if !tagged.is_empty() {
        out.insert(MetricKey::Custom(name.to_owned()), tagged);
    }
    out
}

/// Tag every entry of a series with the originating session's name.
pub fn overlay_session_name<K>(series: &mut RecordedSeries<K>, name: &str)
where
    K: Clone,
{
    for entries in series.values_mut() {
        for entry in entries.iter_mut() {
            *entry = entry.clone().with_session_name(name);
        }
    }
}

/// Fold a batch of completed sessions into one, overlaying each session's
/// name onto its entries before coalescing. The first session is the base;
/// later sessions merge into it in order.
#[must_use]
pub fn merge_sessions(sessions: Vec<Session>) -> Option<Session> {
    let mut sessions = sessions.into_iter();
    let mut base = sessions.next()?;
    base.overlay_own_name();

    for mut next in sessions {
        next.overlay_own_name();
        let (results, metrics, errors) = next.into_parts();
        merge_series(base.results_mut(), results);
        merge_series(base.metrics_mut(), metrics);
        base.absorb_errors(errors);
    }
    Some(base)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::value::Value;

    fn key(name: &str) -> ActionKey {
        ActionKey::Call {
            name: name.to_owned(),
        }
    }

    fn plain(value: i64) -> Recorded<ActionKey> {
        Recorded::Plain(Value::Int(value))
    }

    #[test]
    fn merged_in_entries_come_first() {
        let mut into = RecordedSeries::new();
        into.insert(key("x"), VecDeque::from([plain(2)]));

        let mut from = RecordedSeries::new();
        from.insert(key("x"), VecDeque::from([plain(1)]));

        merge_series(&mut into, from);
        let entries = into.get(&key("x")).expect("key kept");
        assert_eq!(entries, &VecDeque::from([plain(1), plain(2)]));
    }

    #[test]
    fn tagging_preserves_child_keys() {
        let mut child = RecordedSeries::new();
        child.insert(key("inner"), VecDeque::from([plain(7)]));

        let tagged = tag_results("work", child);
        let entries = tagged
            .get(&ActionKey::Task {
                name: "work".to_owned(),
            })
            .expect("tagged under task name");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].async_key(), Some(&key("inner")));
        assert_eq!(entries[0].value(), &Value::Int(7));
    }

    #[test]
    fn tagging_empty_child_produces_no_entries() {
        assert!(tag_results("work", RecordedSeries::new()).is_empty());
    }

    #[test]
    fn overlay_wraps_once() {
        let mut series = RecordedSeries::new();
        series.insert(key("x"), VecDeque::from([plain(1)]));
        overlay_session_name(&mut series, "alpha");
        overlay_session_name(&mut series, "beta");

        let entry = &series.get(&key("x")).expect("key kept")[0];
        assert_eq!(entry.session_name(), Some("alpha"));
    }
}
