use std::collections::BTreeMap;

use fractonring_core::{BackendError, NodeId, ShardResults};
use serde::Serialize;

/// Outcome of one shard in a broadcast or probe.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ShardStatus {
    pub shard: NodeId,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShardStatus {
    fn new(shard: &str, result: &Result<(), BackendError>) -> Self {
        Self {
            shard: shard.to_owned(),
            ok: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
        }
    }
}

pub fn statuses(results: &ShardResults) -> Vec<ShardStatus> {
    results.iter().map(|(shard, result)| ShardStatus::new(shard, result)).collect()
}

/// Statuses of an initialization, in configuration order.
pub fn init_statuses<'a>(
    names: impl Iterator<Item = &'a str>,
    errors: &[Result<(), BackendError>],
) -> Vec<ShardStatus> {
    names.zip(errors).map(|(shard, result)| ShardStatus::new(shard, result)).collect()
}

#[derive(Debug, Serialize)]
pub struct Placement<'a> {
    pub key: &'a str,
    pub shard: Option<&'a str>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Share {
    pub shard: NodeId,
    pub keys: usize,
    pub fraction: f64,
}

pub fn shares(counts: BTreeMap<NodeId, usize>, total: usize) -> Vec<Share> {
    counts
        .into_iter()
        .map(|(shard, keys)| {
            let fraction = if total == 0 { 0.0 } else { keys as f64 / total as f64 };
            Share { shard, keys, fraction }
        })
        .collect()
}

pub fn render_statuses(statuses: &[ShardStatus]) -> String {
    statuses
        .iter()
        .map(|s| match &s.error {
            None => format!("{}\tok", s.shard),
            Some(e) => format!("{}\terror: {}", s.shard, e),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_shares(shares: &[Share]) -> String {
    shares
        .iter()
        .map(|s| format!("{}\t{}\t{:.2}%", s.shard, s.keys, s.fraction * 100.0))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_carry_error_text() {
        let mut results = ShardResults::new();
        results.insert("shard1".into(), Ok(()));
        results.insert("shard2".into(), Err(BackendError::Unavailable));

        let statuses = statuses(&results);
        assert_eq!(render_statuses(&statuses), "shard1\tok\nshard2\terror: shard unavailable");

        let json = serde_json::to_string(&statuses).unwrap();
        assert_eq!(
            json,
            r#"[{"shard":"shard1","ok":true},{"shard":"shard2","ok":false,"error":"shard unavailable"}]"#
        );
    }

    #[test]
    fn shares_are_fractions_of_total() {
        let counts = BTreeMap::from([("a".to_owned(), 1), ("b".to_owned(), 3)]);
        let shares = shares(counts, 4);
        assert_eq!(shares[1], Share { shard: "b".into(), keys: 3, fraction: 0.75 });
        assert_eq!(render_shares(&shares), "a\t1\t25.00%\nb\t3\t75.00%");
    }
}
