use chatvault_snapshot::RetentionKind;
use chrono::{Duration, Utc};

use crate::dest::{BackupEntry, Destination};
use crate::error::BackupError;
use crate::vault_config::RetentionConfig;

/// Pick the remote snapshots the retention policy no longer wants.
/// `entries` must be sorted newest first, as destinations report them.
/// A zero limit disables pruning for that rule.
pub(crate) fn select_prunable(policy: &RetentionConfig, entries: &[BackupEntry]) -> Vec<String> {
    match policy.kind {
        RetentionKind::Count => {
            if policy.count_limit == 0 {
                return Vec::new();
            }
            entries
                .iter()
                .skip(policy.count_limit as usize)
                .map(|entry| entry.id.clone())
                .collect()
        }
        RetentionKind::Age => {
            if policy.age_days == 0 {
                return Vec::new();
            }
            let cutoff = Utc::now() - Duration::days(i64::from(policy.age_days));
            entries
                .iter()
                .filter(|entry| entry.last_modified < cutoff)
                .map(|entry| entry.id.clone())
                .collect()
        }
    }
}

/// List a destination and delete what the policy rejects. Deletes run one
/// by one; a failed delete is logged and skipped so the remaining ones
/// still happen. Returns how many objects were removed.
pub(crate) async fn prune(
    dest: &dyn Destination,
    policy: &RetentionConfig,
) -> Result<usize, BackupError> {
    let entries = dest.list().await?;
    let doomed = select_prunable(policy, &entries);
    if doomed.is_empty() {
        return Ok(0);
    }
    tracing::debug!(destination = %dest.kind(), count = doomed.len(), "pruning old backups");
    let mut removed = 0usize;
    for id in doomed {
        match dest.delete(&id).await {
            Ok(()) => removed += 1,
            Err(err) => {
                tracing::warn!(destination = %dest.kind(), id = %id, error = %err, "failed to delete old backup");
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;

    fn entry(id: &str, stamp: &str) -> BackupEntry {
        BackupEntry {
            id: id.to_string(),
            last_modified: stamp.parse::<DateTime<Utc>>().unwrap(),
        }
    }

    fn policy(kind: RetentionKind, count_limit: u32, age_days: u32) -> RetentionConfig {
        RetentionConfig {
            kind,
            count_limit,
            age_days,
        }
    }

    #[test]
    fn count_rule_keeps_newest_n() {
        let entries = vec![
            entry("d", "2026-08-20T00:00:00Z"),
            entry("c", "2026-08-19T00:00:00Z"),
            entry("b", "2026-08-18T00:00:00Z"),
            entry("a", "2026-08-17T00:00:00Z"),
        ];
        let doomed = select_prunable(&policy(RetentionKind::Count, 2, 30), &entries);
        assert_eq!(doomed, ["b", "a"]);
    }

    #[test]
    fn count_rule_under_limit_removes_nothing() {
        let entries = vec![entry("a", "2026-08-20T00:00:00Z")];
        assert!(select_prunable(&policy(RetentionKind::Count, 30, 30), &entries).is_empty());
    }

    #[test]
    fn age_rule_drops_entries_past_cutoff() {
        let recent = Utc::now() - Duration::days(2);
        let stale = Utc::now() - Duration::days(40);
        let entries = vec![
            BackupEntry {
                id: "recent".into(),
                last_modified: recent,
            },
            BackupEntry {
                id: "stale".into(),
                last_modified: stale,
            },
        ];
        let doomed = select_prunable(&policy(RetentionKind::Age, 30, 30), &entries);
        assert_eq!(doomed, ["stale"]);
    }

    #[test]
    fn zero_limits_disable_pruning() {
        let entries = vec![entry("a", "2000-01-01T00:00:00Z")];
        assert!(select_prunable(&policy(RetentionKind::Count, 0, 30), &entries).is_empty());
        assert!(select_prunable(&policy(RetentionKind::Age, 30, 0), &entries).is_empty());
    }
}
