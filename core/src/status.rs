//! Reconciliation of available migrations against applied records.

use tracing::warn;

use crate::migration::{AppliedVersion, Migration};

/// Joins applied records with available migrations by version.
///
/// Only applied versions that resolve to an available migration are kept;
/// each gets its `applied_at` filled in. Applied versions without a file are
/// dropped from the report (with a warning). The result is ascending by
/// version whatever order `applied` came in.
pub fn reconcile(applied: &[AppliedVersion], available: &[Migration]) -> Vec<Migration> {
    let mut report: Vec<Migration> = applied
        .iter()
        .filter_map(|record| {
            let found = find_by_version(available, record.version);
            if found.is_none() {
                warn!(
                    version = record.version,
                    "applied migration has no matching file, omitted from status"
                );
            }
            found.map(|migration| Migration {
                applied_at: Some(record.applied_at),
                ..migration.clone()
            })
        })
        .collect();

    report.sort_by_key(|m| m.version);
    report
}

/// Returns the migration with `version`, if any.
pub fn find_by_version(migrations: &[Migration], version: i64) -> Option<&Migration> {
    migrations.iter().find(|m| m.version == version)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn migration(version: i64) -> Migration {
        Migration::new(version, format!("{version}_m.sql"), "up", "down")
    }

    fn applied(version: i64, secs: i64) -> AppliedVersion {
        AppliedVersion {
            version,
            applied_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_reconcile_attaches_applied_at() {
        let available = vec![migration(1), migration(2), migration(3)];
        let report = reconcile(&[applied(1, 100), applied(2, 200)], &available);

        assert_eq!(report.len(), 2);
        assert_eq!(report[0].version, 1);
        assert_eq!(report[0].applied_at, Some(Utc.timestamp_opt(100, 0).unwrap()));
        assert_eq!(report[1].version, 2);
        assert_eq!(report[1].up_statements, "up");
    }

    #[test]
    fn test_reconcile_drops_missing_files() {
        let available = vec![migration(1)];
        let report = reconcile(&[applied(1, 100), applied(9, 900)], &available);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].version, 1);
    }

    #[test]
    fn test_reconcile_sorts_by_version() {
        let available = vec![migration(1), migration(2), migration(3)];
        let report = reconcile(&[applied(3, 1), applied(1, 2), applied(2, 3)], &available);
        let versions: Vec<i64> = report.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn test_reconcile_empty_inputs() {
        assert!(reconcile(&[], &[migration(1)]).is_empty());
        assert!(reconcile(&[applied(1, 1)], &[]).is_empty());
    }

    #[test]
    fn test_available_migrations_are_not_mutated() {
        let available = vec![migration(1)];
        let _ = reconcile(&[applied(1, 1)], &available);
        assert!(available[0].applied_at.is_none());
    }
}
