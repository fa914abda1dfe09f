use chrono::{DateTime, Utc};

/// The substring every backup object name carries for a given site.
/// Destination listings filter on this to ignore unrelated files sharing
/// the same directory or key prefix.
pub fn backup_marker(site_id: &str) -> String {
    format!("{site_id}_chat_backup_")
}

/// Timestamp component of a backup object name: ISO-8601 with `:` and `.`
/// replaced by `-`, truncated to seconds, plus the last six digits of the
/// epoch milliseconds so two uploads within the same second never collide.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    let base = at.format("%Y-%m-%dT%H-%M-%S");
    let tail = at.timestamp_millis().rem_euclid(1_000_000);
    format!("{base}-{tail:06}")
}

/// Full object name for a backup uploaded at `at`.
pub fn backup_object_name(site_id: &str, at: DateTime<Utc>) -> String {
    format!("{}{}.json", backup_marker(site_id), format_timestamp(at))
}

/// Whether a destination entry (filename, href or key) belongs to this
/// site's backups.
pub fn is_backup_object(site_id: &str, name: &str) -> bool {
    name.contains(&backup_marker(site_id))
}
