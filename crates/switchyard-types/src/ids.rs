use chrono::Utc;
use uuid::Uuid;

/// Generate a unique run ID in the form `run-YYYYMMDD-HHMMSS-xxxxxx`.
///
/// The suffix is six lowercase alphanumeric characters drawn from UUID
/// entropy, keeping ids sortable by start time while remaining unique
/// across runs started in the same second.
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(6)
        .collect();
    format!("run-{timestamp}-{suffix}")
}

/// Generate a globally unique, time-orderable event ID (UUIDv7).
pub fn generate_event_id() -> String {
    Uuid::now_v7().to_string()
}

/// Check whether a string matches the run-id format.
pub fn is_run_id(s: &str) -> bool {
    let Some(rest) = s.strip_prefix("run-") else {
        return false;
    };
    let parts: Vec<&str> = rest.splitn(3, '-').collect();
    if parts.len() != 3 {
        return false;
    }
    parts[0].len() == 8
        && parts[0].chars().all(|c| c.is_ascii_digit())
        && parts[1].len() == 6
        && parts[1].chars().all(|c| c.is_ascii_digit())
        && parts[2].len() == 6
        && parts[2]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
