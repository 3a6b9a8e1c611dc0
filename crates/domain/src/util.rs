use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let value = OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Tag matching rule for the whole system: case-insensitive substring
/// containment. An empty needle never matches.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_ignore_case_matches_mixed_case() {
        assert!(contains_ignore_case("banned: Scammer #FRAUD", "fraud"));
        assert!(contains_ignore_case("fraud", "FRAUD"));
    }

    #[test]
    fn contains_ignore_case_rejects_missing_and_empty() {
        assert!(!contains_ignore_case("spam only", "fraud"));
        assert!(!contains_ignore_case("anything", ""));
    }

    #[test]
    fn format_ms_rfc3339_renders_epoch() {
        assert_eq!(format_ms_rfc3339(0), "1970-01-01T00:00:00Z");
    }
}
