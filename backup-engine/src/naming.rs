//! Archive file naming.
//!
//! `<label>_backup_<timestamp>.tar.zst`, where the timestamp is an ISO-8601 UTC
//! instant at millisecond precision with `:` and `.` replaced by `-`, e.g.
//! `world1_backup_2024-05-01T04-20-00-123Z.tar.zst`. Retention recovers the
//! label and creation time from this name alone, in both stores.

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};

pub const ARCHIVE_EXT: &str = "tar.zst";

const SEPARATOR: &str = "_backup_";
const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArchiveName {
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// Drop precision the file name cannot carry.
pub fn archive_instant(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    let at = archive_instant(at);
    format!(
        "{}-{:03}Z",
        at.format(STAMP_FORMAT),
        at.timestamp_subsec_millis()
    )
}

pub fn archive_file_name(label: &str, at: DateTime<Utc>) -> String {
    format!("{label}{SEPARATOR}{}.{ARCHIVE_EXT}", format_timestamp(at))
}

/// Returns `None` for anything that is not one of our archives.
pub fn parse_archive_file_name(name: &str) -> Option<ParsedArchiveName> {
    let stem = name.strip_suffix(ARCHIVE_EXT)?.strip_suffix('.')?;
    let idx = stem.rfind(SEPARATOR)?;
    let label = &stem[..idx];
    if label.is_empty() {
        return None;
    }
    let created_at = parse_timestamp(&stem[idx + SEPARATOR.len()..])?;
    Some(ParsedArchiveName {
        label: label.to_string(),
        created_at,
    })
}

fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let (seconds, millis) = stamp.strip_suffix('Z')?.rsplit_once('-')?;
    if millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis: i64 = millis.parse().ok()?;
    let naive = NaiveDateTime::parse_from_str(seconds, STAMP_FORMAT).ok()?;
    Some(naive.and_utc() + Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_file_name_layout() {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 4, 20, 0).unwrap() + Duration::milliseconds(123);
        assert_eq!(
            archive_file_name("world1", created),
            "world1_backup_2024-05-01T04-20-00-123Z.tar.zst"
        );
    }

    #[test]
    fn test_name_has_no_unsafe_characters() {
        let name = archive_file_name("survival", at(1_714_537_200_999));
        assert!(!name.contains(':'));
        assert_eq!(name.matches('.').count(), 2); // only the extension dots
    }

    #[test]
    fn test_parse_recovers_label_and_time() {
        for (label, ms) in [
            ("world1", 1_714_537_200_123),
            ("my_world_backup_copy", 0),
            ("creative-2", 1_893_456_000_007),
        ] {
            let created = at(ms);
            let parsed = parse_archive_file_name(&archive_file_name(label, created)).unwrap();
            assert_eq!(parsed.label, label);
            assert_eq!(parsed.created_at, created);
        }
    }

    #[test]
    fn test_sub_millisecond_precision_is_dropped() {
        let created = at(1_714_537_200_123) + Duration::microseconds(456);
        let parsed = parse_archive_file_name(&archive_file_name("w", created)).unwrap();
        assert_eq!(parsed.created_at, archive_instant(created));
    }

    #[test]
    fn test_rejects_foreign_names() {
        for name in [
            "notes.txt",
            "world1.tar.zst",
            "_backup_2024-05-01T04-20-00-123Z.tar.zst",
            "world1_backup_yesterday.tar.zst",
            "world1_backup_2024-05-01T04-20-00-123Z.tar.zst.partial",
            "world1_backup_2024-05-01T04-20-00-12Z.tar.zst",
        ] {
            assert!(parse_archive_file_name(name).is_none(), "{name}");
        }
    }
}
