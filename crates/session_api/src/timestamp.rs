use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const NAIVE_FRACTIONAL: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
const NAIVE_SECONDS: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Parse a backend timestamp.
///
/// RFC3339 values keep their offset. Offset-less ISO-8601 values (as emitted
/// for naive UTC datetimes) are interpreted as UTC. Anything else is `None`.
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }

    let naive = value.replacen(' ', "T", 1);
    PrimitiveDateTime::parse(&naive, NAIVE_FRACTIONAL)
        .or_else(|_| PrimitiveDateTime::parse(&naive, NAIVE_SECONDS))
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn rfc3339_keeps_offset() {
        assert_eq!(
            parse_timestamp("2024-02-01T10:00:00+02:00"),
            Some(datetime!(2024-02-01 10:00:00 +02:00))
        );
        assert_eq!(
            parse_timestamp("2024-02-01T10:00:00Z"),
            Some(datetime!(2024-02-01 10:00:00 UTC))
        );
    }

    #[test]
    fn naive_values_are_utc() {
        assert_eq!(
            parse_timestamp("2024-02-01T10:00:00.123456"),
            Some(datetime!(2024-02-01 10:00:00.123456 UTC))
        );
        assert_eq!(
            parse_timestamp("2024-02-01 10:00:00"),
            Some(datetime!(2024-02-01 10:00:00 UTC))
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
