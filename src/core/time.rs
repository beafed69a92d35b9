use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub(crate) fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

/// Empty string for an unset timestamp, matching how pending completion times are exposed.
pub(crate) fn format_optional(value: Option<OffsetDateTime>) -> String {
    value.map(format_offset).unwrap_or_default()
}
