use time::{OffsetDateTime, PrimitiveDateTime};

/// Current UTC time without an offset, matching the `TIMESTAMP` columns.
pub fn utc_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub fn unix_timestamp(at: PrimitiveDateTime) -> i64 {
    at.assume_utc().unix_timestamp()
}
