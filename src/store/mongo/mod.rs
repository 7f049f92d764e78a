//! MongoDB-backed stores.
//!
//! Documents keep timestamps as BSON dates so range filters and sorts run on
//! the server; the domain types use chrono. Conversion goes through
//! milliseconds, so stored times are truncated to millisecond precision.

mod notifications;
mod tasks;

use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;

pub use notifications::MongoNotificationStore;
pub use tasks::MongoTaskStore;

pub const TASKS_COLLECTION: &str = "tasks";
pub const NOTIFICATIONS_COLLECTION: &str = "notification_queue";
pub const COUNTERS_COLLECTION: &str = "counters";

pub(crate) fn to_bson_date(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

pub(crate) fn from_bson_date(dt: BsonDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dates_survive_bson_conversion_at_millisecond_precision() {
        let dt = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap()
            + chrono::Duration::milliseconds(535);
        assert_eq!(from_bson_date(to_bson_date(dt)), dt);
    }
}
