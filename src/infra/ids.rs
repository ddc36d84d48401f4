use chrono::NaiveDate;
use uuid::Uuid;

use crate::app::ports::IdGenerator;

/// URL-safe document identifiers backed by random UUIDs. A seed date, when
/// given, becomes a sortable prefix so ids generated for the same day cluster
/// together in the store; uniqueness still comes from the random part.
pub struct UrlSafeIds;

impl IdGenerator for UrlSafeIds {
    fn new_id(&self, seed: Option<NaiveDate>) -> String {
        let random = Uuid::new_v4().simple();
        match seed {
            Some(date) => format!("{}-{}", date.format("%Y%m%d"), random),
            None => random.to_string(),
        }
    }
}
