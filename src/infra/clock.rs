use chrono::NaiveDate;

use crate::app::ports::Clock;

/// Wall-clock dates for production use.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Utc::now().date_naive()
    }
}

/// Always reports the wrapped date. For deterministic tests.
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
