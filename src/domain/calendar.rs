use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct LocalCalendar {
    timezone: Tz,
    now_provider: NowProvider,
}

impl fmt::Debug for LocalCalendar {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LocalCalendar")
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

impl LocalCalendar {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.timezone).date_naive()
    }

    pub fn is_today(&self, date: NaiveDate) -> bool {
        date == self.today()
    }

    pub fn is_overdue(&self, due_date: NaiveDate) -> bool {
        due_date < self.today()
    }

    pub fn current_week_start(&self) -> NaiveDate {
        week_start(self.today())
    }
}

pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn week_dates(week_start: NaiveDate) -> [NaiveDate; 7] {
    std::array::from_fn(|offset| week_start + Duration::days(offset as i64))
}
