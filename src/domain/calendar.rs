use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};

/// Malaysia Time, UTC+8.
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Calendar arithmetic in the fixed business timezone.
///
/// Day boundaries ("today", "yesterday") are local midnights, while
/// arrears thresholds compare against wall-clock `now - N days` so a sweep
/// started at 01:00 local time still sees the previous day's arrears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessClock {
    offset: FixedOffset,
}

impl Default for BusinessClock {
    fn default() -> Self {
        Self::malaysia()
    }
}

impl BusinessClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn malaysia() -> Self {
        Self::from_offset_secs(DEFAULT_UTC_OFFSET_SECS)
    }

    /// Builds a clock from an offset in seconds east of UTC. Offsets outside
    /// `±24h` fall back to UTC+8.
    pub fn from_offset_secs(secs: i32) -> Self {
        let offset = FixedOffset::east_opt(secs)
            .or_else(|| FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS))
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.local(instant).date_naive()
    }

    /// UTC instant of local midnight on the given local date.
    pub fn midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        // A fixed offset has no gaps or folds, so the mapping is always single.
        (naive - Duration::seconds(i64::from(self.offset.local_minus_utc()))).and_utc()
    }

    pub fn start_of_day(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.midnight(self.local_date(instant))
    }

    pub fn start_of_yesterday(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of_day(instant) - Duration::days(1)
    }

    /// Whole local calendar days from `from` to `to`; negative if `to` is earlier.
    pub fn days_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        (self.local_date(to) - self.local_date(from)).num_days()
    }

    /// Days an installment due at `due` is overdue at `now`, floored at zero.
    pub fn days_overdue(&self, due: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        u32::try_from(self.days_between(due, now).max(0)).unwrap_or(u32::MAX)
    }

    pub fn same_business_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.local_date(a) == self.local_date(b)
    }
}
