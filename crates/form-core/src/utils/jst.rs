use chrono::{DateTime, FixedOffset, Utc};

/// Japan Standard Time, UTC+9. The business-hour gate (spec.md §4.2.5)
/// and the monitor's `recorded_at` timestamps (spec.md §4.3.4) are both
/// anchored to this offset, following `original_source`'s
/// `batch_monitor.py` (`JST = timezone(timedelta(hours=9))`).
pub fn jst_offset() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("fixed 9h offset is always valid")
}

pub fn now_jst() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&jst_offset())
}

/// Minutes since local midnight, in JST.
pub fn jst_minute_of_day(at: DateTime<FixedOffset>) -> u32 {
    let at = at.with_timezone(&jst_offset());
    (at.format("%H").to_string().parse::<u32>().unwrap_or(0)) * 60
        + at.format("%M").to_string().parse::<u32>().unwrap_or(0)
}

/// ISO weekday number, Monday=1..Sunday=7, matching `chrono::Weekday`
/// ordering used by the candidate-selection gate.
pub fn jst_weekday(at: DateTime<FixedOffset>) -> chrono::Weekday {
    at.with_timezone(&jst_offset()).weekday()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn jst_minute_of_day_is_computed_correctly() {
        let at = jst_offset().with_ymd_and_hms(2026, 7, 26, 9, 30, 0).unwrap();
        assert_eq!(jst_minute_of_day(at), 9 * 60 + 30);
    }

    #[test]
    fn jst_weekday_matches_calendar() {
        // 2026-07-26 is a Sunday.
        let at = jst_offset().with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap();
        assert_eq!(jst_weekday(at), chrono::Weekday::Sun);
    }
}
