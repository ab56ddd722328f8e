//! Deadline calculator: weekly schedule → next occurrence instant.
//! Pure functions only: no clock reads, no I/O. Callers pass "now" in.
//!
//! Also understands the single-value cron form the reminder job used to be
//! configured with ("0 11 * * 5" or "0 0 11 * * 5"), so old settings keep working.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;

use snackbell_core::config::ReminderConfig;
use snackbell_core::error::{Result, SnackBellError};

/// Local times inside a DST gap are nudged forward in these steps.
const GAP_STEP_MINUTES: i64 = 15;
const GAP_MAX_STEPS: usize = 12;

/// One weekly occurrence: weekday + time of day in a named timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    weekday: Weekday,
    time: NaiveTime,
    timezone: Tz,
}

impl Schedule {
    /// `day_of_week`: 0 = Sunday … 6 = Saturday.
    pub fn new(day_of_week: u8, hour: u32, minute: u32, timezone: &str) -> Result<Self> {
        let weekday = weekday_from_index(day_of_week)
            .ok_or_else(|| SnackBellError::Schedule(format!("day of week {day_of_week} out of range 0-6")))?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
            SnackBellError::Schedule(format!("{hour:02}:{minute:02} is not a valid time of day"))
        })?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| SnackBellError::Timezone(timezone.to_string()))?;
        Ok(Self { weekday, time, timezone })
    }

    /// Parse "MIN HOUR * * DOW" or "SEC MIN HOUR * * DOW" (seconds must be 0).
    /// Only single numeric values are accepted; DOW 7 means Sunday.
    pub fn from_cron(expression: &str, timezone: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        let fields = match parts.len() {
            5 => &parts[..],
            6 => {
                if parse_value(parts[0], 0, 59)? != 0 {
                    return Err(SnackBellError::Schedule(format!(
                        "'{expression}': seconds field must be 0"
                    )));
                }
                &parts[1..]
            }
            _ => {
                return Err(SnackBellError::Schedule(format!(
                    "'{expression}' needs 5 fields (MIN HOUR DOM MON DOW) or 6 with seconds"
                )));
            }
        };

        let minute = parse_value(fields[0], 0, 59)?;
        let hour = parse_value(fields[1], 0, 23)?;
        if fields[2] != "*" || fields[3] != "*" {
            return Err(SnackBellError::Schedule(format!(
                "'{expression}': day-of-month and month must be '*' for a weekly schedule"
            )));
        }
        let dow = parse_value(fields[4], 0, 7)? % 7;

        Self::new(dow as u8, hour, minute, timezone)
    }

    /// Build from the `[reminder]` config section; `cron` wins when set.
    pub fn from_config(config: &ReminderConfig) -> Result<Self> {
        match &config.cron {
            Some(expr) => Self::from_cron(expr, &config.timezone),
            None => Self::new(config.day_of_week, config.hour, config.minute, &config.timezone),
        }
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    /// 0 = Sunday … 6 = Saturday.
    pub fn day_of_week(&self) -> u8 {
        self.weekday.num_days_from_sunday() as u8
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// This schedule's time of day on `date`, as a UTC instant.
    fn on_date(&self, date: NaiveDate) -> DateTime<Utc> {
        resolve_local(self.timezone, date.and_time(self.time))
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {} {}",
            self.weekday,
            self.time.format("%H:%M"),
            self.timezone.name()
        )
    }
}

/// Next instant ≥ `reference` that falls on the schedule's weekday and time of day.
///
/// A reference exactly on the occurrence returns that occurrence; one later the
/// same day returns the occurrence a week on.
pub fn next_occurrence(reference: DateTime<Utc>, schedule: &Schedule) -> DateTime<Utc> {
    let today = reference.with_timezone(&schedule.timezone).date_naive();
    let offset = (i64::from(schedule.weekday.num_days_from_sunday())
        - i64::from(today.weekday().num_days_from_sunday()))
    .rem_euclid(7);

    let candidate = schedule.on_date(today + Duration::days(offset));
    if candidate >= reference {
        candidate
    } else {
        schedule.on_date(today + Duration::days(offset + 7))
    }
}

/// The occurrence inside `[tick - tolerance, tick]`, if any.
pub fn due_occurrence(
    tick: DateTime<Utc>,
    tolerance: Duration,
    schedule: &Schedule,
) -> Option<DateTime<Utc>> {
    let occurrence = next_occurrence(tick - tolerance, schedule);
    (occurrence <= tick).then_some(occurrence)
}

/// The local calendar day containing `now`, in the schedule's timezone:
/// `[00:00, next 00:00 - 1ms]` as UTC instants.
pub fn selection_window(now: DateTime<Utc>, schedule: &Schedule) -> (DateTime<Utc>, DateTime<Utc>) {
    let day = now.with_timezone(&schedule.timezone).date_naive();
    let start = resolve_local(schedule.timezone, day.and_time(NaiveTime::MIN));
    let next_day = resolve_local(
        schedule.timezone,
        (day + Duration::days(1)).and_time(NaiveTime::MIN),
    );
    (start, next_day - Duration::milliseconds(1))
}

/// Map a local wall-clock time to UTC. Ambiguous times (DST fall-back) take
/// the earlier instant; times in a gap (spring-forward) move to the first
/// valid local time after it.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    for _ in 0..GAP_MAX_STEPS {
        if let Some(t) = tz.from_local_datetime(&candidate).earliest() {
            return t.with_timezone(&Utc);
        }
        candidate += Duration::minutes(GAP_STEP_MINUTES);
    }
    // No real timezone has a gap this long.
    Utc.from_utc_datetime(&local)
}

fn weekday_from_index(day: u8) -> Option<Weekday> {
    match day {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

fn parse_value(field: &str, min: u32, max: u32) -> Result<u32> {
    let n: u32 = field.parse().map_err(|_| {
        SnackBellError::Schedule(format!("'{field}' is not a single number (ranges/steps unsupported)"))
    })?;
    if n < min || n > max {
        return Err(SnackBellError::Schedule(format!("{n} out of range {min}-{max}")));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn friday_eleven() -> Schedule {
        Schedule::new(5, 11, 0, "Europe/Amsterdam").unwrap()
    }

    fn amsterdam(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::Europe::Amsterdam
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_friday_before_cutoff_is_same_day() {
        let next = next_occurrence(amsterdam(2026, 10, 16, 10, 59), &friday_eleven());
        assert_eq!(next, amsterdam(2026, 10, 16, 11, 0));
    }

    #[test]
    fn test_friday_after_cutoff_is_next_week() {
        let next = next_occurrence(amsterdam(2026, 10, 16, 11, 1), &friday_eleven());
        assert_eq!(next, amsterdam(2026, 10, 23, 11, 0));
    }

    #[test]
    fn test_exact_boundary_is_inclusive() {
        let at = amsterdam(2026, 10, 16, 11, 0);
        assert_eq!(next_occurrence(at, &friday_eleven()), at);
    }

    #[test]
    fn test_one_minute_after_is_seven_days_later() {
        let at = amsterdam(2026, 6, 5, 11, 0);
        let next = next_occurrence(at + Duration::minutes(1), &friday_eleven());
        assert_eq!(next - at, Duration::days(7));
    }

    #[test]
    fn test_weekday_wraps_around_week() {
        // Saturday → following Friday.
        let next = next_occurrence(amsterdam(2026, 10, 17, 9, 0), &friday_eleven());
        assert_eq!(next, amsterdam(2026, 10, 23, 11, 0));
        // Sunday schedule from Friday.
        let sunday = Schedule::new(0, 8, 15, "Europe/Amsterdam").unwrap();
        let next = next_occurrence(amsterdam(2026, 10, 16, 12, 0), &sunday);
        assert_eq!(next, amsterdam(2026, 10, 18, 8, 15));
    }

    #[test]
    fn test_never_in_past_and_weekday_matches() {
        let schedules = [
            friday_eleven(),
            Schedule::new(0, 0, 0, "UTC").unwrap(),
            Schedule::new(3, 23, 59, "America/New_York").unwrap(),
            Schedule::new(1, 2, 30, "Australia/Sydney").unwrap(),
        ];
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for schedule in &schedules {
            for step in 0..400 {
                let reference = start + Duration::minutes(step * 1337);
                let next = next_occurrence(reference, schedule);
                assert!(next >= reference, "{schedule}: {next} < {reference}");
                assert!(next - reference < Duration::days(7) + Duration::hours(2));
                let local = next.with_timezone(&schedule.timezone());
                assert_eq!(local.weekday(), schedule.weekday(), "{schedule} at {reference}");
            }
        }
    }

    #[test]
    fn test_dst_gap_moves_forward() {
        // 2026-03-29 02:00 → 03:00 in Amsterdam; 02:30 doesn't exist.
        let schedule = Schedule::new(0, 2, 30, "Europe/Amsterdam").unwrap();
        let reference = amsterdam(2026, 3, 28, 12, 0);
        let next = next_occurrence(reference, &schedule);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 29, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_dst_fall_back_takes_earlier() {
        // 2026-10-25 03:00 → 02:00 in Amsterdam; 02:30 happens twice.
        let schedule = Schedule::new(0, 2, 30, "Europe/Amsterdam").unwrap();
        let next = next_occurrence(amsterdam(2026, 10, 24, 12, 0), &schedule);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap());
    }

    #[test]
    fn test_due_occurrence_window() {
        let schedule = friday_eleven();
        let tolerance = Duration::seconds(60);
        let occurrence = amsterdam(2026, 10, 16, 11, 0);

        assert_eq!(due_occurrence(occurrence, tolerance, &schedule), Some(occurrence));
        assert_eq!(
            due_occurrence(occurrence + Duration::seconds(30), tolerance, &schedule),
            Some(occurrence)
        );
        assert_eq!(
            due_occurrence(occurrence + Duration::seconds(61), tolerance, &schedule),
            None
        );
        assert_eq!(
            due_occurrence(occurrence - Duration::seconds(1), tolerance, &schedule),
            None
        );
    }

    #[test]
    fn test_selection_window_is_local_day() {
        let schedule = friday_eleven();
        let (start, end) = selection_window(amsterdam(2026, 10, 16, 11, 0), &schedule);
        assert_eq!(start, amsterdam(2026, 10, 16, 0, 0));
        assert_eq!(end, amsterdam(2026, 10, 17, 0, 0) - Duration::milliseconds(1));
        // Amsterdam is UTC+2 in October.
        assert_eq!(start.hour(), 22);
    }

    #[test]
    fn test_from_cron_forms() {
        let five = Schedule::from_cron("0 11 * * 5", "Europe/Amsterdam").unwrap();
        let six = Schedule::from_cron("0 0 11 * * 5", "Europe/Amsterdam").unwrap();
        assert_eq!(five, friday_eleven());
        assert_eq!(six, friday_eleven());

        let sunday = Schedule::from_cron("30 7 * * 7", "UTC").unwrap();
        assert_eq!(sunday.day_of_week(), 0);
    }

    #[test]
    fn test_from_cron_rejects_unsupported() {
        assert!(Schedule::from_cron("bad", "UTC").is_err());
        assert!(Schedule::from_cron("*/15 * * * *", "UTC").is_err());
        assert!(Schedule::from_cron("0 11 1 * 5", "UTC").is_err());
        assert!(Schedule::from_cron("30 0 11 * * 5", "UTC").is_err());
        assert!(Schedule::from_cron("0 25 * * 5", "UTC").is_err());
    }

    #[test]
    fn test_new_rejects_invalid() {
        assert!(matches!(
            Schedule::new(7, 11, 0, "UTC"),
            Err(SnackBellError::Schedule(_))
        ));
        assert!(Schedule::new(5, 24, 0, "UTC").is_err());
        assert!(matches!(
            Schedule::new(5, 11, 0, "Mars/Olympus_Mons"),
            Err(SnackBellError::Timezone(_))
        ));
    }

    #[test]
    fn test_from_config_prefers_cron() {
        let mut config = ReminderConfig::default();
        assert_eq!(Schedule::from_config(&config).unwrap(), friday_eleven());
        config.cron = Some("15 9 * * 1".into());
        let schedule = Schedule::from_config(&config).unwrap();
        assert_eq!(schedule.weekday(), Weekday::Mon);
        assert_eq!(schedule.to_string(), "Mon 09:15 Europe/Amsterdam");
    }
}
