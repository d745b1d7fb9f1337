// Schedule parsing and next-run calculation for schedule triggers
//
// Supports three kinds: five-field cron expressions evaluated in a timezone,
// fixed intervals, and one-time runs. All kinds honour optional start/end
// bounds.

use crate::errors::ConfigError;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::str::FromStr;

const TRIGGER_TYPE: &str = "schedule";

/// Raw JSON shape of a schedule trigger's configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScheduleConfig {
    schedule_type: String,
    #[serde(default)]
    cron_expression: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    interval_value: Option<i64>,
    #[serde(default)]
    interval_unit: Option<String>,
    #[serde(default)]
    run_date: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

/// How a schedule produces its run times
#[derive(Debug, Clone)]
pub enum ScheduleKind {
    Cron {
        expression: String,
        schedule: CronSchedule,
        timezone: Tz,
    },
    Interval {
        period: Duration,
    },
    Once {
        run_at: DateTime<Utc>,
    },
}

/// Parsed, validated schedule ready for next-run calculation
#[derive(Debug, Clone)]
pub struct ScheduleSpec {
    pub kind: ScheduleKind,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// First interval run; unused by other kinds
    anchor: DateTime<Utc>,
}

impl ScheduleSpec {
    /// Parse a schedule trigger configuration.
    ///
    /// `armed_at` anchors interval schedules that have no `startDate`: the
    /// first run happens one period after arming.
    pub fn from_config(
        config: &serde_json::Value,
        armed_at: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let raw: RawScheduleConfig =
            serde_json::from_value(config.clone()).map_err(|e| ConfigError::InvalidShape {
                trigger_type: TRIGGER_TYPE.to_string(),
                reason: e.to_string(),
            })?;

        let timezone = resolve_timezone(raw.timezone.as_deref());
        let start_date = raw
            .start_date
            .as_deref()
            .map(|s| parse_datetime("startDate", s, timezone))
            .transpose()?;
        let end_date = raw
            .end_date
            .as_deref()
            .map(|s| parse_datetime("endDate", s, timezone))
            .transpose()?;

        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end < start {
                return Err(ConfigError::InvalidFieldValue {
                    field: "endDate".to_string(),
                    reason: "must not be earlier than startDate".to_string(),
                });
            }
        }

        let (kind, anchor) = match raw.schedule_type.as_str() {
            "cron" => {
                let expression = raw
                    .cron_expression
                    .ok_or_else(|| ConfigError::MissingField("cronExpression".to_string()))?;
                let schedule = parse_cron_expression(&expression)?;
                (
                    ScheduleKind::Cron {
                        expression,
                        schedule,
                        timezone,
                    },
                    armed_at,
                )
            }
            "interval" => {
                let value = raw
                    .interval_value
                    .ok_or_else(|| ConfigError::MissingField("intervalValue".to_string()))?;
                let unit = raw
                    .interval_unit
                    .ok_or_else(|| ConfigError::MissingField("intervalUnit".to_string()))?;
                let period = interval_period(value, &unit)?;
                let anchor = match start_date {
                    Some(start) => start,
                    None => armed_at
                        .checked_add_signed(period)
                        .ok_or_else(|| interval_out_of_range(value, &unit))?,
                };
                (ScheduleKind::Interval { period }, anchor)
            }
            "once" => {
                let run_date = raw
                    .run_date
                    .ok_or_else(|| ConfigError::MissingField("runDate".to_string()))?;
                let run_at = parse_datetime("runDate", &run_date, timezone)?;
                (ScheduleKind::Once { run_at }, armed_at)
            }
            other => {
                return Err(ConfigError::InvalidFieldValue {
                    field: "scheduleType".to_string(),
                    reason: format!("unknown schedule type '{}'", other),
                })
            }
        };

        Ok(Self {
            kind,
            start_date,
            end_date,
            anchor,
        })
    }

    /// Next run strictly after `after`, or `None` when the schedule is
    /// exhausted (past its end date or a one-time run already elapsed).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = match &self.kind {
            ScheduleKind::Cron {
                schedule, timezone, ..
            } => {
                // Step back one second so a run exactly at start_date counts
                let from = match self.start_date {
                    Some(start) if start > after => start - Duration::seconds(1),
                    _ => after,
                };
                schedule
                    .after(&from.with_timezone(timezone))
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            ScheduleKind::Interval { period } => {
                if self.anchor > after {
                    Some(self.anchor)
                } else {
                    let period_ms = period.num_milliseconds().max(1);
                    let elapsed_ms = (after - self.anchor).num_milliseconds();
                    let steps = elapsed_ms / period_ms + 1;
                    steps
                        .checked_mul(period_ms)
                        .and_then(Duration::try_milliseconds)
                        .and_then(|offset| self.anchor.checked_add_signed(offset))
                }
            }
            ScheduleKind::Once { run_at } => {
                if *run_at > after {
                    Some(*run_at)
                } else {
                    None
                }
            }
        }?;

        if self.start_date.map_or(false, |start| next < start) {
            return None;
        }
        if self.end_date.map_or(false, |end| next > end) {
            return None;
        }
        Some(next)
    }

    /// Up to `count` consecutive future runs after `from`, without side effects
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut runs = Vec::with_capacity(count);
        let mut cursor = from;
        while runs.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    runs.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        runs
    }
}

/// Resolve an IANA timezone name, falling back to UTC for unknown names
pub fn resolve_timezone(name: Option<&str>) -> Tz {
    match name {
        None => Tz::UTC,
        Some(name) => Tz::from_str(name).unwrap_or_else(|_| {
            tracing::warn!(timezone = name, "Unknown timezone, falling back to UTC");
            Tz::UTC
        }),
    }
}

/// Parse a standard five-field cron expression
/// (minute, hour, day-of-month, month, day-of-week).
///
/// Day-of-week accepts 0-7 with both 0 and 7 meaning Sunday, or names.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCronExpression {
        expression: expression.to_string(),
        reason,
    };

    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
    }

    let day_of_week = translate_day_of_week(fields[4]).map_err(invalid)?;
    let normalized = format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    );

    CronSchedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

/// Rewrite a numeric day-of-week field (0 = Sunday) into the 1 = Sunday
/// ordinals the cron evaluator uses. Named days pass through untouched.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{}'", step))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (first, last) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (parse_weekday(a)?, parse_weekday(b)?),
                None if step > 1 => (parse_weekday(range)?, 6),
                None => {
                    let day = parse_weekday(range)?;
                    (day, day)
                }
            },
        };
        if first > last {
            return Err(format!("invalid day-of-week range '{}'", range));
        }

        for day in (first..=last).step_by(step as usize) {
            days.insert(day % 7 + 1);
        }
    }

    Ok(days
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_weekday(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day-of-week value '{}'", value)),
    }
}

fn interval_period(value: i64, unit: &str) -> Result<Duration, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::InvalidFieldValue {
            field: "intervalValue".to_string(),
            reason: "must be a positive integer".to_string(),
        });
    }

    let period = match unit {
        "seconds" => Duration::try_seconds(value),
        "minutes" => Duration::try_minutes(value),
        "hours" => Duration::try_hours(value),
        "days" => Duration::try_days(value),
        other => {
            return Err(ConfigError::InvalidFieldValue {
                field: "intervalUnit".to_string(),
                reason: format!("unknown unit '{}'", other),
            })
        }
    };
    period.ok_or_else(|| interval_out_of_range(value, unit))
}

fn interval_out_of_range(value: i64, unit: &str) -> ConfigError {
    ConfigError::InvalidFieldValue {
        field: "intervalValue".to_string(),
        reason: format!("{} {} is out of range", value, unit),
    }
}

/// Accept RFC 3339 timestamps, or naive date-times interpreted in `timezone`
fn parse_datetime(field: &str, value: &str, timezone: Tz) -> Result<DateTime<Utc>, ConfigError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            if let Some(local) = timezone.from_local_datetime(&naive).earliest() {
                return Ok(local.with_timezone(&Utc));
            }
        }
    }

    Err(ConfigError::InvalidFieldValue {
        field: field.to_string(),
        reason: format!("unparsable date '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Weekday};
    use serde_json::json;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_weekday_cron_fires_same_day() {
        // 2024-01-15 is a Monday
        let spec = ScheduleSpec::from_config(
            &json!({"scheduleType": "cron", "cronExpression": "0 9 * * 1-5", "timezone": "UTC"}),
            utc("2024-01-15T08:00:00Z"),
        )
        .unwrap();

        let next = spec.next_after(utc("2024-01-15T08:59:00Z")).unwrap();
        assert_eq!(next, utc("2024-01-15T09:00:00Z"));
    }

    #[test]
    fn test_weekday_cron_skips_weekend() {
        let spec = ScheduleSpec::from_config(
            &json!({"scheduleType": "cron", "cronExpression": "0 9 * * 1-5"}),
            Utc::now(),
        )
        .unwrap();

        // Friday 2024-01-19 after 09:00 rolls to Monday
        let next = spec.next_after(utc("2024-01-19T10:00:00Z")).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next, utc("2024-01-22T09:00:00Z"));
    }

    #[test]
    fn test_sunday_as_zero_and_seven() {
        let saturday = utc("2024-01-20T12:00:00Z");
        for expression in ["30 6 * * 0", "30 6 * * 7"] {
            let spec = ScheduleSpec::from_config(
                &json!({"scheduleType": "cron", "cronExpression": expression}),
                saturday,
            )
            .unwrap();
            let next = spec.next_after(saturday).unwrap();
            assert_eq!(next.weekday(), Weekday::Sun, "{expression}");
            assert_eq!((next.hour(), next.minute()), (6, 30));
        }
    }

    #[test]
    fn test_translate_day_of_week() {
        assert_eq!(translate_day_of_week("1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(translate_day_of_week("5-7").unwrap(), "1,6,7");
        assert_eq!(translate_day_of_week("*/2").unwrap(), "1,3,5,7");
        assert_eq!(translate_day_of_week("MON-FRI").unwrap(), "MON-FRI");
        assert_eq!(translate_day_of_week("*").unwrap(), "*");
        assert!(translate_day_of_week("8").is_err());
        assert!(translate_day_of_week("5-2").is_err());
    }

    #[test]
    fn test_cron_evaluated_in_timezone() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "scheduleType": "cron",
                "cronExpression": "0 9 * * *",
                "timezone": "Asia/Ho_Chi_Minh"
            }),
            Utc::now(),
        )
        .unwrap();

        // 09:00 in UTC+7 is 02:00 UTC
        let next = spec.next_after(utc("2024-03-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-03-01T02:00:00Z"));
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        let spec = ScheduleSpec::from_config(
            &json!({"scheduleType": "cron", "cronExpression": "0 9 * * *", "timezone": "Mars/Olympus"}),
            Utc::now(),
        )
        .unwrap();

        let next = spec.next_after(utc("2024-03-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-03-01T09:00:00Z"));
    }

    #[test]
    fn test_wrong_field_count_is_rejected() {
        let err = ScheduleSpec::from_config(
            &json!({"scheduleType": "cron", "cronExpression": "0 0 9 * * 1"}),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCronExpression { .. }));
    }

    #[test]
    fn test_interval_requires_value_and_unit() {
        let err = ScheduleSpec::from_config(
            &json!({"scheduleType": "interval", "intervalUnit": "minutes"}),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingField("intervalValue".to_string()));

        let err = ScheduleSpec::from_config(
            &json!({"scheduleType": "interval", "intervalValue": 5}),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingField("intervalUnit".to_string()));
    }

    #[test]
    fn test_interval_runs_one_period_after_arming() {
        let armed_at = utc("2024-01-01T00:00:00Z");
        let spec = ScheduleSpec::from_config(
            &json!({"scheduleType": "interval", "intervalValue": 15, "intervalUnit": "minutes"}),
            armed_at,
        )
        .unwrap();

        assert_eq!(spec.next_after(armed_at), Some(utc("2024-01-01T00:15:00Z")));
        assert_eq!(
            spec.next_after(utc("2024-01-01T00:15:00Z")),
            Some(utc("2024-01-01T00:30:00Z"))
        );
        assert_eq!(
            spec.next_after(utc("2024-01-01T01:07:00Z")),
            Some(utc("2024-01-01T01:15:00Z"))
        );
    }

    #[test]
    fn test_interval_anchored_at_start_date() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "scheduleType": "interval",
                "intervalValue": 1,
                "intervalUnit": "hours",
                "startDate": "2024-06-01T12:00:00Z"
            }),
            utc("2024-01-01T00:00:00Z"),
        )
        .unwrap();

        assert_eq!(
            spec.next_after(utc("2024-01-01T00:00:00Z")),
            Some(utc("2024-06-01T12:00:00Z"))
        );
    }

    #[test]
    fn test_interval_out_of_range_is_config_error() {
        let armed_at = utc("2024-01-01T00:00:00Z");
        for (value, unit) in [(9_000_000_000_000_000i64, "seconds"), (1_000_000_000_000, "days")] {
            let err = ScheduleSpec::from_config(
                &json!({"scheduleType": "interval", "intervalValue": value, "intervalUnit": unit}),
                armed_at,
            )
            .unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidFieldValue { field, .. } if field == "intervalValue"),
                "unexpected error for {} {}: {:?}",
                value,
                unit,
                err
            );
        }
    }

    #[test]
    fn test_interval_past_calendar_end_has_no_next_run() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "scheduleType": "interval",
                "intervalValue": 100_000_000,
                "intervalUnit": "days",
                "startDate": "2024-01-01T00:00:00Z"
            }),
            utc("2024-01-01T00:00:00Z"),
        )
        .unwrap();

        assert_eq!(spec.next_after(utc("2023-12-31T00:00:00Z")), Some(utc("2024-01-01T00:00:00Z")));
        assert_eq!(spec.next_after(utc("2024-01-02T00:00:00Z")), None);
    }

    #[test]
    fn test_once_schedule() {
        let spec = ScheduleSpec::from_config(
            &json!({"scheduleType": "once", "runDate": "2030-05-05T10:00:00Z"}),
            Utc::now(),
        )
        .unwrap();

        let run_at = utc("2030-05-05T10:00:00Z");
        assert_eq!(spec.next_after(utc("2030-01-01T00:00:00Z")), Some(run_at));
        assert_eq!(spec.next_after(run_at), None);
        assert_eq!(spec.upcoming(utc("2030-01-01T00:00:00Z"), 5), vec![run_at]);
    }

    #[test]
    fn test_once_requires_parsable_date() {
        let err = ScheduleSpec::from_config(&json!({"scheduleType": "once"}), Utc::now()).unwrap_err();
        assert_eq!(err, ConfigError::MissingField("runDate".to_string()));

        let err = ScheduleSpec::from_config(
            &json!({"scheduleType": "once", "runDate": "next tuesday"}),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldValue { .. }));
    }

    #[test]
    fn test_naive_run_date_uses_timezone() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "scheduleType": "once",
                "runDate": "2030-05-05 10:00:00",
                "timezone": "Europe/Paris"
            }),
            Utc::now(),
        )
        .unwrap();

        // CEST is UTC+2 in May
        assert_eq!(
            spec.next_after(utc("2030-01-01T00:00:00Z")),
            Some(utc("2030-05-05T08:00:00Z"))
        );
    }

    #[test]
    fn test_end_date_exhausts_schedule() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "scheduleType": "cron",
                "cronExpression": "0 0 * * *",
                "endDate": "2024-01-03T00:00:00Z"
            }),
            Utc::now(),
        )
        .unwrap();

        let runs = spec.upcoming(utc("2024-01-01T00:00:00Z"), 10);
        assert_eq!(
            runs,
            vec![utc("2024-01-02T00:00:00Z"), utc("2024-01-03T00:00:00Z")]
        );
    }

    #[test]
    fn test_start_date_delays_cron() {
        let spec = ScheduleSpec::from_config(
            &json!({
                "scheduleType": "cron",
                "cronExpression": "0 0 * * *",
                "startDate": "2024-02-01T00:00:00Z"
            }),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(
            spec.next_after(utc("2024-01-01T00:00:00Z")),
            Some(utc("2024-02-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_unknown_schedule_type() {
        let err = ScheduleSpec::from_config(&json!({"scheduleType": "lunar"}), Utc::now()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldValue { .. }));

        let err = ScheduleSpec::from_config(&json!({"cronExpression": "* * * * *"}), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidShape { .. }));
    }

    #[test]
    fn test_upcoming_is_side_effect_free() {
        let spec = ScheduleSpec::from_config(
            &json!({"scheduleType": "cron", "cronExpression": "*/10 * * * *"}),
            Utc::now(),
        )
        .unwrap();

        let from = utc("2024-01-01T00:01:00Z");
        let first = spec.upcoming(from, 3);
        let second = spec.upcoming(from, 3);
        assert_eq!(first, second);
        assert_eq!(first[0], utc("2024-01-01T00:10:00Z"));
        assert_eq!(first[2], utc("2024-01-01T00:30:00Z"));
    }
}
