use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::errors::AppError;

/// Decoded trigger configuration for a job.
///
/// Jobs carry a `trigger_type` column plus a JSON `trigger_config`. An
/// `execute_now: true` key in any trigger config makes the job
/// non-schedulable: it exists only to be triggered manually.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Cron(CronSchedule),
    Interval(IntervalSchedule),
    ExecuteNow,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CronSchedule {
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub day_of_week: Option<String>,
    pub hour: Option<String>,
    pub minute: Option<String>,
    pub second: Option<String>,
}

impl CronSchedule {
    /// Render as a `sec min hour day month weekday [year]` cron expression,
    /// the shape the timer wheel parses.
    ///
    /// Unspecified sub-fields below the least significant explicit time
    /// field default to their minimum so that `hour: 9` means 09:00:00, not
    /// every second of hour nine.
    pub fn expression(&self) -> String {
        let second = self.second.clone().unwrap_or_else(|| "0".to_string());
        let minute = self.minute.clone().unwrap_or_else(|| {
            if self.hour.is_some() {
                "0".to_string()
            } else {
                "*".to_string()
            }
        });
        let hour = self.hour.clone().unwrap_or_else(|| "*".to_string());
        let day = self.day.clone().unwrap_or_else(|| "*".to_string());
        let month = self.month.clone().unwrap_or_else(|| "*".to_string());
        let day_of_week = self.day_of_week.clone().unwrap_or_else(|| "*".to_string());

        match &self.year {
            Some(year) => format!(
                "{} {} {} {} {} {} {}",
                second, minute, hour, day, month, day_of_week, year
            ),
            None => format!(
                "{} {} {} {} {} {}",
                second, minute, hour, day, month, day_of_week
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalSchedule {
    pub weeks: u64,
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl IntervalSchedule {
    pub fn duration(&self) -> Duration {
        let secs = self.weeks * 7 * 24 * 3600
            + self.days * 24 * 3600
            + self.hours * 3600
            + self.minutes * 60
            + self.seconds;
        Duration::from_secs(secs)
    }
}

impl Trigger {
    /// Strictly decode a `(trigger_type, trigger_config)` pair.
    ///
    /// Unknown keys are ignored, with one exception: `execute_now: true`
    /// anywhere in the config wins over the declared type.
    pub fn parse(trigger_type: &str, config: &Value) -> Result<Trigger, AppError> {
        let obj = config.as_object().ok_or_else(|| {
            AppError::Validation("trigger_config must be a JSON object".to_string())
        })?;

        if obj.get("execute_now").and_then(Value::as_bool) == Some(true) {
            return Ok(Trigger::ExecuteNow);
        }

        match trigger_type {
            "execute_now" => Ok(Trigger::ExecuteNow),
            "cron" => {
                if obj.get("week").is_some() {
                    warn!("Cron field 'week' has no cron-expression equivalent and is ignored");
                }
                let schedule = CronSchedule {
                    year: cron_field(obj, "year")?,
                    month: cron_field(obj, "month")?,
                    day: cron_field(obj, "day")?,
                    day_of_week: cron_field(obj, "day_of_week")?,
                    hour: cron_field(obj, "hour")?,
                    minute: cron_field(obj, "minute")?,
                    second: cron_field(obj, "second")?,
                };
                Ok(Trigger::Cron(schedule))
            }
            "interval" => {
                let schedule = IntervalSchedule {
                    weeks: interval_field(obj, "weeks")?,
                    days: interval_field(obj, "days")?,
                    hours: interval_field(obj, "hours")?,
                    minutes: interval_field(obj, "minutes")?,
                    seconds: interval_field(obj, "seconds")?,
                };
                if schedule.duration().is_zero() {
                    return Err(AppError::Validation(
                        "interval trigger requires at least one non-zero duration field"
                            .to_string(),
                    ));
                }
                Ok(Trigger::Interval(schedule))
            }
            other => Err(AppError::Validation(format!(
                "Unknown trigger type: {}",
                other
            ))),
        }
    }
}

/// Cron fields accept numbers (`9`) or expression strings (`"*/5"`, `"mon-fri"`).
fn cron_field(
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<String>, AppError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(AppError::Validation(format!(
            "Cron field '{}' must be a string or number, got {}",
            key, other
        ))),
    }
}

fn interval_field(obj: &serde_json::Map<String, Value>, key: &str) -> Result<u64, AppError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            AppError::Validation(format!(
                "Interval field '{}' must be a non-negative integer",
                key
            ))
        }),
        Some(other) => Err(AppError::Validation(format!(
            "Interval field '{}' must be an integer, got {}",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cron_expression_defaults_sub_fields() {
        let trigger = Trigger::parse("cron", &json!({"hour": 9})).unwrap();
        match trigger {
            Trigger::Cron(schedule) => assert_eq!(schedule.expression(), "0 0 9 * * *"),
            other => panic!("expected cron trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_cron_accepts_expression_strings() {
        let trigger =
            Trigger::parse("cron", &json!({"minute": "*/5", "day_of_week": "mon-fri"})).unwrap();
        match trigger {
            Trigger::Cron(schedule) => assert_eq!(schedule.expression(), "0 */5 * * * mon-fri"),
            other => panic!("expected cron trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_cron_with_year() {
        let trigger = Trigger::parse(
            "cron",
            &json!({"year": 2030, "month": 1, "day": 1, "hour": 0}),
        )
        .unwrap();
        match trigger {
            Trigger::Cron(schedule) => assert_eq!(schedule.expression(), "0 0 0 1 1 * 2030"),
            other => panic!("expected cron trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_interval_duration() {
        let trigger = Trigger::parse("interval", &json!({"minutes": 5, "seconds": 30})).unwrap();
        match trigger {
            Trigger::Interval(schedule) => {
                assert_eq!(schedule.duration(), Duration::from_secs(330))
            }
            other => panic!("expected interval trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_interval_requires_non_zero_duration() {
        assert!(Trigger::parse("interval", &json!({})).is_err());
        assert!(Trigger::parse("interval", &json!({"seconds": 0})).is_err());
    }

    #[test]
    fn test_execute_now_wins_over_declared_type() {
        let trigger =
            Trigger::parse("interval", &json!({"seconds": 10, "execute_now": true})).unwrap();
        assert_eq!(trigger, Trigger::ExecuteNow);
    }

    #[test]
    fn test_execute_now_type() {
        assert_eq!(
            Trigger::parse("execute_now", &json!({"execute_now": true})).unwrap(),
            Trigger::ExecuteNow
        );
    }

    #[test]
    fn test_unknown_trigger_type_rejected() {
        assert!(Trigger::parse("hourly", &json!({})).is_err());
    }

    #[test]
    fn test_non_object_config_rejected() {
        assert!(Trigger::parse("cron", &json!("0 9 * * *")).is_err());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let trigger = Trigger::parse("interval", &json!({"seconds": 2, "jitter": 5})).unwrap();
        match trigger {
            Trigger::Interval(schedule) => {
                assert_eq!(schedule.duration(), Duration::from_secs(2))
            }
            other => panic!("expected interval trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_interval_rejected() {
        assert!(Trigger::parse("interval", &json!({"seconds": -3})).is_err());
    }
}
