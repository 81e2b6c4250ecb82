//! Repeat schedules
//!
//! Accepts standard 5-field cron, 6-field cron with seconds, and a few
//! readable forms:
//!
//! - "every N seconds" / "every N minutes" / "every N hours"
//! - "every minute", "every hour", "every day" (also "hourly", "daily")
//! - "every day at HH:MM"

use chrono::{DateTime, Utc};

use super::backend::QueueError;

fn invalid(pattern: &str, reason: impl Into<String>) -> QueueError {
    QueueError::InvalidSchedule {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

/// Normalize a repeat pattern to a 6-field cron expression
pub fn normalize_pattern(pattern: &str) -> Result<String, QueueError> {
    let trimmed = pattern.trim();

    let fields = trimmed.split_whitespace().count();
    if fields == 5 {
        return Ok(format!("0 {trimmed}"));
    }
    if fields == 6 {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "every minute" | "minutely" => return Ok("0 * * * * *".to_string()),
        "every hour" | "hourly" => return Ok("0 0 * * * *".to_string()),
        "every day" | "daily" => return Ok("0 0 0 * * *".to_string()),
        _ => {}
    }

    let Some(rest) = lower.strip_prefix("every ") else {
        return Err(invalid(pattern, "unrecognized format"));
    };

    if let Some(at) = rest.strip_prefix("day at ") {
        let (hour, minute) = at
            .split_once(':')
            .ok_or_else(|| invalid(pattern, "expected HH:MM"))?;
        let hour: u32 = hour
            .trim()
            .parse()
            .map_err(|_| invalid(pattern, "invalid hour"))?;
        let minute: u32 = minute
            .trim()
            .parse()
            .map_err(|_| invalid(pattern, "invalid minute"))?;
        if hour >= 24 || minute >= 60 {
            return Err(invalid(pattern, "time out of range"));
        }
        return Ok(format!("0 {minute} {hour} * * *"));
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    let [count, unit] = words.as_slice() else {
        return Err(invalid(pattern, "unrecognized format"));
    };
    let n: u32 = count
        .parse()
        .map_err(|_| invalid(pattern, "interval is not a number"))?;
    if n == 0 {
        return Err(invalid(pattern, "interval must be > 0"));
    }

    match unit.trim_end_matches('s') {
        "second" => Ok(format!("*/{n} * * * * *")),
        "minute" => Ok(format!("0 */{n} * * * *")),
        "hour" => Ok(format!("0 0 */{n} * * *")),
        other => Err(invalid(pattern, format!("unknown unit '{other}'"))),
    }
}

/// First occurrence of `pattern` strictly after `after`
pub fn next_occurrence(pattern: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
    let expr = normalize_pattern(pattern)?;
    let cron = expr
        .parse::<croner::Cron>()
        .map_err(|e| invalid(pattern, e.to_string()))?;

    cron.iter_after(after)
        .next()
        .ok_or_else(|| invalid(pattern, "no future occurrence"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_pattern("*/15 * * * *").unwrap(), "0 */15 * * * *");
        assert_eq!(normalize_pattern("*/5 * * * * *").unwrap(), "*/5 * * * * *");
        assert_eq!(normalize_pattern("every 5 minutes").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_pattern("Every 2 Hours").unwrap(), "0 0 */2 * * *");
        assert_eq!(normalize_pattern("hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_pattern("every day at 9:30").unwrap(), "0 30 9 * * *");
    }

    #[test]
    fn test_normalize_rejects() {
        for bad in ["", "sometimes", "every 0 minutes", "every day at 25:00", "every 3 weeks"] {
            assert!(
                matches!(normalize_pattern(bad), Err(QueueError::InvalidSchedule { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_next_occurrence() {
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 10, 7, 0).unwrap();
        assert_eq!(
            next_occurrence("*/15 * * * *", after).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
        );
        assert_eq!(
            next_occurrence("every day at 08:00", after).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_occurrence_is_strictly_after() {
        let on_tick = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(
            next_occurrence("*/15 * * * *", on_tick).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
        );
    }
}
