use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use tracing::debug;

use harvest_errors::{HarvestError, HarvestResult};

/// 5段式CRON表达式（分 时 日 月 周）
///
/// 周字段接受 0-7（0 和 7 都表示周日）以及 `MON`..`SUN` 名称。
/// 日字段和周字段不能同时受限：标准 cron 对两者取“或”，而底层 cron crate 取“且”，
/// 这类表达式在解析时直接拒绝。
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> HarvestResult<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(HarvestError::invalid_schedule(format!(
                "CRON表达式必须包含5个字段，实际为{}个: '{}'",
                fields.len(),
                expression
            )));
        }

        if is_restricted(fields[2]) && is_restricted(fields[4]) {
            return Err(HarvestError::invalid_schedule(format!(
                "'{expression}': 日字段和周字段不能同时指定"
            )));
        }

        let weekday = normalize_weekday_field(fields[4]).map_err(|message| {
            HarvestError::invalid_schedule(format!("'{expression}': {message}"))
        })?;
        // cron crate 需要秒字段，固定在每分钟第0秒
        let translated = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], weekday
        );

        let schedule = Schedule::from_str(&translated).map_err(|e| {
            HarvestError::invalid_schedule(format!("'{expression}': {e}"))
        })?;

        debug!("解析CRON表达式 '{}' -> '{}'", expression, translated);
        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn validate(expression: &str) -> HarvestResult<()> {
        Self::parse(expression).map(|_| ())
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// `from` 之后（不含）的下一次触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    pub fn time_until_next(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_after(now).map(|next| next - now)
    }
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// 把标准 cron 的周字段（0=周日）转换为 cron crate 的编号（1=周日）
fn normalize_weekday_field(field: &str) -> Result<String, String> {
    let mut items = Vec::new();
    for item in field.split(',') {
        items.push(normalize_weekday_item(item)?);
    }
    Ok(items.join(","))
}

fn normalize_weekday_item(item: &str) -> Result<String, String> {
    if item.is_empty() {
        return Err("周字段存在空项".to_string());
    }
    if item.starts_with('*') || item.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(item.to_uppercase());
    }

    let (range, step) = match item.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("无效的周字段步长: {item}"))?;
            if step == 0 {
                return Err(format!("周字段步长不能为0: {item}"));
            }
            (range, Some(step))
        }
        None => (item, None),
    };

    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (parse_weekday(start)?, parse_weekday(end)?),
        None => {
            let day = parse_weekday(range)?;
            // `n/step` 表示从 n 开始到周六
            (day, if step.is_some() { 6 } else { day })
        }
    };
    if start > end {
        return Err(format!("周字段范围无效: {item}"));
    }

    let days: BTreeSet<u32> = (start..=end)
        .step_by(step.unwrap_or(1) as usize)
        .map(|day| day % 7 + 1)
        .collect();
    Ok(days
        .iter()
        .map(|day| day.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_weekday(value: &str) -> Result<u32, String> {
    let day: u32 = value
        .parse()
        .map_err(|_| format!("无效的周字段取值: {value}"))?;
    if day > 7 {
        return Err(format!("周字段取值超出范围 0-7: {day}"));
    }
    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_weekday() {
        assert_eq!(normalize_weekday_field("*").unwrap(), "*");
        assert_eq!(normalize_weekday_field("0").unwrap(), "1");
        assert_eq!(normalize_weekday_field("7").unwrap(), "1");
        assert_eq!(normalize_weekday_field("1-5").unwrap(), "2,3,4,5,6");
        assert_eq!(normalize_weekday_field("0,6").unwrap(), "1,7");
        assert_eq!(normalize_weekday_field("1-7/2").unwrap(), "1,2,4,6");
        assert_eq!(normalize_weekday_field("mon-fri").unwrap(), "MON-FRI");
        assert!(normalize_weekday_field("8").is_err());
        assert!(normalize_weekday_field("5-1").is_err());
        assert!(normalize_weekday_field("1/0").is_err());
        assert!(normalize_weekday_field("1,,2").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        let err = CronSchedule::parse("0 0 * * * *").unwrap_err();
        assert!(matches!(err, HarvestError::InvalidSchedule(_)));
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_day_of_month_with_weekday() {
        let err = CronSchedule::parse("0 0 1 * 1").unwrap_err();
        assert!(matches!(err, HarvestError::InvalidSchedule(_)));
        assert!(CronSchedule::parse("0 0 1,15 * mon-fri").is_err());

        assert!(CronSchedule::parse("0 0 1 * *").is_ok());
        assert!(CronSchedule::parse("0 0 * * 1").is_ok());
    }
}
