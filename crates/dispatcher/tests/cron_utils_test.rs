#[cfg(test)]
mod cron_utils_tests {
    use harvest_dispatcher::cron_utils::*;
    use harvest_errors::HarvestError;

    use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};

    #[test]
    fn test_cron_schedule_creation() {
        assert!(CronSchedule::parse("*/5 * * * *").is_ok());
        assert!(CronSchedule::parse("0 9 * * MON-FRI").is_ok());
        assert!(CronSchedule::parse("30 2 1 * *").is_ok());

        for invalid in ["invalid", "", "0 0 0 * * *", "60 * * * *", "0 24 * * *", "0 0 32 * *"] {
            let err = CronSchedule::parse(invalid).unwrap_err();
            assert!(
                matches!(err, HarvestError::InvalidSchedule(_)),
                "{invalid}: {err:?}"
            );
        }
    }

    #[test]
    fn test_next_after() {
        let schedule = CronSchedule::parse("0 0 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(now).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_next_after_is_exclusive() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let on_the_minute = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = schedule.next_after(on_the_minute).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn test_upcoming() {
        let schedule = CronSchedule::parse("0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let upcoming = schedule.upcoming(now, 3);

        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[0].hour(), 13);
        assert_eq!(upcoming[1].hour(), 14);
        assert_eq!(upcoming[2].hour(), 15);
    }

    #[test]
    fn test_time_until_next() {
        let schedule = CronSchedule::parse("0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let until = schedule.time_until_next(now).unwrap();
        assert_eq!(until.num_minutes(), 30);
    }

    #[test]
    fn test_numeric_weekdays_follow_standard_cron() {
        // 2024-01-01 是周一
        let monday = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let sunday = CronSchedule::parse("0 9 * * 0").unwrap();
        assert_eq!(sunday.next_after(monday).unwrap().weekday(), Weekday::Sun);

        let sunday_alias = CronSchedule::parse("0 9 * * 7").unwrap();
        assert_eq!(
            sunday_alias.next_after(monday).unwrap(),
            sunday.next_after(monday).unwrap()
        );

        let weekdays = CronSchedule::parse("0 9 * * 1-5").unwrap();
        let days: Vec<Weekday> = weekdays
            .upcoming(monday, 5)
            .iter()
            .map(|time| time.weekday())
            .collect();
        assert_eq!(
            days,
            vec![
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Mon
            ]
        );

        let named = CronSchedule::parse("0 9 * * MON-FRI").unwrap();
        assert_eq!(named.upcoming(monday, 5), weekdays.upcoming(monday, 5));
    }

    #[test]
    fn test_expression_is_kept() {
        let schedule = CronSchedule::parse("  */15 * * * *  ").unwrap();
        assert_eq!(schedule.expression(), "*/15 * * * *");
        assert!(CronSchedule::validate("0 0 * * 8").is_err());
    }
}
