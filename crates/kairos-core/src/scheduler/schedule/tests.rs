use super::*;
use chrono::{Datelike, TimeZone, Timelike, Weekday};

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

#[test]
fn test_nightly_cron_fires_same_day_before_23() {
    let trigger = Trigger::parse("0 23 * * *").unwrap();
    let next = trigger.next_fire_after(at(2026, 3, 10, 14, 5, 0)).unwrap();
    assert_eq!(next, at(2026, 3, 10, 23, 0, 0));
}

#[test]
fn test_nightly_cron_rolls_to_next_day_after_23() {
    let trigger = Trigger::parse("0 23 * * *").unwrap();
    let next = trigger.next_fire_after(at(2026, 3, 10, 23, 30, 0)).unwrap();
    assert_eq!(next, at(2026, 3, 11, 23, 0, 0));
}

#[test]
fn test_cron_is_strictly_after_reference() {
    let trigger = Trigger::parse("0 23 * * *").unwrap();
    let next = trigger.next_fire_after(at(2026, 3, 10, 23, 0, 0)).unwrap();
    assert_eq!(next, at(2026, 3, 11, 23, 0, 0));
}

#[test]
fn test_cron_steps_and_lists() {
    let every_15 = Trigger::parse("*/15 * * * *").unwrap();
    let next = every_15.next_fire_after(at(2026, 2, 22, 10, 2, 0)).unwrap();
    assert_eq!(next, at(2026, 2, 22, 10, 15, 0));

    let listed = Trigger::parse("5,35 8 * * *").unwrap();
    let next = listed.next_fire_after(at(2026, 2, 22, 8, 10, 0)).unwrap();
    assert_eq!(next, at(2026, 2, 22, 8, 35, 0));
}

#[test]
fn test_cron_numeric_weekday_uses_sunday_zero() {
    // 2026-03-10 is a Tuesday
    let monday = Trigger::parse("0 9 * * 1").unwrap();
    let next = monday.next_fire_after(at(2026, 3, 10, 0, 0, 0)).unwrap();
    assert_eq!(next.weekday(), Weekday::Mon);
    assert_eq!(next, at(2026, 3, 16, 9, 0, 0));

    let sunday = Trigger::parse("0 9 * * 0").unwrap();
    let sunday_seven = Trigger::parse("0 9 * * 7").unwrap();
    let from = at(2026, 3, 10, 0, 0, 0);
    assert_eq!(sunday.next_fire_after(from), sunday_seven.next_fire_after(from));
    assert_eq!(sunday.next_fire_after(from).unwrap().weekday(), Weekday::Sun);
}

#[test]
fn test_cron_weekday_range() {
    let weekdays = Trigger::parse("30 7 * * 1-5").unwrap();
    // Friday evening -> Monday morning
    let next = weekdays.next_fire_after(at(2026, 3, 13, 20, 0, 0)).unwrap();
    assert_eq!(next, at(2026, 3, 16, 7, 30, 0));

    let weekend = Trigger::parse("0 10 * * 6-7").unwrap();
    let next = weekend.next_fire_after(at(2026, 3, 14, 11, 0, 0)).unwrap();
    assert_eq!(next.weekday(), Weekday::Sun);
}

#[test]
fn test_cron_weekday_step_without_range() {
    // Mon, Wed, Fri
    let alternate = Trigger::parse("0 0 * * 1/2").unwrap();
    let mut from = at(2026, 3, 10, 0, 0, 0);
    let mut fired = Vec::new();
    for _ in 0..4 {
        from = alternate.next_fire_after(from).unwrap();
        fired.push(from);
    }
    assert_eq!(
        fired,
        vec![
            at(2026, 3, 11, 0, 0, 0),
            at(2026, 3, 13, 0, 0, 0),
            at(2026, 3, 16, 0, 0, 0),
            at(2026, 3, 18, 0, 0, 0),
        ]
    );

    // Sun, Tue, Thu, Sat
    let from_sunday = Trigger::parse("0 0 * * 0/2").unwrap();
    let next = from_sunday.next_fire_after(at(2026, 3, 10, 0, 0, 0)).unwrap();
    assert_eq!(next.weekday(), Weekday::Thu);

    let saturday = Trigger::parse("0 0 * * 6/3").unwrap();
    let next = saturday.next_fire_after(at(2026, 3, 10, 0, 0, 0)).unwrap();
    assert_eq!(next, at(2026, 3, 14, 0, 0, 0));
}

#[test]
fn test_cron_evaluated_in_timezone() {
    let trigger = Trigger::parse_with("0 9 * * *", chrono_tz::Asia::Seoul, Utc::now()).unwrap();
    // 09:00 KST is 00:00 UTC
    let next = trigger.next_fire_after(at(2026, 3, 10, 12, 0, 0)).unwrap();
    assert_eq!(next, at(2026, 3, 11, 0, 0, 0));
    assert_eq!(next.hour(), 0);
}

#[test]
fn test_interval_fires_every_n_seconds() {
    let anchor = at(2026, 3, 10, 12, 0, 0);
    let trigger = Trigger::parse_with("interval 5", Tz::UTC, anchor).unwrap();

    let first = trigger.next_fire_after(anchor).unwrap();
    let second = trigger.next_fire_after(first).unwrap();
    let third = trigger.next_fire_after(second).unwrap();

    assert_eq!(first, anchor + Duration::seconds(5));
    assert_eq!(second - first, Duration::seconds(5));
    assert_eq!(third - second, Duration::seconds(5));
}

#[test]
fn test_interval_skips_missed_periods() {
    let anchor = at(2026, 3, 10, 12, 0, 0);
    let trigger = Trigger::parse_with("interval 5", Tz::UTC, anchor).unwrap();

    // 23 seconds late: the next fire is on the grid, not 5 seconds from now
    let next = trigger
        .next_fire_after(anchor + Duration::seconds(23))
        .unwrap();
    assert_eq!(next, anchor + Duration::seconds(25));

    let before_anchor = trigger
        .next_fire_after(anchor - Duration::seconds(60))
        .unwrap();
    assert_eq!(before_anchor, anchor + Duration::seconds(5));
}

#[test]
fn test_invalid_expressions() {
    assert!(matches!(Trigger::parse(""), Err(ScheduleParseError::Empty)));
    assert!(matches!(Trigger::parse("   "), Err(ScheduleParseError::Empty)));
    assert!(matches!(
        Trigger::parse("daily"),
        Err(ScheduleParseError::Unrecognized { fields: 1, .. })
    ));
    assert!(matches!(
        Trigger::parse("* * * *"),
        Err(ScheduleParseError::Unrecognized { fields: 4, .. })
    ));
    assert!(matches!(
        Trigger::parse("0 0 * * * *"),
        Err(ScheduleParseError::Unrecognized { fields: 6, .. })
    ));
    assert!(matches!(
        Trigger::parse("61 * * * *"),
        Err(ScheduleParseError::InvalidCron { .. })
    ));
    assert!(matches!(
        Trigger::parse("0 9 * * 8"),
        Err(ScheduleParseError::InvalidCron { .. })
    ));
}

#[test]
fn test_invalid_intervals() {
    for expr in ["interval", "interval 0", "interval -3", "interval abc", "interval 5 10"] {
        assert!(
            matches!(Trigger::parse(expr), Err(ScheduleParseError::InvalidInterval(_))),
            "{expr} should be rejected"
        );
    }
}

#[test]
fn test_display_keeps_original_expression() {
    let trigger: Trigger = "0 23 * * *".parse().unwrap();
    assert_eq!(trigger.to_string(), "0 23 * * *");
    let trigger: Trigger = "interval 30".parse().unwrap();
    assert_eq!(trigger.expression(), "interval 30");
}
