use chrono::{DateTime, Utc};
use tracing::warn;

use crate::calendar::day_key;
use crate::event::Event;

/// True when today's month/day equal the event's month/day, both read in
/// the event's own calendar system. Islamic events compare Umm al-Qura
/// components on both sides; the lunar drift against the Gregorian
/// calendar rules out any Gregorian month/day proxy.
///
/// Anchors on leap-only days (Feb 29, Esfand 30, 30 Dhu al-Hijja) match
/// strictly: in years lacking the day there is no match and no
/// nearest-day fallback.
pub fn is_recurring_today(event: &Event, today: DateTime<Utc>) -> bool {
    let today_key = match day_key(today, event.calendar) {
        Ok(key) => key,
        Err(err) => {
            warn!(uuid = %event.uuid, error = %err, "could not read today in event calendar");
            return false;
        }
    };
    let event_key = match day_key(event.date, event.calendar) {
        Ok(key) => key,
        Err(err) => {
            warn!(uuid = %event.uuid, error = %err, "could not read event date in event calendar");
            return false;
        }
    };

    today_key == event_key
}

/// Filter `events` down to those recurring today. Input order is
/// preserved; no sorting is applied.
pub fn events_matching_today(events: &[Event], today: DateTime<Utc>) -> Vec<&Event> {
    events
        .iter()
        .filter(|event| is_recurring_today(event, today))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Utc};

    use super::{events_matching_today, is_recurring_today};
    use crate::calendar::{CalendarSystem, DayKey, day_key, from_civil, to_local_date};
    use crate::event::Event;

    fn event_on(
        year: i32,
        month: u8,
        day: u8,
        calendar: CalendarSystem,
        title: &str,
    ) -> Event {
        let date = from_civil(year, month, day, calendar).expect("valid event date");
        Event::new(
            title.to_string(),
            date,
            calendar,
            vec!["Alice".to_string()],
            Utc::now(),
        )
        .expect("valid event")
    }

    #[test]
    fn gregorian_same_month_day_matches_any_year() {
        let today = Utc::now();
        let local = to_local_date(today);
        let event = event_on(
            local.year() - 4,
            local.month() as u8,
            local.day() as u8,
            CalendarSystem::Gregorian,
            "Birthday",
        );
        assert!(is_recurring_today(&event, today));
    }

    #[test]
    fn gregorian_other_day_does_not_match() {
        let event = event_on(2020, 3, 21, CalendarSystem::Gregorian, "Birthday");
        let elsewhere = from_civil(2026, 5, 10, CalendarSystem::Gregorian).expect("valid date");
        assert!(!is_recurring_today(&event, elsewhere));
    }

    #[test]
    fn persian_new_year_recurs_on_later_nowruz() {
        // Stored around Nowruz 1399 (2020-03-20), tagged Persian.
        let event = event_on(1399, 1, 1, CalendarSystem::Persian, "Nowruz");

        // 1 Farvardin 1405 falls on 2026-03-21: a different Gregorian
        // day than the anchor, but the same Persian day key.
        let later_nowruz = from_civil(1405, 1, 1, CalendarSystem::Persian).expect("valid date");
        assert_eq!(
            day_key(later_nowruz, CalendarSystem::Gregorian).expect("key"),
            DayKey { month: 3, day: 21 }
        );
        assert!(is_recurring_today(&event, later_nowruz));

        // One Persian day later: no match.
        let off_by_one = from_civil(1405, 1, 2, CalendarSystem::Persian).expect("valid date");
        assert!(!is_recurring_today(&event, off_by_one));
    }

    #[test]
    fn islamic_match_ignores_gregorian_components() {
        // 1 Ramadan 1445 = 2024-03-11; 1 Ramadan 1446 = 2025-03-01.
        let event = event_on(1445, 9, 1, CalendarSystem::Islamic, "Ramadan");
        let next_ramadan = from_civil(1446, 9, 1, CalendarSystem::Islamic).expect("valid date");

        let anchor_gregorian = day_key(event.date, CalendarSystem::Gregorian).expect("key");
        let today_gregorian = day_key(next_ramadan, CalendarSystem::Gregorian).expect("key");
        assert_ne!(anchor_gregorian, today_gregorian);

        assert!(is_recurring_today(&event, next_ramadan));
    }

    #[test]
    fn leap_only_anchor_skips_common_years() {
        // Esfand 30 exists only in Persian leap years; 1403 is one.
        let event = event_on(1403, 12, 30, CalendarSystem::Persian, "Leap day");

        // 1404 is a common year: Esfand ends on the 29th, and the next
        // day is 1 Farvardin 1405. Neither matches the anchor.
        let esfand_29 = from_civil(1404, 12, 29, CalendarSystem::Persian).expect("valid date");
        assert!(!is_recurring_today(&event, esfand_29));
        let nowruz = from_civil(1405, 1, 1, CalendarSystem::Persian).expect("valid date");
        assert!(!is_recurring_today(&event, nowruz));
    }

    #[test]
    fn matching_today_is_empty_for_empty_input() {
        let matches = events_matching_today(&[], Utc::now());
        assert!(matches.is_empty());
    }

    #[test]
    fn matching_today_preserves_input_order() {
        let today = Utc::now();
        let local = to_local_date(today);
        let (month, day) = (local.month() as u8, local.day() as u8);

        let first = event_on(2018, month, day, CalendarSystem::Gregorian, "First");
        // A different Gregorian month can never share today's day key.
        let miss = event_on(2019, (month % 12) + 1, 1, CalendarSystem::Gregorian, "Miss");
        let second = event_on(2022, month, day, CalendarSystem::Gregorian, "Second");

        let events = vec![first.clone(), miss, second.clone()];
        let matches = events_matching_today(&events, today);

        let uuids: Vec<_> = matches.iter().map(|event| event.uuid).collect();
        assert_eq!(uuids, vec![first.uuid, second.uuid]);
    }
}
