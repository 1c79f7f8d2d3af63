use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use icu::calendar::Date as IcuDate;
use icu::calendar::cal::{HijriUmmAlQura, Iso, Persian};
use icu::datetime::DateTimeFormatter;
use icu::datetime::fieldsets::YMD;
use icu::locale::Locale;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const TIMEZONE_CONFIG_FILE: &str = "remind-time.toml";
const TIMEZONE_ENV_VAR: &str = "REMIND_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str = "REMIND_TIME_CONFIG";
const DEFAULT_TIMEZONE: &str = "Asia/Tehran";

/// Calendar system an event date was authored in. The stored instant is
/// calendar-independent; the tag decides how month/day are read back for
/// anniversary comparison and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarSystem {
    Gregorian,
    Persian,
    Islamic,
}

impl CalendarSystem {
    /// Stable numeric tag used in the serialized form.
    pub fn tag(self) -> u8 {
        match self {
            Self::Gregorian => 0,
            Self::Persian => 1,
            Self::Islamic => 2,
        }
    }

    /// Total over all integers: unknown tags fall back to Gregorian
    /// rather than erroring, so a damaged record still loads.
    pub fn from_tag(tag: i64) -> Self {
        match tag {
            1 => Self::Persian,
            2 => Self::Islamic,
            _ => Self::Gregorian,
        }
    }

    pub fn parse_name(name: &str) -> anyhow::Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gregorian" | "greg" | "miladi" => Ok(Self::Gregorian),
            "persian" | "jalali" | "shamsi" | "solar" => Ok(Self::Persian),
            "islamic" | "hijri" | "ummalqura" | "lunar" => Ok(Self::Islamic),
            other => Err(anyhow!(
                "unknown calendar: {other} (expected gregorian, persian, or islamic)"
            )),
        }
    }

    fn display_locale(self) -> &'static str {
        match self {
            Self::Gregorian => "en-u-ca-gregory",
            Self::Persian => "en-u-ca-persian",
            Self::Islamic => "en-u-ca-islamic-umalqura",
        }
    }
}

impl fmt::Display for CalendarSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gregorian => "gregorian",
            Self::Persian => "persian",
            Self::Islamic => "islamic",
        };
        write!(f, "{name}")
    }
}

impl Serialize for CalendarSystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.tag())
    }
}

impl<'de> Deserialize<'de> for CalendarSystem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = i64::deserialize(deserializer)?;
        Ok(Self::from_tag(tag))
    }
}

/// Month/day of a date as read in one calendar system. The year is
/// deliberately absent: equality of day keys is annual recurrence, not
/// exact-date equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayKey {
    pub month: u8,
    pub day: u8,
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

/// Extract the (month, day) of `date` as interpreted in `system`,
/// using the configured local timezone to pick the civil day.
pub fn day_key(date: DateTime<Utc>, system: CalendarSystem) -> anyhow::Result<DayKey> {
    let civil = to_local_date(date);
    match system {
        CalendarSystem::Gregorian => Ok(DayKey {
            month: civil.month() as u8,
            day: civil.day() as u8,
        }),
        CalendarSystem::Persian => {
            let persian = iso_from_naive(civil)?.to_calendar(Persian);
            Ok(DayKey {
                month: persian.month().ordinal as u8,
                day: persian.day_of_month().0 as u8,
            })
        }
        CalendarSystem::Islamic => {
            let hijri = iso_from_naive(civil)?.to_calendar(HijriUmmAlQura::new());
            Ok(DayKey {
                month: hijri.month().ordinal as u8,
                day: hijri.day_of_month().0 as u8,
            })
        }
    }
}

/// Interpret user-entered year/month/day components in `system` and
/// anchor the resulting civil day at local midnight. Component triples
/// that do not exist in the chosen calendar are rejected.
pub fn from_civil(
    year: i32,
    month: u8,
    day: u8,
    system: CalendarSystem,
) -> anyhow::Result<DateTime<Utc>> {
    let civil = match system {
        CalendarSystem::Gregorian => NaiveDate::from_ymd_opt(year, month as u32, day as u32)
            .ok_or_else(|| anyhow!("no such gregorian date: {year}-{month:02}-{day:02}"))?,
        CalendarSystem::Persian => {
            let date = IcuDate::try_new_persian(year, month, day)
                .map_err(|err| anyhow!("no such persian date: {year}-{month:02}-{day:02} ({err})"))?;
            naive_from_iso(date.to_iso())?
        }
        CalendarSystem::Islamic => {
            let date = IcuDate::try_new_ummalqura(year, month, day)
                .map_err(|err| anyhow!("no such islamic date: {year}-{month:02}-{day:02} ({err})"))?;
            naive_from_iso(date.to_iso())?
        }
    };

    local_midnight_utc(civil, "event date")
}

/// Medium-length, locale-aware rendering of `date` in `system`.
pub fn format_civil(date: DateTime<Utc>, system: CalendarSystem) -> anyhow::Result<String> {
    let iso = iso_from_naive(to_local_date(date))?;
    let locale: Locale = system
        .display_locale()
        .parse()
        .map_err(|err| anyhow!("bad display locale for {system}: {err}"))?;
    let formatter = DateTimeFormatter::try_new((&locale).into(), YMD::medium())
        .map_err(|err| anyhow!("failed to load {system} date formatter: {err}"))?;
    Ok(formatter.format(&iso).to_string())
}

/// Parse a date expression for the CLI: `today`, `tomorrow`, or a
/// `Y-M-D` triple read in `system`.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_civil_date(
    input: &str,
    system: CalendarSystem,
    now: DateTime<Utc>,
) -> anyhow::Result<DateTime<Utc>> {
    let token = input.trim();

    match token.to_ascii_lowercase().as_str() {
        "today" => return local_midnight_utc(to_local_date(now), "today"),
        "tomorrow" => {
            let today = local_midnight_utc(to_local_date(now), "tomorrow")?;
            return Ok(today + Duration::days(1));
        }
        _ => {}
    }

    let ymd_re = Regex::new(r"^(\d{1,4})-(\d{1,2})-(\d{1,2})$")
        .map_err(|err| anyhow!("internal regex compile failure: {err}"))?;
    let caps = ymd_re.captures(token).ok_or_else(|| {
        anyhow!("unrecognized date expression: {input} (expected today, tomorrow, or Y-M-D)")
    })?;

    let year: i32 = caps[1].parse().context("invalid year component")?;
    let month: u8 = caps[2].parse().context("invalid month component")?;
    let day: u8 = caps[3].parse().context("invalid day component")?;

    from_civil(year, month, day, system)
}

fn iso_from_naive(date: NaiveDate) -> anyhow::Result<IcuDate<Iso>> {
    IcuDate::try_new_iso(date.year(), date.month() as u8, date.day() as u8)
        .map_err(|err| anyhow!("date outside supported range: {date} ({err})"))
}

fn naive_from_iso(iso: IcuDate<Iso>) -> anyhow::Result<NaiveDate> {
    let year = iso.year().era_year_or_related_iso();
    NaiveDate::from_ymd_opt(year, iso.month().ordinal as u32, iso.day_of_month().0 as u32)
        .ok_or_else(|| anyhow!("converted date out of range: {year}"))
}

pub fn local_timezone() -> &'static Tz {
    static LOCAL_TZ: OnceLock<Tz> = OnceLock::new();
    LOCAL_TZ.get_or_init(resolve_local_timezone)
}

/// Civil day of `dt` in the configured local timezone.
#[must_use]
pub fn to_local_date(dt: DateTime<Utc>) -> NaiveDate {
    dt.with_timezone(local_timezone()).date_naive()
}

/// UTC instant of local midnight on `date`. Ambiguous local times take
/// the earliest mapping; nonexistent ones are an error.
pub fn local_midnight_utc(date: NaiveDate, context: &str) -> anyhow::Result<DateTime<Utc>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("failed to construct midnight for {context}"))?;

    match local_timezone().from_local_datetime(&midnight) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => {
            tracing::warn!(
                context,
                first = %first,
                second = %second,
                "ambiguous local midnight; using earliest"
            );
            let chosen = if first <= second { first } else { second };
            Ok(chosen.with_timezone(&Utc))
        }
        LocalResult::None => Err(anyhow!(
            "local midnight does not exist in configured timezone: {context}"
        )),
    }
}

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
    timezone: Option<String>,
    time: Option<TimezoneSection>,
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
    timezone: Option<String>,
}

fn resolve_local_timezone() -> Tz {
    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
        && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
    {
        return tz;
    }

    if let Some(path) = timezone_config_path()
        && let Some(tz) = load_timezone_from_file(&path)
    {
        return tz;
    }

    parse_timezone(DEFAULT_TIMEZONE, "DEFAULT_TIMEZONE").unwrap_or_else(|| {
        tracing::error!("failed to parse fallback timezone; using UTC");
        chrono_tz::UTC
    })
}

fn timezone_config_path() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(TIMEZONE_CONFIG_ENV_VAR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(TIMEZONE_CONFIG_FILE))
}

fn load_timezone_from_file(path: &PathBuf) -> Option<Tz> {
    if !path.exists() {
        tracing::debug!(file = %path.display(), "timezone config file not found");
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(
                file = %path.display(),
                error = %err,
                "failed reading timezone config file"
            );
            return None;
        }
    };

    let parsed = match toml::from_str::<TimezoneConfig>(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::error!(
                file = %path.display(),
                error = %err,
                "failed parsing timezone config file"
            );
            return None;
        }
    };

    let timezone = parsed
        .timezone
        .or_else(|| parsed.time.and_then(|section| section.timezone));
    let Some(timezone) = timezone else {
        tracing::warn!(
            file = %path.display(),
            "timezone config had no timezone field"
        );
        return None;
    };

    parse_timezone(timezone.as_str(), &format!("file:{}", path.display()))
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured local timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(
                source,
                timezone = %trimmed,
                error = %err,
                "failed to parse timezone id"
            );
            None
        }
    }
}

pub mod stored_date_serde {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const STORED_FORMAT: &str = "%Y%m%dT%H%M%SZ";

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(STORED_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, STORED_FORMAT)
            .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{CalendarSystem, DayKey, day_key, from_civil, parse_civil_date};
    use chrono::{TimeZone, Utc};

    #[test]
    fn unknown_tags_fall_back_to_gregorian() {
        assert_eq!(CalendarSystem::from_tag(0), CalendarSystem::Gregorian);
        assert_eq!(CalendarSystem::from_tag(1), CalendarSystem::Persian);
        assert_eq!(CalendarSystem::from_tag(2), CalendarSystem::Islamic);
        assert_eq!(CalendarSystem::from_tag(7), CalendarSystem::Gregorian);
        assert_eq!(CalendarSystem::from_tag(-1), CalendarSystem::Gregorian);
    }

    #[test]
    fn persian_new_year_maps_to_march() {
        // 1 Farvardin 1399 fell on 2020-03-20.
        let nowruz = from_civil(1399, 1, 1, CalendarSystem::Persian).expect("valid persian date");
        let gregorian = day_key(nowruz, CalendarSystem::Gregorian).expect("gregorian key");
        assert_eq!(gregorian, DayKey { month: 3, day: 20 });
        let persian = day_key(nowruz, CalendarSystem::Persian).expect("persian key");
        assert_eq!(persian, DayKey { month: 1, day: 1 });
    }

    #[test]
    fn ummalqura_ramadan_start_1445() {
        // 1 Ramadan 1445 AH fell on 2024-03-11.
        let ramadan = from_civil(1445, 9, 1, CalendarSystem::Islamic).expect("valid hijri date");
        let hijri = day_key(ramadan, CalendarSystem::Islamic).expect("hijri key");
        assert_eq!(hijri, DayKey { month: 9, day: 1 });
        let gregorian = day_key(ramadan, CalendarSystem::Gregorian).expect("gregorian key");
        assert_eq!(gregorian, DayKey { month: 3, day: 11 });
    }

    #[test]
    fn civil_roundtrip_preserves_day_key() {
        for (system, year) in [
            (CalendarSystem::Gregorian, 2024),
            (CalendarSystem::Persian, 1402),
            (CalendarSystem::Islamic, 1445),
        ] {
            let date = from_civil(year, 7, 15, system).expect("valid date");
            let key = day_key(date, system).expect("day key");
            assert_eq!(key, DayKey { month: 7, day: 15 }, "roundtrip for {system}");
        }
    }

    #[test]
    fn rejects_nonexistent_component_triples() {
        // Mehr (month 7) has 30 days.
        assert!(from_civil(1402, 7, 31, CalendarSystem::Persian).is_err());
        assert!(from_civil(2023, 2, 29, CalendarSystem::Gregorian).is_err());
        assert!(from_civil(1445, 13, 1, CalendarSystem::Islamic).is_err());
    }

    #[test]
    fn parses_ymd_expression_in_selected_calendar() {
        let now = Utc
            .with_ymd_and_hms(2026, 2, 17, 12, 0, 0)
            .single()
            .expect("valid now");
        let parsed =
            parse_civil_date("1403-01-01", CalendarSystem::Persian, now).expect("parse persian");
        let key = day_key(parsed, CalendarSystem::Persian).expect("persian key");
        assert_eq!(key, DayKey { month: 1, day: 1 });

        assert!(parse_civil_date("next week", CalendarSystem::Gregorian, now).is_err());
    }

    #[test]
    fn today_expression_is_todays_key() {
        let now = Utc::now();
        let parsed = parse_civil_date("today", CalendarSystem::Gregorian, now).expect("today");
        assert_eq!(
            day_key(parsed, CalendarSystem::Gregorian).expect("key"),
            day_key(now, CalendarSystem::Gregorian).expect("key")
        );
    }
}
