use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calendar::{CalendarSystem, day_key};
use crate::config::Config;
use crate::event::Event;

pub const REMINDER_TITLE: &str = "Reminder";

/// Both daily trigger times, local: midnight and noon.
pub const REMINDER_HOURS: [u8; 2] = [0, 12];

/// Deduplication key for a trigger registration. The display form
/// `<uuid>-<HHMM>` is the registration identifier; keeping it stable is
/// what makes re-scheduling after a restart replace instead of
/// duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub event: Uuid,
    pub hour: u8,
    pub minute: u8,
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}{:02}", self.event, self.hour, self.minute)
    }
}

/// When a trigger fires: annually, on `month`/`day` as read in
/// `calendar`, at `hour`:`minute` local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub calendar: CalendarSystem,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

impl NotificationContent {
    pub fn for_event(event: &Event) -> Self {
        Self {
            title: REMINDER_TITLE.to_string(),
            body: format!("{} - {}", event.contact_line(), event.title),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub identifier: String,
    pub spec: TriggerSpec,
    pub content: NotificationContent,
}

/// The notification-delivery collaborator. Registration is
/// fire-and-forget: the core never hears back about delivery. A request
/// whose identifier is already registered replaces the old one.
pub trait NotificationGateway {
    fn register(&mut self, request: TriggerRequest) -> anyhow::Result<()>;
    fn cancel(&mut self, identifier: &str) -> anyhow::Result<()>;
}

/// Default gateway: a JSONL ledger of registered triggers in the data
/// directory, standing in for a platform notification center.
#[derive(Debug)]
pub struct FileGateway {
    pub triggers_path: PathBuf,
}

impl FileGateway {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let triggers_path = data_dir.join("triggers.data");
        if !triggers_path.exists() {
            fs::write(&triggers_path, "")
                .with_context(|| format!("failed to create {}", triggers_path.display()))?;
        }
        info!(triggers = %triggers_path.display(), "opened trigger ledger");
        Ok(Self { triggers_path })
    }

    pub fn registered(&self) -> anyhow::Result<Vec<TriggerRequest>> {
        load_jsonl(&self.triggers_path).context("failed to load triggers.data")
    }
}

impl NotificationGateway for FileGateway {
    #[tracing::instrument(skip(self, request), fields(identifier = %request.identifier))]
    fn register(&mut self, request: TriggerRequest) -> anyhow::Result<()> {
        let mut triggers = self.registered()?;
        if let Some(existing) = triggers
            .iter_mut()
            .find(|t| t.identifier == request.identifier)
        {
            debug!("replacing registered trigger");
            *existing = request;
        } else {
            triggers.push(request);
        }
        save_jsonl_atomic(&self.triggers_path, &triggers).context("failed to save triggers.data")
    }

    #[tracing::instrument(skip(self))]
    fn cancel(&mut self, identifier: &str) -> anyhow::Result<()> {
        let mut triggers = self.registered()?;
        let before = triggers.len();
        triggers.retain(|t| t.identifier != identifier);
        if triggers.len() == before {
            debug!("no trigger registered under identifier");
            return Ok(());
        }
        save_jsonl_atomic(&self.triggers_path, &triggers).context("failed to save triggers.data")
    }
}

/// Registers the two annual reminder triggers for an event. Failures
/// from the gateway are logged and swallowed: the event stays valid and
/// stored whether or not registration succeeded.
pub struct ReminderScheduler<'a> {
    gateway: &'a mut dyn NotificationGateway,
    enabled: bool,
}

impl<'a> ReminderScheduler<'a> {
    pub fn new(cfg: &Config, gateway: &'a mut dyn NotificationGateway) -> Self {
        let enabled = cfg.get_bool("notifications").unwrap_or(true);
        debug!(enabled, "initialized reminder scheduler");
        Self { gateway, enabled }
    }

    #[tracing::instrument(skip(self, event), fields(uuid = %event.uuid))]
    pub fn schedule(&mut self, event: &Event) {
        if !self.enabled {
            debug!("notifications disabled; skipping registration");
            return;
        }

        let anchor = match day_key(event.date, event.calendar) {
            Ok(key) => key,
            Err(err) => {
                warn!(error = %err, "could not derive trigger day; event left unscheduled");
                return;
            }
        };
        let content = NotificationContent::for_event(event);

        for hour in REMINDER_HOURS {
            let key = TriggerKey {
                event: event.uuid,
                hour,
                minute: 0,
            };
            let request = TriggerRequest {
                identifier: key.to_string(),
                spec: TriggerSpec {
                    calendar: event.calendar,
                    month: anchor.month,
                    day: anchor.day,
                    hour,
                    minute: 0,
                },
                content: content.clone(),
            };
            if let Err(err) = self.gateway.register(request) {
                warn!(identifier = %key, error = %err, "trigger registration failed");
            }
        }
    }

    #[tracing::instrument(skip(self, event), fields(uuid = %event.uuid))]
    pub fn cancel(&mut self, event: &Event) {
        for hour in REMINDER_HOURS {
            let key = TriggerKey {
                event: event.uuid,
                hour,
                minute: 0,
            };
            if let Err(err) = self.gateway.cancel(&key.to_string()) {
                warn!(identifier = %key, error = %err, "trigger cancellation failed");
            }
        }
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<TriggerRequest>> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let request: TriggerRequest = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(request);
    }
    Ok(out)
}

#[tracing::instrument(skip(path, triggers))]
fn save_jsonl_atomic(path: &Path, triggers: &[TriggerRequest]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for trigger in triggers {
        let serialized = serde_json::to_string(trigger)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::{
        FileGateway, NotificationGateway, REMINDER_HOURS, ReminderScheduler, TriggerKey,
        TriggerRequest,
    };
    use crate::calendar::{CalendarSystem, from_civil};
    use crate::config::Config;
    use crate::event::Event;

    fn sample_event() -> Event {
        let date = from_civil(1399, 1, 1, CalendarSystem::Persian).expect("valid date");
        Event::new(
            "Nowruz".to_string(),
            date,
            CalendarSystem::Persian,
            vec!["Maryam".to_string(), "Reza".to_string()],
            Utc::now(),
        )
        .expect("valid event")
    }

    #[test]
    fn trigger_key_format_is_stable() {
        let event = sample_event();
        let key = TriggerKey {
            event: event.uuid,
            hour: 0,
            minute: 0,
        };
        assert_eq!(key.to_string(), format!("{}-0000", event.uuid));
        let noon = TriggerKey {
            event: event.uuid,
            hour: 12,
            minute: 0,
        };
        assert_eq!(noon.to_string(), format!("{}-1200", event.uuid));
    }

    #[test]
    fn scheduling_registers_midnight_and_noon() {
        let temp = tempdir().expect("tempdir");
        let mut gateway = FileGateway::open(temp.path()).expect("open gateway");
        let cfg = Config::defaults_for_tests();
        let event = sample_event();

        ReminderScheduler::new(&cfg, &mut gateway).schedule(&event);

        let triggers = gateway.registered().expect("registered");
        assert_eq!(triggers.len(), REMINDER_HOURS.len());
        assert_eq!(triggers[0].spec.hour, 0);
        assert_eq!(triggers[1].spec.hour, 12);
        assert_eq!(triggers[0].spec.month, 1);
        assert_eq!(triggers[0].spec.day, 1);
        assert_eq!(triggers[0].spec.calendar, CalendarSystem::Persian);
        assert_eq!(triggers[0].content.title, "Reminder");
        assert_eq!(triggers[0].content.body, "Maryam, Reza - Nowruz");
    }

    #[test]
    fn rescheduling_replaces_instead_of_duplicating() {
        let temp = tempdir().expect("tempdir");
        let mut gateway = FileGateway::open(temp.path()).expect("open gateway");
        let cfg = Config::defaults_for_tests();
        let event = sample_event();

        ReminderScheduler::new(&cfg, &mut gateway).schedule(&event);
        ReminderScheduler::new(&cfg, &mut gateway).schedule(&event);

        let triggers = gateway.registered().expect("registered");
        assert_eq!(triggers.len(), 2, "same keys replace, never duplicate");

        let midnight_key = TriggerKey {
            event: event.uuid,
            hour: 0,
            minute: 0,
        }
        .to_string();
        let matching: Vec<_> = triggers
            .iter()
            .filter(|t| t.identifier == midnight_key)
            .collect();
        assert_eq!(matching.len(), 1);
    }

    #[test]
    fn cancel_removes_both_triggers() {
        let temp = tempdir().expect("tempdir");
        let mut gateway = FileGateway::open(temp.path()).expect("open gateway");
        let cfg = Config::defaults_for_tests();
        let event = sample_event();

        ReminderScheduler::new(&cfg, &mut gateway).schedule(&event);
        ReminderScheduler::new(&cfg, &mut gateway).cancel(&event);
        assert!(gateway.registered().expect("registered").is_empty());
    }

    struct RejectingGateway {
        attempts: usize,
    }

    impl NotificationGateway for RejectingGateway {
        fn register(&mut self, _request: TriggerRequest) -> anyhow::Result<()> {
            self.attempts += 1;
            Err(anyhow::anyhow!("permission not granted"))
        }

        fn cancel(&mut self, _identifier: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registration_failures_are_non_fatal() {
        let cfg = Config::defaults_for_tests();
        let mut gateway = RejectingGateway { attempts: 0 };
        let event = sample_event();

        // Does not error or panic; both registrations are attempted.
        ReminderScheduler::new(&cfg, &mut gateway).schedule(&event);
        assert_eq!(gateway.attempts, 2);
    }

    #[test]
    fn disabled_scheduler_registers_nothing() {
        let temp = tempdir().expect("tempdir");
        let mut gateway = FileGateway::open(temp.path()).expect("open gateway");
        let mut cfg = Config::defaults_for_tests();
        cfg.apply_overrides([("notifications".to_string(), "off".to_string())]);
        let event = sample_event();

        ReminderScheduler::new(&cfg, &mut gateway).schedule(&event);
        assert!(gateway.registered().expect("registered").is_empty());
    }
}
