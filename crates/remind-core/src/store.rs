use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::event::Event;

pub const DEFAULT_TITLES: [&str; 4] = ["Birthday", "Anniversary", "Meeting", "Other"];

/// The storage collaborator contract. The core depends on these three
/// operations only; everything else about persistence is an
/// implementation detail behind them.
pub trait EventStore {
    fn save(&mut self, event: &Event) -> anyhow::Result<()>;
    fn load_all(&self) -> anyhow::Result<Vec<Event>>;
    fn delete(&mut self, uuid: Uuid) -> anyhow::Result<()>;
}

/// File-backed store: one JSON object per line in `events.data`,
/// rewritten atomically on every mutation. Also owns the user-extensible
/// event-title preset list in `titles.data`.
#[derive(Debug)]
pub struct JsonlStore {
    pub data_dir: PathBuf,
    pub events_path: PathBuf,
    pub titles_path: PathBuf,
}

impl JsonlStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let events_path = data_dir.join("events.data");
        let titles_path = data_dir.join("titles.data");

        if !events_path.exists() {
            fs::write(&events_path, "")?;
        }
        if !titles_path.exists() {
            fs::write(&titles_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            events = %events_path.display(),
            titles = %titles_path.display(),
            "opened event store"
        );

        Ok(Self {
            data_dir,
            events_path,
            titles_path,
        })
    }

    /// Title presets offered when adding an event. Falls back to the
    /// built-in list while the file is empty.
    #[tracing::instrument(skip(self))]
    pub fn load_titles(&self) -> anyhow::Result<Vec<String>> {
        let raw = fs::read_to_string(&self.titles_path)
            .with_context(|| format!("failed reading {}", self.titles_path.display()))?;

        let titles: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if titles.is_empty() {
            return Ok(DEFAULT_TITLES.iter().map(|s| s.to_string()).collect());
        }
        Ok(titles)
    }

    #[tracing::instrument(skip(self))]
    pub fn add_title(&mut self, title: &str) -> anyhow::Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(anyhow!("a title preset cannot be empty"));
        }

        let mut titles = self.load_titles()?;
        if titles.iter().any(|t| t.eq_ignore_ascii_case(title)) {
            debug!(title, "title preset already present");
            return Ok(());
        }
        titles.push(title.to_string());

        let payload = titles.join("\n") + "\n";
        fs::write(&self.titles_path, payload)
            .with_context(|| format!("failed writing {}", self.titles_path.display()))?;
        Ok(())
    }
}

impl EventStore for JsonlStore {
    #[tracing::instrument(skip(self, event), fields(uuid = %event.uuid))]
    fn save(&mut self, event: &Event) -> anyhow::Result<()> {
        let mut events = self.load_all()?;
        if events.iter().any(|e| e.uuid == event.uuid) {
            return Err(anyhow!("event already stored: {}", event.uuid));
        }
        events.push(event.clone());
        save_jsonl_atomic(&self.events_path, &events).context("failed to save events.data")
    }

    #[tracing::instrument(skip(self))]
    fn load_all(&self) -> anyhow::Result<Vec<Event>> {
        let mut events =
            load_jsonl(&self.events_path).context("failed to load events.data")?;
        for (idx, event) in events.iter_mut().enumerate() {
            event.id = Some(idx as u64 + 1);
        }
        Ok(events)
    }

    #[tracing::instrument(skip(self), fields(uuid = %uuid))]
    fn delete(&mut self, uuid: Uuid) -> anyhow::Result<()> {
        let mut events = self.load_all()?;
        let idx = events
            .iter()
            .position(|e| e.uuid == uuid)
            .ok_or_else(|| anyhow!("event not found: {uuid}"))?;
        events.remove(idx);
        save_jsonl_atomic(&self.events_path, &events).context("failed to save events.data")
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Event>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event: Event = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(event);
    }

    debug!(count = out.len(), "loaded events from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, events))]
fn save_jsonl_atomic(path: &Path, events: &[Event]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = events.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for event in events {
        let serialized = serde_json::to_string(event)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
