use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::{CalendarSystem, stored_date_serde};

/// A stored reminder event. Immutable once created; the only lifecycle
/// transitions are persist and delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub uuid: Uuid,

    /// Display id for the CLI; reassigned densely on load and never
    /// serialized. Identity is the uuid.
    #[serde(skip)]
    pub id: Option<u64>,

    pub title: String,

    /// Local midnight of the chosen calendar day. Day granularity only;
    /// the time-of-day carries no meaning.
    #[serde(with = "stored_date_serde")]
    pub date: DateTime<Utc>,

    pub calendar: CalendarSystem,

    /// Contact display names, insertion order preserved, no duplicates.
    pub contacts: Vec<String>,

    #[serde(with = "stored_date_serde")]
    pub entry: DateTime<Utc>,
}

impl Event {
    /// Assemble and validate a new event. An empty title or an empty
    /// contact list is a validation error; nothing gets persisted or
    /// scheduled for an invalid draft. Duplicate contact names are
    /// dropped, keeping the first occurrence.
    pub fn new(
        title: String,
        date: DateTime<Utc>,
        calendar: CalendarSystem,
        contacts: Vec<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(anyhow!("an event needs a non-empty title"));
        }

        let mut seen: Vec<String> = Vec::with_capacity(contacts.len());
        for contact in contacts {
            let contact = contact.trim().to_string();
            if contact.is_empty() || seen.contains(&contact) {
                continue;
            }
            seen.push(contact);
        }
        if seen.is_empty() {
            return Err(anyhow!("an event needs at least one contact"));
        }

        Ok(Self {
            uuid: Uuid::new_v4(),
            id: None,
            title,
            date,
            calendar,
            contacts: seen,
            entry: now,
        })
    }

    pub fn contact_line(&self) -> String {
        self.contacts.join(", ")
    }
}
