use chrono::{
  DateTime,
  Utc
};
use tracing::trace;

use crate::calendar::CalendarSystem;
use crate::event::Event;
use crate::recurrence::is_recurring_today;

#[derive(Debug, Clone)]
pub enum Pred {
  Id(u64),
  Uuid(uuid::Uuid),
  CalendarEq(CalendarSystem),
  RecursToday,
  TextContains(String)
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
  preds: Vec<Pred>
}

impl Filter {
  /// Parse selector terms: a numeric
  /// display id, a full uuid,
  /// `cal:<name>`, `+today`, or a
  /// bare word matched against title
  /// and contacts. Terms AND
  /// together.
  pub fn parse(
    terms: &[String]
  ) -> anyhow::Result<Self> {
    let mut preds = Vec::new();

    for term in terms {
      let term = term.trim();
      if term.is_empty() {
        continue;
      }

      if term == "+today" {
        preds.push(Pred::RecursToday);
        continue;
      }

      if let Some(name) = term
        .strip_prefix("cal:")
        .or_else(|| {
          term
            .strip_prefix("calendar:")
        })
      {
        preds.push(Pred::CalendarEq(
          CalendarSystem::parse_name(
            name
          )?
        ));
        continue;
      }

      if term
        .chars()
        .all(|c| c.is_ascii_digit())
        && let Ok(id) = term.parse()
      {
        preds.push(Pred::Id(id));
        continue;
      }

      if let Ok(uuid) =
        term.parse::<uuid::Uuid>()
      {
        preds.push(Pred::Uuid(uuid));
        continue;
      }

      preds.push(Pred::TextContains(
        term.to_lowercase()
      ));
    }

    trace!(?preds, "parsed filter");
    Ok(Self { preds })
  }

  pub fn with_recurs_today(
    mut self
  ) -> Self {
    if !self.preds.iter().any(|p| {
      matches!(p, Pred::RecursToday)
    }) {
      self
        .preds
        .push(Pred::RecursToday);
    }
    self
  }

  pub fn is_empty(&self) -> bool {
    self.preds.is_empty()
  }

  /// True when the filter pins down
  /// specific events by id or uuid;
  /// destructive commands insist on
  /// this.
  pub fn has_identity_selector(
    &self
  ) -> bool {
    self.preds.iter().any(|p| {
      matches!(
        p,
        Pred::Id(_) | Pred::Uuid(_)
      )
    })
  }

  pub fn matches(
    &self,
    event: &Event,
    today: DateTime<Utc>
  ) -> bool {
    self.preds.iter().all(|pred| {
      match pred {
        | Pred::Id(id) => {
          event.id == Some(*id)
        }
        | Pred::Uuid(uuid) => {
          event.uuid == *uuid
        }
        | Pred::CalendarEq(system) => {
          event.calendar == *system
        }
        | Pred::RecursToday => {
          is_recurring_today(
            event, today
          )
        }
        | Pred::TextContains(text) => {
          event
            .title
            .to_lowercase()
            .contains(text)
            || event
              .contacts
              .iter()
              .any(|c| {
                c.to_lowercase()
                  .contains(text)
              })
        }
      }
    })
  }
}
