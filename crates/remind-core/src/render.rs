use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::warn;
use unicode_width::UnicodeWidthStr;

use crate::calendar::format_civil;
use crate::config::Config;
use crate::event::Event;
use crate::recurrence::is_recurring_today;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, events, now))]
    pub fn print_event_table(&mut self, events: &[Event], now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Date".to_string(),
            "Calendar".to_string(),
            "Title".to_string(),
            "Contacts".to_string(),
        ];

        let mut rows = Vec::with_capacity(events.len());

        for event in events {
            let id = event
                .id
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string());
            let id = self.paint(&id, "33");

            let date = display_date(event);
            let date = if is_recurring_today(event, now) {
                self.paint(&date, "32")
            } else {
                date
            };

            rows.push(vec![
                id,
                date,
                event.calendar.to_string(),
                event.title.clone(),
                event.contact_line(),
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, event))]
    pub fn print_event_info(&mut self, event: &Event) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(
            out,
            "id        {}",
            event
                .id
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(out, "uuid      {}", event.uuid)?;
        writeln!(out, "title     {}", event.title)?;
        writeln!(out, "date      {}", display_date(event))?;
        writeln!(out, "stored    {}", event.date.format("%Y%m%dT%H%M%SZ"))?;
        writeln!(out, "calendar  {}", event.calendar)?;
        writeln!(out, "contacts  {}", event.contact_line())?;
        writeln!(out, "entry     {}", event.entry.format("%Y%m%dT%H%M%SZ"))?;

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Event date rendered in the event's own calendar; falls back to the
/// plain ISO day if the formatter cannot be loaded.
fn display_date(event: &Event) -> String {
    match format_civil(event.date, event.calendar) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!(uuid = %event.uuid, error = %err, "falling back to iso date rendering");
            event.date.format("%Y-%m-%d").to_string()
        }
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
