use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::calendar::{CalendarSystem, parse_civil_date};
use crate::cli::Invocation;
use crate::config::Config;
use crate::contacts::{ContactPicker, StdinContactPicker};
use crate::event::Event;
use crate::filter::Filter;
use crate::notify::{FileGateway, ReminderScheduler};
use crate::render::Renderer;
use crate::store::{EventStore, JsonlStore};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "list", "today", "info", "delete", "schedule", "titles", "export", "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &mut JsonlStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let mut gateway = FileGateway::open(&store.data_dir)
        .context("failed to open notification trigger ledger")?;
    let mut scheduler = ReminderScheduler::new(cfg, &mut gateway);
    let command = inv.command.as_str();

    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "add" => {
            let mut picker = StdinContactPicker::new();
            cmd_add(store, &mut scheduler, &mut picker, &inv.command_args, now)
        }
        "list" => cmd_list(store, renderer, &inv.filter_terms, now),
        "today" => cmd_today(store, renderer, &inv.filter_terms, now),
        "info" => cmd_info(store, renderer, &inv.filter_terms, &inv.command_args, now),
        "delete" => cmd_delete(
            store,
            &mut scheduler,
            &inv.filter_terms,
            &inv.command_args,
            now,
        ),
        "schedule" => cmd_schedule(store, &mut scheduler),
        "titles" => cmd_titles(store, &inv.command_args),
        "export" => cmd_export(store),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[derive(Debug)]
struct AddArgs {
    title: String,
    calendar: CalendarSystem,
    date_expr: String,
    contacts: Vec<String>,
}

/// `add` takes free title words plus `date:`, `cal:`, and repeatable
/// `contact:` attribute tokens, in any order.
fn parse_add_args(args: &[String]) -> anyhow::Result<AddArgs> {
    let mut title_words: Vec<&str> = Vec::new();
    let mut calendar = CalendarSystem::Gregorian;
    let mut date_expr = "today".to_string();
    let mut contacts: Vec<String> = Vec::new();

    for arg in args {
        if let Some(value) = arg.strip_prefix("date:") {
            date_expr = value.to_string();
        } else if let Some(value) = arg
            .strip_prefix("cal:")
            .or_else(|| arg.strip_prefix("calendar:"))
        {
            calendar = CalendarSystem::parse_name(value)?;
        } else if let Some(value) = arg
            .strip_prefix("contact:")
            .or_else(|| arg.strip_prefix("with:"))
        {
            contacts.push(value.to_string());
        } else {
            title_words.push(arg.as_str());
        }
    }

    Ok(AddArgs {
        title: title_words.join(" "),
        calendar,
        date_expr,
        contacts,
    })
}

#[instrument(skip(store, scheduler, picker, args, now))]
fn cmd_add(
    store: &mut dyn EventStore,
    scheduler: &mut ReminderScheduler<'_>,
    picker: &mut dyn ContactPicker,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    let parsed = parse_add_args(args)?;
    let date = parse_civil_date(&parsed.date_expr, parsed.calendar, now)
        .with_context(|| format!("invalid date for {} calendar", parsed.calendar))?;

    let mut contacts = parsed.contacts;
    if contacts.is_empty() {
        while let Some(name) = picker.request_contact()? {
            contacts.push(name);
        }
    }

    let event = Event::new(parsed.title, date, parsed.calendar, contacts, now)?;
    store.save(&event)?;
    scheduler.schedule(&event);

    let count = store.load_all()?.len();
    debug!(count, "event added");
    println!("Created event {count}.");
    Ok(())
}

#[instrument(skip(store, renderer, filter_terms, now))]
fn cmd_list(
    store: &mut JsonlStore,
    renderer: &mut Renderer,
    filter_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");

    let filter = Filter::parse(filter_terms)?;
    let events: Vec<Event> = store
        .load_all()?
        .into_iter()
        .filter(|event| filter.matches(event, now))
        .collect();

    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }
    renderer.print_event_table(&events, now)
}

#[instrument(skip(store, renderer, filter_terms, now))]
fn cmd_today(
    store: &mut JsonlStore,
    renderer: &mut Renderer,
    filter_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command today");

    let filter = Filter::parse(filter_terms)?.with_recurs_today();
    let events: Vec<Event> = store
        .load_all()?
        .into_iter()
        .filter(|event| filter.matches(event, now))
        .collect();

    if events.is_empty() {
        println!("No anniversaries today.");
        return Ok(());
    }
    renderer.print_event_table(&events, now)
}

#[instrument(skip(store, renderer, filter_terms, args, now))]
fn cmd_info(
    store: &mut JsonlStore,
    renderer: &mut Renderer,
    filter_terms: &[String],
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command info");

    let terms: Vec<String> = filter_terms.iter().chain(args).cloned().collect();
    let filter = Filter::parse(&terms)?;
    if filter.is_empty() {
        return Err(anyhow!("info requires a selector"));
    }

    let events = store.load_all()?;
    let mut shown = 0_u64;
    for event in events.iter().filter(|event| filter.matches(event, now)) {
        if shown > 0 {
            println!();
        }
        renderer.print_event_info(event)?;
        shown += 1;
    }

    if shown == 0 {
        println!("No matching events.");
    }
    Ok(())
}

#[instrument(skip(store, scheduler, filter_terms, args, now))]
fn cmd_delete(
    store: &mut JsonlStore,
    scheduler: &mut ReminderScheduler<'_>,
    filter_terms: &[String],
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command delete");

    let terms: Vec<String> = filter_terms.iter().chain(args).cloned().collect();
    let filter = Filter::parse(&terms)?;
    if !filter.has_identity_selector() {
        return Err(anyhow!("delete requires an id or uuid selector"));
    }

    let doomed: Vec<Event> = store
        .load_all()?
        .into_iter()
        .filter(|event| filter.matches(event, now))
        .collect();

    for event in &doomed {
        store.delete(event.uuid)?;
        scheduler.cancel(event);
    }

    if doomed.is_empty() {
        warn!("delete selector matched nothing");
    }
    println!("Deleted {} event(s).", doomed.len());
    Ok(())
}

/// Re-registers triggers for every stored event; safe to repeat because
/// registrations replace by identifier.
#[instrument(skip(store, scheduler))]
fn cmd_schedule(
    store: &mut JsonlStore,
    scheduler: &mut ReminderScheduler<'_>,
) -> anyhow::Result<()> {
    info!("command schedule");

    let events = store.load_all()?;
    for event in &events {
        scheduler.schedule(event);
    }
    println!("Scheduled {} event(s).", events.len());
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_titles(store: &mut JsonlStore, args: &[String]) -> anyhow::Result<()> {
    info!("command titles");

    match args.first().map(String::as_str) {
        None => {
            for title in store.load_titles()? {
                println!("{title}");
            }
            Ok(())
        }
        Some("add") => {
            let title = args[1..].join(" ");
            store.add_title(&title)?;
            println!("Added title preset '{}'.", title.trim());
            Ok(())
        }
        Some(other) => Err(anyhow!("unknown titles subcommand: {other}")),
    }
}

#[instrument(skip(store))]
fn cmd_export(store: &mut JsonlStore) -> anyhow::Result<()> {
    info!("command export");

    let events = store.load_all()?;
    let out = serde_json::to_string(&events)?;
    println!("{out}");
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "usage: remind [selector...] <command> [args...]\n\
         \n\
         commands:\n\
         \x20 add <title>... date:Y-M-D [cal:NAME] [contact:NAME]...\n\
         \x20 list [selector...]        all events\n\
         \x20 today [selector...]       events recurring today\n\
         \x20 info <selector>           full details for matching events\n\
         \x20 delete <id|uuid>          remove an event and its triggers\n\
         \x20 schedule                  re-register triggers for all events\n\
         \x20 titles [add <title>...]   show or extend title presets\n\
         \x20 export                    all events as JSON\n\
         \x20 help, version\n\
         \n\
         selectors: display id, uuid, cal:<name>, +today, bare words\n\
         calendars: gregorian (default), persian, islamic"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::{cmd_add, expand_command_abbrev, known_command_names, parse_add_args};
    use crate::calendar::CalendarSystem;
    use crate::config::Config;
    use crate::contacts::testing::QueuedPicker;
    use crate::notify::{FileGateway, ReminderScheduler};
    use crate::store::{EventStore, JsonlStore};

    #[test]
    fn abbreviations_expand_when_unambiguous() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("del", &known), Some("delete"));
        assert_eq!(expand_command_abbrev("to", &known), Some("today"));
        assert_eq!(expand_command_abbrev("ti", &known), Some("titles"));
        assert_eq!(expand_command_abbrev("t", &known), None);
        assert_eq!(expand_command_abbrev("zap", &known), None);
    }

    #[test]
    fn add_args_split_attributes_from_title() {
        let args: Vec<String> = [
            "Maryam's",
            "birthday",
            "date:1403-01-01",
            "cal:persian",
            "contact:Maryam",
            "with:Reza",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let parsed = parse_add_args(&args).expect("parse");
        assert_eq!(parsed.title, "Maryam's birthday");
        assert_eq!(parsed.calendar, CalendarSystem::Persian);
        assert_eq!(parsed.date_expr, "1403-01-01");
        assert_eq!(parsed.contacts, vec!["Maryam", "Reza"]);
    }

    #[test]
    fn add_args_default_to_gregorian_today() {
        let args = vec!["Checkup".to_string()];
        let parsed = parse_add_args(&args).expect("parse");
        assert_eq!(parsed.calendar, CalendarSystem::Gregorian);
        assert_eq!(parsed.date_expr, "today");
        assert!(parsed.contacts.is_empty());
    }

    #[test]
    fn add_with_empty_title_persists_and_schedules_nothing() {
        let temp = tempdir().expect("tempdir");
        let mut store = JsonlStore::open(temp.path()).expect("open store");
        let mut gateway = FileGateway::open(temp.path()).expect("open gateway");
        let cfg = Config::defaults_for_tests();
        let mut scheduler = ReminderScheduler::new(&cfg, &mut gateway);
        let mut picker = QueuedPicker::new(["Bob"]);

        let args = vec!["contact:Bob".to_string()];
        let result = cmd_add(&mut store, &mut scheduler, &mut picker, &args, Utc::now());
        assert!(result.is_err(), "empty title must be rejected");

        drop(scheduler);
        assert!(store.load_all().expect("load").is_empty());
        assert!(gateway.registered().expect("registered").is_empty());
    }

    #[test]
    fn add_falls_back_to_contact_picker() {
        let temp = tempdir().expect("tempdir");
        let mut store = JsonlStore::open(temp.path()).expect("open store");
        let mut gateway = FileGateway::open(temp.path()).expect("open gateway");
        let cfg = Config::defaults_for_tests();
        let mut scheduler = ReminderScheduler::new(&cfg, &mut gateway);
        let mut picker = QueuedPicker::new(["Maryam", "Reza"]);

        let args: Vec<String> = ["Nowruz", "date:1403-01-01", "cal:persian"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        cmd_add(&mut store, &mut scheduler, &mut picker, &args, Utc::now()).expect("add");

        drop(scheduler);
        let events = store.load_all().expect("load");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].contacts, vec!["Maryam", "Reza"]);
        assert_eq!(
            gateway.registered().expect("registered").len(),
            2,
            "both daily triggers registered at creation"
        );
    }
}
