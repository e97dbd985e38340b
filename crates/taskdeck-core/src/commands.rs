use std::io::Write;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{parse_date_expr, start_of_day};
use crate::filter::TaskFilter;
use crate::render::{Renderer, Row};
use crate::storage::Storage;
use crate::store::TaskStore;
use crate::task::{Priority, Task, TaskForm};
use crate::view::{Tab, partition};

const MIN_ID_PREFIX: usize = 4;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "log",
        "edit",
        "toggle",
        "delete",
        "info",
        "list",
        "upcoming",
        "overdue",
        "completed",
        "summary",
        "export",
        "help",
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

#[instrument(skip(store, cfg, renderer, inv, now, out), fields(command = %inv.command))]
pub fn dispatch<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    debug!(args = ?inv.args, "dispatching command");
    let args = inv.args.as_slice();

    match inv.command.as_str() {
        "add" => cmd_add(store, args, now, false, out),
        "log" => cmd_add(store, args, now, true, out),
        "edit" => cmd_edit(store, args, now, out),
        "toggle" => cmd_toggle(store, args, out),
        "delete" => cmd_delete(store, args, out),
        "info" => cmd_info(store, renderer, args, out),
        "list" => cmd_list(store, cfg, renderer, args, now, out),
        "upcoming" => cmd_tab(store, cfg, renderer, Tab::Upcoming, args, now, out),
        "overdue" => cmd_tab(store, cfg, renderer, Tab::Overdue, args, now, out),
        "completed" => cmd_tab(store, cfg, renderer, Tab::Completed, args, now, out),
        "summary" => cmd_summary(store, renderer, now, out),
        "export" => cmd_export(store, out),
        "help" => cmd_help(out),
        "version" => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[derive(Debug, Clone)]
enum Mod {
    Due(DateTime<Utc>),
    Priority(Priority),
    Description(String),
}

/// Splits arguments into title words and `key:value` modifiers. Tokens whose
/// key is not a known modifier stay part of the title; `--` ends modifiers.
#[instrument(skip(args, now))]
fn parse_title_and_mods(args: &[String], now: DateTime<Utc>) -> anyhow::Result<(String, Vec<Mod>)> {
    let mut title_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" && !literal {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg, now)? {
            mods.push(one_mod);
            continue;
        }

        title_parts.push(arg.as_str());
    }

    Ok((title_parts.join(" "), mods))
}

fn parse_one_mod(tok: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "due" => Ok(Some(Mod::Due(
            parse_date_expr(value, now).with_context(|| format!("invalid due date in '{tok}'"))?,
        ))),
        "pri" | "priority" => Ok(Some(Mod::Priority(value.parse()?))),
        "desc" | "description" => Ok(Some(Mod::Description(value.to_string()))),
        _ => Ok(None),
    }
}

fn apply_mods(form: &mut TaskForm, mods: Vec<Mod>) {
    for one_mod in mods {
        match one_mod {
            Mod::Due(dt) => form.due_date = dt,
            Mod::Priority(priority) => form.priority = priority,
            Mod::Description(text) => form.description = text,
        }
    }
}

/// Resolves a 1-based position or an id prefix to a store position and id.
fn select_task<S: Storage>(store: &TaskStore<S>, token: &str) -> anyhow::Result<(usize, Uuid)> {
    let token = token.trim();

    if let Ok(position) = token.parse::<usize>() {
        let task = position
            .checked_sub(1)
            .and_then(|idx| store.tasks().get(idx))
            .ok_or_else(|| anyhow!("no task at position {position} (store has {})", store.len()))?;
        return Ok((position, task.id));
    }

    let prefix = token.to_ascii_lowercase();
    if prefix.len() < MIN_ID_PREFIX || !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return Err(anyhow!(
            "invalid task selector '{token}': use a position or at least {MIN_ID_PREFIX} characters of an id"
        ));
    }

    let mut hits = store
        .tasks()
        .iter()
        .enumerate()
        .filter(|(_, task)| task.id.to_string().starts_with(&prefix));
    let (idx, task) = hits.next().ok_or_else(|| anyhow!("no task matches id '{token}'"))?;
    if hits.next().is_some() {
        return Err(anyhow!("id prefix '{token}' matches more than one task"));
    }
    Ok((idx + 1, task.id))
}

fn required_selector<'a>(command: &str, args: &'a [String]) -> anyhow::Result<(&'a str, &'a [String])> {
    args.split_first()
        .map(|(first, rest)| (first.as_str(), rest))
        .ok_or_else(|| anyhow!("{command} requires a task position or id"))
}

#[instrument(skip(store, args, now, out))]
fn cmd_add<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    args: &[String],
    now: DateTime<Utc>,
    completed: bool,
    out: &mut W,
) -> anyhow::Result<()> {
    info!(completed, "command add");

    let (title, mods) = parse_title_and_mods(args, now)?;
    let mut form = TaskForm::new(title, now);
    form.completed = completed;
    apply_mods(&mut form, mods);

    let task = store.add_task(form, now).context("failed to add task")?;
    let verb = if completed { "Logged" } else { "Created" };
    writeln!(out, "{verb} task {} ({}).", store.len(), short_id(task.id))?;
    Ok(())
}

#[instrument(skip(store, args, now, out))]
fn cmd_edit<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    args: &[String],
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command edit");

    let (selector, rest) = required_selector("edit", args)?;
    let (position, id) = select_task(store, selector)?;
    let (title, mods) = parse_title_and_mods(rest, now)?;
    if title.is_empty() && mods.is_empty() {
        return Err(anyhow!("edit: nothing to change"));
    }

    let current = store.get(id).ok_or_else(|| anyhow!("task vanished: {id}"))?;
    let mut form = TaskForm::from(current);
    if !title.is_empty() {
        form.title = title;
    }
    apply_mods(&mut form, mods);

    store.update_task(id, form).context("failed to update task")?;
    writeln!(out, "Modified task {position}.")?;
    Ok(())
}

#[instrument(skip(store, args, out))]
fn cmd_toggle<S: Storage, W: Write>(store: &mut TaskStore<S>, args: &[String], out: &mut W) -> anyhow::Result<()> {
    info!("command toggle");

    let (selector, rest) = required_selector("toggle", args)?;
    if !rest.is_empty() {
        warn!(extra = ?rest, "toggle ignores extra arguments");
    }
    let (position, id) = select_task(store, selector)?;
    let task = store
        .toggle_task_completion(id)
        .context("failed to toggle task")?;

    let verb = if task.completed { "Completed" } else { "Reopened" };
    writeln!(out, "{verb} task {position} '{}'.", task.title)?;
    Ok(())
}

#[instrument(skip(store, args, out))]
fn cmd_delete<S: Storage, W: Write>(store: &mut TaskStore<S>, args: &[String], out: &mut W) -> anyhow::Result<()> {
    info!("command delete");

    let (selector, _) = required_selector("delete", args)?;
    let (_, id) = select_task(store, selector)?;
    let removed = store.delete_task(id).context("failed to delete task")?;

    writeln!(out, "Deleted task '{}'.", removed.title)?;
    Ok(())
}

#[instrument(skip(store, renderer, args, out))]
fn cmd_info<S: Storage, W: Write>(
    store: &TaskStore<S>,
    renderer: &Renderer,
    args: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    let (selector, _) = required_selector("info", args)?;
    let (position, id) = select_task(store, selector)?;
    let task = store.get(id).ok_or_else(|| anyhow!("task vanished: {id}"))?;
    renderer.write_task_info(out, position, task)
}

fn filtered_rows<'a, S: Storage>(
    store: &'a TaskStore<S>,
    cfg: &Config,
    filter: &TaskFilter,
    keep: impl Fn(&Task) -> bool,
) -> anyhow::Result<Vec<Row<'a>>> {
    let mut rows: Vec<Row<'a>> = store
        .tasks()
        .iter()
        .enumerate()
        .filter(|(_, task)| keep(*task) && filter.matches(*task))
        .map(|(idx, task)| (idx + 1, task))
        .collect();

    cfg.sort_order()?.sort_by_task(&mut rows, |(_, task)| *task);
    Ok(rows)
}

#[instrument(skip(store, cfg, renderer, args, now, out))]
fn cmd_list<S: Storage, W: Write>(
    store: &TaskStore<S>,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    let filter = TaskFilter::parse(args)?;
    let rows = filtered_rows(store, cfg, &filter, |_| true)?;
    debug!(shown = rows.len(), total = store.len(), "list");
    renderer.write_task_table(out, &rows, start_of_day(now))
}

#[instrument(skip(store, cfg, renderer, args, now, out))]
fn cmd_tab<S: Storage, W: Write>(
    store: &TaskStore<S>,
    cfg: &Config,
    renderer: &Renderer,
    tab: Tab,
    args: &[String],
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    let boundary = start_of_day(now);
    let filter = TaskFilter::parse(args)?;
    let counts = partition(store.tasks(), boundary).counts();

    let rows = filtered_rows(store, cfg, &filter, |task| Tab::of(task, boundary) == tab)?;
    debug!(shown = rows.len(), in_tab = counts.get(tab), "tab view");

    renderer.write_tab_bar(&mut *out, counts, Some(tab))?;
    writeln!(out)?;
    renderer.write_task_table(out, &rows, boundary)
}

#[instrument(skip(store, renderer, now, out))]
fn cmd_summary<S: Storage, W: Write>(
    store: &TaskStore<S>,
    renderer: &Renderer,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    let counts = partition(store.tasks(), start_of_day(now)).counts();
    renderer.write_summary(out, counts)
}

fn cmd_export<S: Storage, W: Write>(store: &TaskStore<S>, out: &mut W) -> anyhow::Result<()> {
    writeln!(out, "{}", store.to_json()?)?;
    Ok(())
}

fn cmd_help<W: Write>(out: &mut W) -> anyhow::Result<()> {
    writeln!(
        out,
        "usage: taskdeck [-v|-q] [--rc KEY=VALUE] [--taskdeckrc FILE] [--data DIR] <command> [args]

commands:
  add <title> [due:DATE] [priority:low|medium|high] [desc:TEXT]
  log <title> [mods]          add a task that is already completed
  edit <sel> [title] [mods]   change a task; omitted fields are kept
  toggle <sel>                mark completed / reopen
  delete <sel>                remove permanently
  info <sel>                  show every field of a task
  list [filter]               all tasks
  upcoming|overdue|completed [filter]
  summary                     task count per tab
  export                      print the stored JSON document
  help | version

<sel> is the # shown in listings or the first {MIN_ID_PREFIX}+ characters of an id.
filter: words to search title and description, priority:<all|low|medium|high>,
        status:<all|active|completed>"
    )?;
    Ok(())
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
