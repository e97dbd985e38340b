use anyhow::anyhow;
use tracing::trace;

use crate::task::{
  Priority,
  Task
};

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum PriorityFilter {
  #[default]
  All,
  Only(Priority)
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum StatusFilter {
  #[default]
  All,
  Active,
  Completed
}

/// Search text plus priority and status selections. Independent of
/// the tab a task falls in; a task passes only if every part matches.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
  search:   String,
  priority: PriorityFilter,
  status:   StatusFilter
}

impl TaskFilter {
  pub fn new(
    search: impl Into<String>,
    priority: PriorityFilter,
    status: StatusFilter
  ) -> Self {
    let search: String = search.into();
    Self {
      search: search.to_lowercase(),
      priority,
      status
    }
  }

  pub fn search(&self) -> &str {
    &self.search
  }

  pub fn priority(&self) -> PriorityFilter {
    self.priority
  }

  pub fn status(&self) -> StatusFilter {
    self.status
  }

  pub fn is_empty(&self) -> bool {
    self.search.is_empty()
      && self.priority
        == PriorityFilter::All
      && self.status == StatusFilter::All
  }

  /// `priority:<all|low|medium|high>` (or `pri:`),
  /// `status:<all|active|completed>`; every other term is search text.
  #[tracing::instrument(skip(terms))]
  pub fn parse(
    terms: &[String]
  ) -> anyhow::Result<Self> {
    let mut words = Vec::new();
    let mut priority = PriorityFilter::All;
    let mut status = StatusFilter::All;

    for term in terms {
      let Some((key, value)) =
        term.split_once(':')
      else {
        words.push(term.as_str());
        continue;
      };

      match key
        .to_ascii_lowercase()
        .as_str()
      {
        | "pri" | "priority" => {
          priority =
            parse_priority_filter(value)?;
        }
        | "status" => {
          status =
            parse_status_filter(value)?;
        }
        | _ => words.push(term.as_str())
      }
    }

    let filter = Self::new(
      words.join(" "),
      priority,
      status
    );
    trace!(?filter, "parsed task filter");
    Ok(filter)
  }

  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    if !task.matches_text(&self.search) {
      return false;
    }

    if let PriorityFilter::Only(p) =
      self.priority
      && task.priority != p
    {
      return false;
    }

    match self.status {
      | StatusFilter::All => true,
      | StatusFilter::Active => {
        !task.completed
      }
      | StatusFilter::Completed => {
        task.completed
      }
    }
  }

  pub fn apply<'a, I>(
    &self,
    tasks: I
  ) -> Vec<&'a Task>
  where
    I: IntoIterator<Item = &'a Task>
  {
    tasks
      .into_iter()
      .filter(|task| self.matches(task))
      .collect()
  }
}

fn parse_priority_filter(
  value: &str
) -> anyhow::Result<PriorityFilter> {
  if value.eq_ignore_ascii_case("all") {
    return Ok(PriorityFilter::All);
  }
  let priority = value
    .parse::<Priority>()
    .map_err(|e| anyhow!("{e}"))?;
  Ok(PriorityFilter::Only(priority))
}

fn parse_status_filter(
  value: &str
) -> anyhow::Result<StatusFilter> {
  match value
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "all" => Ok(StatusFilter::All),
    | "active" | "pending" => {
      Ok(StatusFilter::Active)
    }
    | "completed" | "done" => {
      Ok(StatusFilter::Completed)
    }
    | other => {
      Err(anyhow!(
        "invalid status filter: {other} \
         (expected all, active or \
         completed)"
      ))
    }
  }
}
