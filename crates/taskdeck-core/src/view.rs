use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Utc
};

use crate::task::Task;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum Tab {
  Upcoming,
  Overdue,
  Completed
}

impl Tab {
  pub const ALL: [Tab; 3] = [
    Tab::Upcoming,
    Tab::Overdue,
    Tab::Completed
  ];

  /// The single tab a task belongs to. `boundary` is the start of
  /// today; a task due any time today is still Upcoming.
  pub fn of(
    task: &Task,
    boundary: DateTime<Utc>
  ) -> Tab {
    if task.completed {
      Tab::Completed
    } else if task.due_date < boundary {
      Tab::Overdue
    } else {
      Tab::Upcoming
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      | Tab::Upcoming => "Upcoming",
      | Tab::Overdue => "Overdue",
      | Tab::Completed => "Completed"
    }
  }
}

impl fmt::Display for Tab {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.label())
  }
}

#[derive(Debug, Clone, Default)]
pub struct Partition<'a> {
  pub upcoming:  Vec<&'a Task>,
  pub overdue:   Vec<&'a Task>,
  pub completed: Vec<&'a Task>
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub struct TabCounts {
  pub upcoming:  usize,
  pub overdue:   usize,
  pub completed: usize
}

impl<'a> Partition<'a> {
  pub fn tab(
    &self,
    tab: Tab
  ) -> &[&'a Task] {
    match tab {
      | Tab::Upcoming => &self.upcoming,
      | Tab::Overdue => &self.overdue,
      | Tab::Completed => &self.completed
    }
  }

  pub fn counts(&self) -> TabCounts {
    TabCounts {
      upcoming:  self.upcoming.len(),
      overdue:   self.overdue.len(),
      completed: self.completed.len()
    }
  }
}

impl TabCounts {
  pub fn get(&self, tab: Tab) -> usize {
    match tab {
      | Tab::Upcoming => self.upcoming,
      | Tab::Overdue => self.overdue,
      | Tab::Completed => self.completed
    }
  }
}

/// Splits `tasks` into the three tabs, keeping collection order
/// inside each.
#[tracing::instrument(skip(tasks), fields(count = tasks.len()))]
pub fn partition(
  tasks: &[Task],
  boundary: DateTime<Utc>
) -> Partition<'_> {
  let mut out = Partition::default();
  for task in tasks {
    match Tab::of(task, boundary) {
      | Tab::Upcoming => {
        out.upcoming.push(task)
      }
      | Tab::Overdue => {
        out.overdue.push(task)
      }
      | Tab::Completed => {
        out.completed.push(task)
      }
    }
  }
  out
}

pub fn tab_tasks(
  tasks: &[Task],
  tab: Tab,
  boundary: DateTime<Utc>
) -> Vec<&Task> {
  tasks
    .iter()
    .filter(|task| {
      Tab::of(task, boundary) == tab
    })
    .collect()
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum SortOrder {
  #[default]
  Insertion,
  DueDate,
  Priority,
  Created
}

impl FromStr for SortOrder {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "insertion" | "none" => {
        Ok(SortOrder::Insertion)
      }
      | "due" | "duedate" => {
        Ok(SortOrder::DueDate)
      }
      | "priority" => {
        Ok(SortOrder::Priority)
      }
      | "created" => {
        Ok(SortOrder::Created)
      }
      | other => {
        Err(anyhow!(
          "invalid sort order: {other} \
           (expected insertion, due, \
           priority or created)"
        ))
      }
    }
  }
}

impl SortOrder {
  /// Stable sort; `Insertion` leaves collection order alone.
  pub fn apply(self, tasks: &mut [&Task]) {
    self.sort_by_task(tasks, |task| *task)
  }

  pub fn sort_by_task<T>(
    self,
    items: &mut [T],
    task_of: impl Fn(&T) -> &Task
  ) {
    match self {
      | SortOrder::Insertion => {}
      | SortOrder::DueDate => {
        items.sort_by_key(|item| {
          task_of(item).due_date
        })
      }
      | SortOrder::Priority => {
        items.sort_by(|a, b| {
          let (a, b) =
            (task_of(a), task_of(b));
          b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then(a.due_date.cmp(&b.due_date))
        })
      }
      | SortOrder::Created => {
        items.sort_by_key(|item| {
          task_of(item).created_at
        })
      }
    }
  }
}
