use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, SecondsFormat, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_display_date, format_display_datetime};
use crate::task::{Priority, Task};
use crate::view::{Tab, TabCounts};

/// A task together with its 1-based position in the store, which is what
/// selectors on the command line refer to.
pub type Row<'a> = (usize, &'a Task);

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// `Upcoming (2)  Overdue (1)  Completed (0)` with the active tab bracketed.
    pub fn write_tab_bar<W: Write>(
        &self,
        mut out: W,
        counts: TabCounts,
        active: Option<Tab>,
    ) -> anyhow::Result<()> {
        let labels: Vec<String> = Tab::ALL
            .iter()
            .map(|&tab| {
                let label = format!("{} ({})", tab.label(), counts.get(tab));
                if Some(tab) == active {
                    self.paint(&format!("[{label}]"), "1")
                } else {
                    format!(" {label} ")
                }
            })
            .collect();
        writeln!(out, "{}", labels.join(" "))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, rows, boundary), fields(rows = rows.len()))]
    pub fn write_task_table<W: Write>(
        &self,
        mut out: W,
        rows: &[Row<'_>],
        boundary: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if rows.is_empty() {
            writeln!(out, "No tasks found")?;
            return Ok(());
        }

        let headers = vec![
            "#".to_string(),
            "Done".to_string(),
            "Due".to_string(),
            "Priority".to_string(),
            "Title".to_string(),
            "Description".to_string(),
        ];

        let mut table = Vec::with_capacity(rows.len());
        for (position, task) in rows {
            let due = format_display_date(task.due_date);
            let due = if !task.completed && task.due_date < boundary {
                self.paint(&due, "31")
            } else {
                due
            };

            table.push(vec![
                self.paint(&position.to_string(), "33"),
                (if task.completed { "[x]" } else { "[ ]" }).to_string(),
                due,
                self.paint_priority(task.priority),
                task.title.clone(),
                first_line(&task.description),
            ]);
        }

        write_table(&mut out, headers, table)?;
        Ok(())
    }

    pub fn write_task_info<W: Write>(&self, mut out: W, position: usize, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "position     {position}")?;
        writeln!(out, "id           {}", task.id)?;
        writeln!(out, "title        {}", task.title)?;
        writeln!(out, "description  {}", task.description)?;
        writeln!(out, "priority     {}", self.paint_priority(task.priority))?;
        writeln!(out, "completed    {}", if task.completed { "yes" } else { "no" })?;
        writeln!(
            out,
            "due          {} ({})",
            format_display_datetime(task.due_date),
            task.due_date.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        writeln!(
            out,
            "created      {} ({})",
            format_display_datetime(task.created_at),
            task.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        Ok(())
    }

    pub fn write_summary<W: Write>(&self, mut out: W, counts: TabCounts) -> anyhow::Result<()> {
        let rows = Tab::ALL
            .iter()
            .map(|&tab| vec![tab.label().to_string(), counts.get(tab).to_string()])
            .collect();
        write_table(&mut out, vec!["Tab".to_string(), "Tasks".to_string()], rows)
    }

    fn paint_priority(&self, priority: Priority) -> String {
        let code = match priority {
            Priority::High => "31",
            Priority::Medium => "33",
            Priority::Low => "32",
        };
        self.paint(priority.as_str(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn first_line(text: &str) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default().to_string();
    if lines.next().is_some() {
        format!("{first} …")
    } else {
        first
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

    let mut line = String::new();
    for idx in 0..column_count {
        line.push_str(&format!("{:width$} ", headers[idx], width = widths[idx]));
    }
    writeln!(writer, "{}", line.trim_end())?;

    line.clear();
    for &width in &widths {
        line.push_str(&format!("{:-<width$} ", "", width = width));
    }
    writeln!(writer, "{}", line.trim_end())?;

    for row in rows {
        line.clear();
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            line.push_str(cell);
            line.push_str(&" ".repeat(padding + 1));
        }
        writeln!(writer, "{}", line.trim_end())?;
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

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    use super::*;
    use crate::task::TaskForm;

    fn boundary() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap()
    }

    #[test]
    fn table_aligns_wide_titles_and_marks_completion() {
        let a = Task::from_form(
            Uuid::new_v4(),
            TaskForm::new("Pay rent", boundary() + Duration::days(1)).with_priority(Priority::High),
            boundary(),
        );
        let mut b = Task::from_form(
            Uuid::new_v4(),
            TaskForm::new("牛乳を買う", boundary()).with_description("two\nlines"),
            boundary(),
        );
        b.completed = true;

        let mut out = Vec::new();
        Renderer::plain()
            .write_task_table(&mut out, &[(1, &a), (2, &b)], boundary())
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("# Done Due"));
        assert!(lines[2].contains("[ ]  Oct 19, 2026 high"));
        assert!(lines[3].contains("[x]  Oct 18, 2026 medium"));
        assert!(lines[3].ends_with("two …"));
        // Both title cells start in the same display column.
        let title_col = |line: &str| {
            let idx = line.find(if line.contains("Pay") { "Pay" } else { "牛" }).unwrap();
            UnicodeWidthStr::width(&line[..idx])
        };
        assert_eq!(title_col(lines[2]), title_col(lines[3]));
    }

    #[test]
    fn empty_table_says_so() {
        let mut out = Vec::new();
        Renderer::plain()
            .write_task_table(&mut out, &[], boundary())
            .expect("render");
        assert_eq!(String::from_utf8(out).unwrap(), "No tasks found\n");
    }

    #[test]
    fn tab_bar_shows_counts() {
        let mut out = Vec::new();
        let counts = TabCounts {
            upcoming: 2,
            overdue: 1,
            completed: 0,
        };
        Renderer::plain()
            .write_tab_bar(&mut out, counts, Some(Tab::Overdue))
            .expect("render");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            " Upcoming (2)  [Overdue (1)]  Completed (0) \n"
        );
    }
}
