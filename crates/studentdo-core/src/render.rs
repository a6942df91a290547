use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_date;
use crate::prefs::UserPreferences;
use crate::task::{DeletedTask, Priority, Task};

/// ANSI codes per role, picked by the dark-theme preference.
#[derive(Debug, Clone, Copy)]
struct Palette {
    id: &'static str,
    overdue: &'static str,
    done: &'static str,
    low: &'static str,
    medium: &'static str,
    high: &'static str,
}

const LIGHT: Palette = Palette {
    id: "33",
    overdue: "31",
    done: "2;9",
    low: "32",
    medium: "33",
    high: "31",
};

const DARK: Palette = Palette {
    id: "93",
    overdue: "91",
    done: "2;9",
    low: "92",
    medium: "93",
    high: "91",
};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    palette: Palette,
    date_format: String,
}

impl Renderer {
    pub fn new(cfg: &Config, prefs: &UserPreferences) -> Self {
        Self {
            color: cfg.color && io::stdout().is_terminal(),
            palette: if prefs.dark_theme { DARK } else { LIGHT },
            date_format: cfg.date_format.clone(),
        }
    }

    pub fn set_dark_theme(&mut self, dark: bool) {
        self.palette = if dark { DARK } else { LIGHT };
    }

    #[tracing::instrument(skip(self, tasks, now))]
    pub fn print_task_table(&self, tasks: &[Task], now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_task_table(&mut out, tasks, now)
    }

    pub fn write_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks yet")?;
            return Ok(());
        }

        let headers = ["ID", "Done", "Due", "Priority", "Title"];
        let rows = tasks
            .iter()
            .map(|task| {
                let id = task
                    .id
                    .map(|value| value.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let due = format_date(task.due, &self.date_format);
                let due = if task.is_overdue(now) {
                    self.paint(&due, self.palette.overdue)
                } else {
                    due
                };
                let title = if task.completed {
                    self.paint(&task.title, self.palette.done)
                } else {
                    task.title.clone()
                };
                vec![
                    self.paint(&id, self.palette.id),
                    if task.completed { "x" } else { "" }.to_string(),
                    due,
                    self.paint_priority(task.priority_level(), task.priority_label()),
                    title,
                ]
            })
            .collect();

        write_table(out, &headers, rows)
    }

    #[tracing::instrument(skip(self, deleted))]
    pub fn print_recycle_bin(&self, deleted: &[DeletedTask]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_recycle_bin(&mut out, deleted)
    }

    pub fn write_recycle_bin<W: Write>(
        &self,
        out: &mut W,
        deleted: &[DeletedTask],
    ) -> anyhow::Result<()> {
        if deleted.is_empty() {
            writeln!(out, "Recycle bin is empty")?;
            return Ok(());
        }

        let headers = ["ID", "Due", "Priority", "Deleted on", "Title"];
        let rows = deleted
            .iter()
            .map(|entry| {
                vec![
                    self.paint(&entry.id.to_string(), self.palette.id),
                    format_date(entry.due, &self.date_format),
                    self.paint_priority(
                        Priority::from_level(entry.priority),
                        entry.priority_label(),
                    ),
                    format_date(entry.deleted_at, &self.date_format),
                    entry.title.clone(),
                ]
            })
            .collect();

        write_table(out, &headers, rows)
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(
            out,
            "id           {}",
            task.id
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string())
        )?;
        writeln!(out, "title        {}", task.title)?;
        writeln!(out, "description  {}", task.description)?;
        writeln!(out, "due          {}", format_date(task.due, &self.date_format))?;
        writeln!(out, "priority     {}", task.priority_label())?;
        writeln!(
            out,
            "completed    {}",
            if task.completed { "yes" } else { "no" }
        )?;
        Ok(())
    }

    pub fn print_preferences(&self, prefs: &UserPreferences) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "theme   {}",
            if prefs.dark_theme { "dark" } else { "light" }
        )?;
        writeln!(out, "sort    {}", prefs.sort_order)?;
        writeln!(out, "filter  {}", prefs.priority_filter)?;
        Ok(())
    }

    fn paint_priority(&self, priority: Option<Priority>, label: &str) -> String {
        match priority {
            Some(Priority::Low) => self.paint(label, self.palette.low),
            Some(Priority::Medium) => self.paint(label, self.palette.medium),
            Some(Priority::High) => self.paint(label, self.palette.high),
            None => label.to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(*header))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ", width = *width)?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
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

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn plain_renderer() -> Renderer {
        Renderer {
            color: false,
            palette: LIGHT,
            date_format: "%Y-%m-%d".to_string(),
        }
    }

    #[test]
    fn empty_lists_print_placeholders() {
        let renderer = plain_renderer();
        let mut buf = Vec::new();
        renderer
            .write_task_table(&mut buf, &[], Utc::now())
            .expect("render");
        renderer
            .write_recycle_bin(&mut buf, &[])
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text, "No tasks yet\nRecycle bin is empty\n");
    }

    #[test]
    fn task_table_marks_completion_and_priority() {
        let renderer = plain_renderer();
        let due = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid due");
        let mut done = Task::new("Essay".to_string(), String::new(), due, 3);
        done.id = Some(1);
        done.completed = true;
        let mut odd = Task::new("Import".to_string(), String::new(), due, 8);
        odd.id = Some(2);

        let mut buf = Vec::new();
        renderer
            .write_task_table(&mut buf, &[done, odd], due - Duration::days(1))
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[2].contains(" x "));
        assert!(lines[2].contains("High"));
        assert!(lines[3].contains("None"));
    }

    #[test]
    fn strip_ansi_measures_visible_text() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
    }
}
