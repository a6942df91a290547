use std::cmp::Reverse;

use tracing::trace;

use crate::prefs::{
  PriorityFilter,
  SortOrder,
  UserPreferences
};
use crate::task::Task;

#[must_use]
pub fn filter_tasks(
  tasks: &[Task],
  filter: PriorityFilter
) -> Vec<Task> {
  tasks
    .iter()
    .filter(|task| {
      filter.accepts(task.priority)
    })
    .cloned()
    .collect()
}

/// Stable: equal keys keep their incoming relative order.
pub fn sort_tasks(
  tasks: &mut [Task],
  order: SortOrder
) {
  match order {
    | SortOrder::Priority => {
      tasks.sort_by_key(|task| {
        Reverse(task.priority)
      });
    }
    // UTF-16 code-unit order, so
    // astral characters sort below
    // U+E000..=U+FFFF.
    | SortOrder::Name => {
      tasks.sort_by(|a, b| {
        a.title
          .encode_utf16()
          .cmp(b.title.encode_utf16())
      });
    }
    | SortOrder::Date => {
      tasks
        .sort_by_key(|task| task.due);
    }
  }
}

/// The list shown to the user:
/// `sort(filter(tasks, filter), order)`.
#[must_use]
pub fn derive_task_list(
  tasks: &[Task],
  prefs: &UserPreferences
) -> Vec<Task> {
  let mut derived = filter_tasks(
    tasks,
    prefs.priority_filter
  );
  sort_tasks(
    &mut derived,
    prefs.sort_order
  );
  trace!(
    input = tasks.len(),
    output = derived.len(),
    sort = %prefs.sort_order,
    filter = %prefs.priority_filter,
    "derived task list"
  );
  derived
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    TimeZone,
    Utc
  };

  use super::*;

  fn task(
    id: u64,
    title: &str,
    day: i64,
    priority: i64
  ) -> Task {
    let base = Utc
      .with_ymd_and_hms(
        2026, 5, 1, 12, 0, 0
      )
      .single()
      .expect("valid base");
    let mut task = Task::new(
      title.to_string(),
      String::new(),
      base + Duration::days(day),
      priority
    );
    task.id = Some(id);
    task
  }

  fn fixture() -> Vec<Task> {
    vec![
      task(1, "essay", 3, 3),
      task(2, "Laundry", 1, 1),
      task(3, "groceries", 2, 2),
      task(4, "budget", 5, 3),
      task(5, "call mum", 4, 1),
    ]
  }

  fn ids(tasks: &[Task]) -> Vec<u64> {
    tasks
      .iter()
      .filter_map(|t| t.id)
      .collect()
  }

  #[test]
  fn filter_keeps_exact_priority_only()
  {
    let tasks = fixture();
    for raw in 0..=3 {
      let filter =
        PriorityFilter::from_raw(raw);
      let kept =
        filter_tasks(&tasks, filter);
      if raw == 0 {
        assert_eq!(
          kept.len(),
          tasks.len()
        );
      } else {
        assert!(
          kept
            .iter()
            .all(|t| t.priority == raw)
        );
        assert_eq!(
          kept.len(),
          tasks
            .iter()
            .filter(|t| t.priority
              == raw)
            .count()
        );
      }
    }
  }

  #[test]
  fn priority_sort_is_descending_and_stable()
  {
    let mut tasks = fixture();
    sort_tasks(
      &mut tasks,
      SortOrder::Priority
    );
    assert_eq!(
      ids(&tasks),
      vec![1, 4, 3, 2, 5]
    );
  }

  #[test]
  fn name_sort_is_lexicographic() {
    let mut tasks = fixture();
    sort_tasks(
      &mut tasks,
      SortOrder::Name
    );
    // Uppercase sorts before lowercase.
    assert_eq!(
      ids(&tasks),
      vec![2, 4, 5, 1, 3]
    );
  }

  #[test]
  fn name_sort_uses_utf16_units() {
    let mut tasks = vec![
      task(1, "\u{FFFD} replacement", 1, 1),
      task(2, "\u{1F600} smile", 2, 1),
      task(3, "plain", 3, 1),
    ];
    sort_tasks(
      &mut tasks,
      SortOrder::Name
    );
    assert_eq!(
      ids(&tasks),
      vec![3, 2, 1]
    );
  }

  #[test]
  fn unknown_sort_key_orders_by_date() {
    let prefs = UserPreferences {
      sort_order: SortOrder::from_key(
        "whatever"
      ),
      ..UserPreferences::default()
    };
    let derived = derive_task_list(
      &fixture(),
      &prefs
    );
    assert_eq!(
      ids(&derived),
      vec![2, 3, 1, 5, 4]
    );
    assert!(
      derived
        .windows(2)
        .all(|w| w[0].due <= w[1].due)
    );
  }

  #[test]
  fn filter_then_sort() {
    let prefs = UserPreferences {
      sort_order:      SortOrder::Date,
      priority_filter:
        PriorityFilter::Level(3),
      dark_theme:      false
    };
    let derived = derive_task_list(
      &fixture(),
      &prefs
    );
    assert_eq!(ids(&derived), vec![1, 4]);
  }

  #[test]
  fn empty_input_derives_empty() {
    let derived = derive_task_list(
      &[],
      &UserPreferences::default()
    );
    assert!(derived.is_empty());
  }
}
