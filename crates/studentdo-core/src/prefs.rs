use std::fmt;

use serde::{Deserialize, Serialize};

use crate::settings::Settings;

pub const DARK_THEME_KEY: &str = "dark_theme";
pub const SORT_ORDER_KEY: &str = "sort_order";
pub const PRIORITY_FILTER_KEY: &str = "priority_filter";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Date,
    Priority,
    Name,
}

impl SortOrder {
    pub fn as_key(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Priority => "priority",
            Self::Name => "name",
        }
    }

    /// Only the exact keys `priority` and `name` select those orders;
    /// anything else, including other casings, orders by date.
    pub fn from_key(key: &str) -> Self {
        match key {
            "priority" => Self::Priority,
            "name" => Self::Name,
            _ => Self::Date,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PriorityFilter {
    #[default]
    All,
    Level(i64),
}

impl PriorityFilter {
    pub fn from_raw(raw: i64) -> Self {
        if raw <= 0 {
            Self::All
        } else {
            Self::Level(raw)
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Self::All => 0,
            Self::Level(level) => level,
        }
    }

    pub fn accepts(self, priority: i64) -> bool {
        match self {
            Self::All => true,
            Self::Level(level) => priority == level,
        }
    }
}

impl fmt::Display for PriorityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Level(level) => match crate::task::Priority::from_level(*level) {
                Some(priority) => f.write_str(&priority.label().to_ascii_lowercase()),
                None => write!(f, "{level}"),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserPreferences {
    pub dark_theme: bool,
    pub sort_order: SortOrder,
    pub priority_filter: PriorityFilter,
}

impl UserPreferences {
    /// Absent or wrongly typed keys read as their defaults.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            dark_theme: settings.get_bool(DARK_THEME_KEY).unwrap_or(false),
            sort_order: settings
                .get_str(SORT_ORDER_KEY)
                .map(SortOrder::from_key)
                .unwrap_or_default(),
            priority_filter: settings
                .get_int(PRIORITY_FILTER_KEY)
                .map(PriorityFilter::from_raw)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_settings_read_as_defaults() {
        let prefs = UserPreferences::from_settings(&Settings::default());
        assert!(!prefs.dark_theme);
        assert_eq!(prefs.sort_order, SortOrder::Date);
        assert_eq!(prefs.priority_filter, PriorityFilter::All);
    }

    #[test]
    fn unknown_sort_key_falls_back_to_date() {
        assert_eq!(SortOrder::from_key("priority"), SortOrder::Priority);
        assert_eq!(SortOrder::from_key("name"), SortOrder::Name);
        assert_eq!(SortOrder::from_key("Priority"), SortOrder::Date);
        assert_eq!(SortOrder::from_key("NAME"), SortOrder::Date);
        assert_eq!(SortOrder::from_key(" name"), SortOrder::Date);
        assert_eq!(SortOrder::from_key("due"), SortOrder::Date);
        assert_eq!(SortOrder::from_key(""), SortOrder::Date);
    }

    #[test]
    fn priority_filter_raw_mapping() {
        assert_eq!(PriorityFilter::from_raw(0), PriorityFilter::All);
        assert_eq!(PriorityFilter::from_raw(-4), PriorityFilter::All);
        assert_eq!(PriorityFilter::from_raw(2), PriorityFilter::Level(2));
        assert_eq!(PriorityFilter::Level(3).as_raw(), 3);
        assert!(PriorityFilter::All.accepts(7));
        assert!(!PriorityFilter::Level(1).accepts(3));
        assert_eq!(PriorityFilter::Level(2).to_string(), "medium");
    }
}
