use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::prefs::{PriorityFilter, SortOrder};
use crate::task::Priority;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "todo",
    version,
    about = "studentdo: a to-do list with a recycle bin",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "todorc", global = true)]
    pub todorc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a task
    Add {
        title: String,
        description: String,
        #[arg(long, default_value = "now")]
        due: String,
        #[arg(long, short = 'p', default_value = "medium", value_parser = parse_priority)]
        priority: i64,
    },
    /// Show the filtered, sorted task list
    List,
    /// Show one task
    Show { id: u64 },
    /// Replace fields of a task
    Edit {
        id: u64,
        #[command(flatten)]
        fields: EditFields,
    },
    /// Toggle completion
    Done { id: u64 },
    /// Move a task to the recycle bin
    Delete { id: u64 },
    /// List the recycle bin
    Bin,
    /// Bring a task back from the recycle bin
    Restore { id: u64 },
    /// Permanently delete a recycle bin entry
    Purge { id: u64 },
    /// Show or change preferences
    Prefs {
        #[command(subcommand)]
        change: Option<PrefsCommand>,
    },
    /// Reprint the task list whenever it changes, until interrupted
    Watch,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditFields {
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long, short = 'p', value_parser = parse_priority)]
    pub priority: Option<i64>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Dark,
    Light,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PrefsCommand {
    /// dark or light
    Theme {
        #[arg(value_enum)]
        theme: Theme,
    },
    /// date, priority or name
    Sort {
        #[arg(value_parser = parse_sort_order)]
        order: SortOrder,
    },
    /// all, low, medium, high or 0-3
    Filter {
        #[arg(value_parser = parse_priority_filter)]
        filter: PriorityFilter,
    },
}

pub fn parse_priority(raw: &str) -> Result<i64, String> {
    let lower = raw.trim().to_ascii_lowercase();
    let level = match lower.as_str() {
        "l" | "low" => 1,
        "m" | "med" | "medium" => 2,
        "h" | "high" => 3,
        other => other
            .parse::<i64>()
            .map_err(|_| format!("invalid priority: {raw}"))?,
    };
    Priority::from_level(level)
        .map(Priority::level)
        .ok_or_else(|| format!("priority must be low, medium or high (1-3), got {raw}"))
}

fn parse_priority_filter(raw: &str) -> Result<PriorityFilter, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "all" | "0" => Ok(PriorityFilter::All),
        _ => parse_priority(raw).map(PriorityFilter::Level),
    }
}

fn parse_sort_order(raw: &str) -> Result<SortOrder, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "date" => Ok(SortOrder::Date),
        "priority" => Ok(SortOrder::Priority),
        "name" => Ok(SortOrder::Name),
        _ => Err(format!("sort order must be date, priority or name, got {raw}")),
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls bare `rc.key=value` / `rc.key:value` arguments out of the argument
/// list so they can be applied as config overrides.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy().into_owned();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));
            match parsed {
                Some(kv) => {
                    overrides.push(kv);
                    continue;
                }
                None => warn!(arg = %s, "ignoring rc argument without a value"),
            }
        }
        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn extracts_rc_overrides() {
        let pre = preprocess_args(&args(&["todo", "rc.color=off", "list", "rc.date.format:%Y"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, args(&["todo", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.date.format".to_string(), "%Y".to_string()),
            ]
        );
    }

    #[test]
    fn parses_add_with_defaults() {
        let cli = GlobalCli::try_parse_from(["todo", "add", "Essay", "Write draft"])
            .expect("parse add");
        match cli.command {
            Some(Command::Add {
                title,
                description,
                due,
                priority,
            }) => {
                assert_eq!(title, "Essay");
                assert_eq!(description, "Write draft");
                assert_eq!(due, "now");
                assert_eq!(priority, 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn priority_words_and_levels() {
        assert_eq!(parse_priority("High"), Ok(3));
        assert_eq!(parse_priority("1"), Ok(1));
        assert!(parse_priority("4").is_err());
        assert!(parse_priority("urgent").is_err());
        assert_eq!(parse_priority_filter("all"), Ok(PriorityFilter::All));
        assert_eq!(parse_priority_filter("low"), Ok(PriorityFilter::Level(1)));
    }

    #[test]
    fn parses_prefs_subcommands() {
        let cli = GlobalCli::try_parse_from(["todo", "prefs", "sort", "priority"])
            .expect("parse prefs");
        assert!(matches!(
            cli.command,
            Some(Command::Prefs {
                change: Some(PrefsCommand::Sort {
                    order: SortOrder::Priority
                })
            })
        ));
        assert!(GlobalCli::try_parse_from(["todo", "prefs", "theme", "blue"]).is_err());
    }
}
