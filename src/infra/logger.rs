use crate::domain::models::{DropReason, Plan};
use env_logger::Builder;
use log::{Level, warn};
use std::collections::BTreeMap;
use std::io::Write;

pub const LOG_LEVEL_ENV: &str = "SNIP_LOG_LEVEL";

pub fn filter_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    }
}

pub fn setup_logger(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let env = env_logger::Env::default().filter_or(LOG_LEVEL_ENV, filter_for(verbosity));

    Builder::from_env(env)
        .format(|buf, record| {
            let level_color = match record.level() {
                Level::Error => "31", // Red
                Level::Warn => "33",  // Yellow
                Level::Info => "32",  // Green
                Level::Debug => "36", // Cyan
                Level::Trace => "35", // Magenta
            };

            writeln!(
                buf,
                "\x1B[{}m[{}]\x1B[0m [{}] {}",
                level_color,
                record.level(),
                buf.timestamp(),
                record.args()
            )
        })
        .format_timestamp_secs()
        .try_init()
}

/// One line per dropped slice and one per class of per-file drop.
pub fn partial_warnings(plan: &Plan) -> Vec<String> {
    let mut lines: Vec<String> = plan
        .dropped_slices
        .iter()
        .map(|s| format!("slice dropped due to budget: {}", s))
        .collect();

    let mut by_reason: BTreeMap<DropReason, usize> = BTreeMap::new();
    for entry in &plan.dropped {
        if entry.reason != DropReason::BudgetExceeded {
            *by_reason.entry(entry.reason).or_default() += 1;
        }
    }
    lines.extend(
        by_reason
            .into_iter()
            .map(|(reason, count)| format!("{} file(s) dropped: {}", count, reason)),
    );

    if plan.hard_cut {
        lines.push("bundle text was hard-cut to fit the character budget".to_string());
    }
    lines
}

pub fn warn_partial(plan: &Plan) {
    for line in partial_warnings(plan) {
        warn!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DroppedEntry, ExclusionReason};
    use std::sync::Once;

    static INIT: Once = Once::new();

    #[test]
    fn test_setup_logger() {
        INIT.call_once(|| {
            assert!(setup_logger(0).is_ok());
        });
    }

    #[test]
    fn test_filter_for() {
        assert_eq!(filter_for(0), "error");
        assert_eq!(filter_for(2), "info");
        assert_eq!(filter_for(9), "debug");
    }

    fn dropped(path: &str, reason: DropReason) -> DroppedEntry {
        DroppedEntry {
            rel_path: path.to_string(),
            slices: vec!["s".to_string()],
            primary_slice: "s".to_string(),
            reason,
            detail: String::new(),
        }
    }

    #[test]
    fn test_partial_warnings_are_grouped() {
        let mut plan = Plan::new("p", vec!["a".to_string(), "docs".to_string()]);
        plan.dropped_slices = vec!["docs".to_string()];
        plan.dropped = vec![
            dropped("a", DropReason::InvalidEncoding),
            dropped("b", DropReason::InvalidEncoding),
            dropped("c", ExclusionReason::Unreadable.into()),
            dropped("d", DropReason::BudgetExceeded),
            dropped("e", DropReason::BudgetExceeded),
        ];

        assert_eq!(
            partial_warnings(&plan),
            vec![
                "slice dropped due to budget: docs",
                "1 file(s) dropped: unreadable",
                "2 file(s) dropped: invalid_utf8",
            ]
        );
    }
}
