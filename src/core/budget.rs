use crate::core::plan::{FileLimits, drop_slice, retruncate};
use crate::domain::errors::{BudgetError, Cancelled, RenderError};
use crate::domain::models::{CancelFlag, Limits, Plan};
use log::{debug, info};
use std::collections::BTreeMap;

pub const HARD_CUT_MARKER: &str = "\n… [BUNDLE TRUNCATED: budget_exceeded]\n";

/// A plan together with the exact text it rendered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Budgeted {
    pub plan: Plan,
    pub text: String,
}

pub fn char_count(text: &str) -> usize {
    text.chars().count()
}

/// The slice the ladder drops next: lowest priority among those still kept, name
/// ascending on ties. `None` once only one slice is left.
pub fn next_slice_to_drop(plan: &Plan, priorities: &BTreeMap<String, i32>) -> Option<String> {
    let kept = plan.kept_slices();
    if kept.len() <= 1 {
        return None;
    }
    kept.into_iter()
        .min_by(|a, b| {
            let pa = priorities.get(*a).copied().unwrap_or(0);
            let pb = priorities.get(*b).copied().unwrap_or(0);
            pa.cmp(&pb).then_with(|| a.cmp(b))
        })
        .map(str::to_string)
}

/// Per-file line limit for the tightening step.
pub fn tightened(limits: &Limits) -> FileLimits {
    FileLimits {
        max_lines: (limits.per_file_max_lines / 2).max(1),
        max_bytes: limits.per_file_max_bytes,
    }
}

/// Cuts rendered text to at most `max_chars` characters, marker included.
pub fn hard_cut(text: &str, max_chars: usize) -> String {
    let marker_chars = char_count(HARD_CUT_MARKER);
    if max_chars < marker_chars {
        return HARD_CUT_MARKER.chars().take(max_chars).collect();
    }

    let keep = max_chars - marker_chars;
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(HARD_CUT_MARKER);
    out
}

/// Shrinks `plan` until `render` fits in `limits.max_chars` characters.
///
/// Ladder: drop the lowest-priority slice repeatedly (never the last one), then
/// halve the per-file line limit and re-read once, then hard-cut the text.
/// The renderer is called after every step; its failure aborts the run.
pub fn enforce_global_budget<F>(
    plan: Plan,
    limits: &Limits,
    priorities: &BTreeMap<String, i32>,
    cancel: &CancelFlag,
    render: F,
) -> Result<Budgeted, BudgetError>
where
    F: Fn(&Plan) -> Result<String, RenderError>,
{
    let max_chars = limits.max_chars;
    let fits = |text: &str| char_count(text) <= max_chars;
    let check_cancel = || {
        if cancel.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    };

    check_cancel()?;
    let text = render(&plan)?;
    if fits(&text) {
        debug!("Bundle fits budget: {} chars", char_count(&text));
        return Ok(Budgeted { plan, text });
    }
    info!(
        "Bundle is {} chars, over budget of {}",
        char_count(&text),
        max_chars
    );

    let mut current = plan;
    while let Some(slice) = next_slice_to_drop(&current, priorities) {
        check_cancel()?;
        current = drop_slice(&current, &slice);
        let text = render(&current)?;
        info!(
            "Dropped slice {}: bundle now {} chars",
            slice,
            char_count(&text)
        );
        if fits(&text) {
            return Ok(Budgeted {
                plan: current,
                text,
            });
        }
    }

    check_cancel()?;
    let tight = tightened(limits);
    current = retruncate(&current, tight, cancel)?;
    let text = render(&current)?;
    info!(
        "Tightened per-file lines to {}: bundle now {} chars",
        tight.max_lines,
        char_count(&text)
    );
    if fits(&text) {
        return Ok(Budgeted {
            plan: current,
            text,
        });
    }

    info!("Hard-cutting bundle to {} chars", max_chars);
    current.hard_cut = true;
    current.normalize();
    Ok(Budgeted {
        text: hard_cut(&text, max_chars),
        plan: current,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FileEntry;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn entry(dir: &Path, rel: &str, content: &str, slice: &str, priority: i32) -> FileEntry {
        fs::write(dir.join(rel), content).unwrap();
        FileEntry {
            rel_path: rel.to_string(),
            abs_path: dir.join(rel),
            slices: vec![slice.to_string()],
            primary_slice: slice.to_string(),
            priority,
            original_lines: content.lines().count(),
            original_bytes: content.len() as u64,
            kept_lines: content.lines().count(),
            kept_bytes: content.len(),
            truncated: false,
            content: content.to_string(),
        }
    }

    fn render_contents(plan: &Plan) -> Result<String, RenderError> {
        Ok(plan.included.iter().map(|f| f.content.as_str()).collect())
    }

    fn priorities(pairs: &[(&str, i32)]) -> BTreeMap<String, i32> {
        pairs.iter().map(|(n, p)| (n.to_string(), *p)).collect()
    }

    fn limits(max_chars: usize) -> Limits {
        Limits {
            max_chars,
            per_file_max_lines: 100,
            per_file_max_bytes: 4096,
        }
    }

    fn two_slice_plan(dir: &Path) -> Plan {
        let mut plan = Plan::new("p", vec!["api".to_string(), "docs".to_string()]);
        plan.included = vec![
            entry(dir, "api.go", "0123456789\n", "api", 100),
            entry(dir, "docs.md", "abcdefghij\n", "docs", 1),
        ];
        plan.normalize();
        plan
    }

    #[test]
    fn test_fitting_plan_is_returned_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let plan = two_slice_plan(temp_dir.path());
        let prio = priorities(&[("api", 100), ("docs", 1)]);

        let out =
            enforce_global_budget(plan.clone(), &limits(1000), &prio, &CancelFlag::new(), render_contents)
                .unwrap();
        assert_eq!(out.plan, plan);
        assert_eq!(out.text, "0123456789\nabcdefghij\n");
    }

    #[test]
    fn test_low_priority_slice_dropped_first() {
        let temp_dir = TempDir::new().unwrap();
        let plan = two_slice_plan(temp_dir.path());
        let prio = priorities(&[("api", 100), ("docs", 1)]);

        let out =
            enforce_global_budget(plan, &limits(15), &prio, &CancelFlag::new(), render_contents)
                .unwrap();

        assert_eq!(out.plan.dropped_slices, vec!["docs"]);
        assert_eq!(out.plan.included.len(), 1);
        assert_eq!(out.plan.included[0].rel_path, "api.go");
        assert_eq!(out.plan.dropped[0].rel_path, "docs.md");
        assert!(out.plan.partial);
        assert!(!out.plan.hard_cut);
    }

    #[test]
    fn test_drop_order_ties_break_by_name() {
        let plan = Plan::new("p", vec!["b".into(), "a".into(), "top".into()]);
        let prio = priorities(&[("a", 5), ("b", 5), ("top", 50)]);
        assert_eq!(next_slice_to_drop(&plan, &prio).as_deref(), Some("a"));

        let mut plan = plan;
        plan.dropped_slices = vec!["a".into(), "b".into()];
        assert_eq!(next_slice_to_drop(&plan, &prio), None);
    }

    #[test]
    fn test_tightening_rereads_with_half_the_lines() {
        let temp_dir = TempDir::new().unwrap();
        let content: String = (0..10)
            .map(|i| format!("line {i:02} {}\n", "x".repeat(40)))
            .collect();
        let mut plan = Plan::new("p", vec!["api".to_string()]);
        plan.included = vec![entry(temp_dir.path(), "a.txt", &content, "api", 1)];
        plan.normalize();

        let limits = Limits {
            max_chars: 300,
            per_file_max_lines: 10,
            per_file_max_bytes: 4096,
        };
        let out = enforce_global_budget(
            plan,
            &limits,
            &priorities(&[("api", 1)]),
            &CancelFlag::new(),
            render_contents,
        )
        .unwrap();

        assert!(!out.plan.hard_cut);
        assert_eq!(out.plan.included[0].kept_lines, 5);
        assert!(out.plan.included[0].truncated);
        assert!(char_count(&out.text) <= 300);
    }

    #[test]
    fn test_hard_cut_when_nothing_else_fits() {
        let temp_dir = TempDir::new().unwrap();
        let mut plan = Plan::new("p", vec!["api".to_string()]);
        plan.included = vec![entry(temp_dir.path(), "a.txt", &"é".repeat(500), "api", 1)];
        plan.normalize();

        let out = enforce_global_budget(
            plan,
            &limits(100),
            &priorities(&[("api", 1)]),
            &CancelFlag::new(),
            render_contents,
        )
        .unwrap();

        assert!(out.plan.hard_cut);
        assert!(out.plan.partial);
        assert_eq!(char_count(&out.text), 100);
        assert!(out.text.ends_with(HARD_CUT_MARKER));
    }

    #[test]
    fn test_hard_cut_smaller_than_marker() {
        let out = hard_cut("whatever", 5);
        assert_eq!(char_count(&out), 5);
        assert_eq!(hard_cut("abc", 0), "");
    }

    #[test]
    fn test_render_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let plan = two_slice_plan(temp_dir.path());
        let err = enforce_global_budget(
            plan,
            &limits(1),
            &priorities(&[]),
            &CancelFlag::new(),
            |_| Err(RenderError::Other("boom".to_string())),
        )
        .unwrap_err();
        assert!(matches!(err, BudgetError::Render(_)));
    }

    #[test]
    fn test_cancelled_before_render() {
        let temp_dir = TempDir::new().unwrap();
        let plan = two_slice_plan(temp_dir.path());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = enforce_global_budget(plan, &limits(1), &priorities(&[]), &cancel, render_contents)
            .unwrap_err();
        assert!(matches!(err, BudgetError::Cancelled(_)));
    }

    #[test]
    fn test_ladder_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let prio = priorities(&[("api", 100), ("docs", 1)]);
        let run = || {
            enforce_global_budget(
                two_slice_plan(temp_dir.path()),
                &limits(8),
                &prio,
                &CancelFlag::new(),
                render_contents,
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }
}
