//! Turning trace results and breakpoint sets into what the CLI prints.

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use jtrace_engine::{TraceResult, TraceSerializer, MAIN_EXIT_LINE};
use serde::Serialize;
use serde_json::{Map, Value as Json};

/// Which snapshots of a [`TraceResult`] end up in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Only the last snapshot taken at the end of `main`, as a bare document.
    MainExit,
    /// The last snapshot per line, keyed by line.
    LastHit,
    /// Every snapshot per line in hit order, keyed by line.
    EveryHit,
}

pub fn trace_output(
    result: &TraceResult,
    source: &str,
    serializer: &TraceSerializer,
    selection: Selection,
) -> Result<Json> {
    if selection == Selection::MainExit {
        let snapshot = result
            .get(&MAIN_EXIT_LINE)
            .and_then(|snapshots| snapshots.last())
            .ok_or_else(|| anyhow!("the program never reached the end of `main`"))?;
        return Ok(serializer.serialize(source, snapshot));
    }

    let mut by_line = Map::new();
    for (line, snapshots) in result {
        let value = if selection == Selection::EveryHit {
            snapshots
                .iter()
                .map(|snapshot| serializer.serialize(source, snapshot))
                .collect()
        } else {
            match snapshots.last() {
                Some(snapshot) => serializer.serialize(source, snapshot),
                None => continue,
            }
        };
        by_line.insert(line.to_string(), value);
    }
    Ok(Json::Object(by_line))
}

/// Source lines as `String.split("\n")` yields them: trailing empty lines are
/// dropped.
pub fn source_lines(source: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = source.split('\n').collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LineEntry<'a> {
    pub line_number: usize,
    pub valid_breakpoint: bool,
    pub line_content: &'a str,
}

pub fn breakpoint_entries<'a>(source: &'a str, valid: &BTreeSet<i32>) -> Vec<LineEntry<'a>> {
    source_lines(source)
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let line_number = index + 1;
            LineEntry {
                line_number,
                valid_breakpoint: i32::try_from(line_number).is_ok_and(|n| valid.contains(&n)),
                line_content: content,
            }
        })
        .collect()
}

/// Annotated listing: `b ` marks a valid line, numbers are right-aligned.
pub fn breakpoint_listing(entries: &[LineEntry<'_>]) -> String {
    let width = entries.len().to_string().len();
    let mut out = String::new();
    for entry in entries {
        let marker = if entry.valid_breakpoint { "b " } else { "  " };
        out.push_str(&format!(
            "{marker}{:>width$} | {}\n",
            entry.line_number, entry.line_content
        ));
    }
    out
}
