//! Human-readable output for registries and collector results.

use std::fmt::Write;

use chrono::{TimeZone, Utc};
use tally_durability::{AccessMode, RegistryContents, RegistryHeader};
use tally_recorder::RecorderSummary;

fn format_ts(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => ms.to_string(),
    }
}

fn format_mode(mode: AccessMode) -> &'static str {
    match mode {
        AccessMode::ReadWrite => "read-write",
        AccessMode::ReadOnly => "read-only",
    }
}

/// Header fields, one per line.
pub fn format_header(header: &RegistryHeader) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "name:           {}", header.name());
    let _ = writeln!(out, "mode:           {}", format_mode(header.access_mode));
    let _ = writeln!(
        out,
        "version:        {} ({})",
        header.version,
        format_ts(header.version)
    );
    let _ = writeln!(out, "slots:          {}", header.slot_count);
    if header.has_coverage() {
        let _ = writeln!(out, "coverage ends:  {}", header.coverage_location);
    } else {
        let _ = writeln!(out, "coverage ends:  (none)");
    }
    let _ = writeln!(out, "sessions end:   {}", header.last_session_location);
    out
}

/// Sessions, packages and coverage summary.
pub fn format_contents(contents: &RegistryContents, show_files: bool, show_contexts: bool) -> String {
    let mut out = format_header(&contents.header);
    let project = contents.project();

    let _ = writeln!(out, "\n(sessions) {}", contents.sessions.len());
    for session in &contents.sessions {
        let _ = writeln!(
            out,
            "  {}  {} .. {}  files={}",
            session.version,
            format_ts(session.start_ts),
            format_ts(session.end_ts),
            session.files.len()
        );
    }

    let packages = project.packages();
    let _ = writeln!(out, "\n(packages) {}", packages.len());
    for package in &packages {
        let name = if package.name.is_empty() {
            "(default)"
        } else {
            package.name
        };
        let _ = writeln!(
            out,
            "  {}  files={} statements={} lines={}",
            name,
            package.files.len(),
            package.statement_count(),
            package.line_count()
        );
        if show_files {
            for file in &package.files {
                let _ = writeln!(
                    out,
                    "    {}  slots={}..{}",
                    file.path,
                    file.data_index,
                    file.slot_end()
                );
            }
        }
    }

    match &contents.coverage {
        Some(coverage) => {
            let _ = writeln!(
                out,
                "\n(coverage) {}/{} slots hit, {} per-test records",
                coverage.covered_slots(),
                coverage.hits.len(),
                coverage.per_test.len()
            );
        }
        None => {
            let _ = writeln!(out, "\n(coverage) none");
        }
    }

    if show_contexts {
        let user = contents
            .context_store()
            .map(|s| s.user_contexts())
            .unwrap_or_default();
        let _ = writeln!(out, "\n(contexts) {}", user.len());
        for ctx in &user {
            let index = ctx.index().map_or_else(|| "-".to_string(), |i| i.to_string());
            let _ = writeln!(out, "  {:>3}  {}", index, ctx.name());
        }
    }
    out
}

/// One line per recorder.
pub fn format_summaries(summaries: &[RecorderSummary]) -> String {
    if summaries.is_empty() {
        return "(recorders) none\n".to_string();
    }
    let mut out = format!("(recorders) {}\n", summaries.len());
    for s in summaries {
        let _ = writeln!(
            out,
            "  {}  events={} closed={} open={} hits={}",
            s.recorder_id, s.events, s.closed_slices, s.open_slices, s.hits
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_header_without_coverage() {
        let header = RegistryHeader::new("demo", AccessMode::ReadOnly, 0);
        let text = format_header(&header);
        assert!(text.contains("name:           demo"));
        assert!(text.contains("read-only"));
        assert!(text.contains("1970-01-01 00:00:00.000 UTC"));
        assert!(text.contains("coverage ends:  (none)"));
    }

    #[test]
    fn test_format_summaries() {
        assert_eq!(format_summaries(&[]), "(recorders) none\n");
        let text = format_summaries(&[RecorderSummary {
            recorder_id: "r1".into(),
            events: 7,
            closed_slices: 2,
            open_slices: 0,
            hits: 11,
        }]);
        assert_eq!(
            text,
            "(recorders) 1\n  r1  events=7 closed=2 open=0 hits=11\n"
        );
    }

    #[test]
    fn test_format_contents_of_empty_registry() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.db");
        let registry =
            tally_durability::RegistryFile::create(&path, "empty", AccessMode::ReadWrite).unwrap();
        let text = format_contents(&registry.read_contents().unwrap(), true, true);
        assert!(text.contains("(sessions) 0"));
        assert!(text.contains("(packages) 0"));
        assert!(text.contains("(coverage) none"));
        assert!(text.contains("(contexts) 0"));
    }
}
