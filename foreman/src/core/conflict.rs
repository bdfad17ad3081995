//! Structured merge-conflict data handed to resolver agents.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(<{7}|>{7})(\s|$)").expect("conflict marker regex is valid")
});

/// Inclusive, 1-based line span. `count == 0` marks an empty side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub count: usize,
}

/// One `<<<<<<< ... >>>>>>>` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// Line of the opening `<<<<<<<` marker.
    pub marker_start: usize,
    /// Line of the closing `>>>>>>>` marker.
    pub marker_end: usize,
    pub ours: LineRange,
    pub theirs: LineRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictFile {
    pub path: String,
    /// Empty when the file could not be parsed (binary, deleted on one side).
    pub regions: Vec<ConflictRegion>,
}

/// Task metadata so the resolver can understand intent on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictTask {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub result: Option<String>,
}

/// Everything a resolver needs to settle one conflicting merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictContext {
    pub task_id: String,
    /// Trunk the merge was attempted into.
    pub base_branch: String,
    /// Task branch that failed to merge.
    pub source_branch: String,
    /// Worker that produced `source_branch`.
    pub owner_agent: String,
    pub files: Vec<ConflictFile>,
    pub task: ConflictTask,
}

/// True if `text` still contains an opening or closing conflict marker line.
pub fn has_conflict_markers(text: &str) -> bool {
    MARKER_RE.is_match(text)
}

/// Extract every conflict block from a file's contents.
///
/// Understands both the default two-way layout and diff3 (`|||||||` base
/// section, which is attributed to neither side). Unterminated blocks are
/// ignored.
pub fn parse_conflict_regions(text: &str) -> Vec<ConflictRegion> {
    enum Section {
        Outside,
        Ours { open: usize },
        Base { open: usize, ours: LineRange },
        Theirs { open: usize, ours: LineRange, from: usize },
    }

    let mut regions = Vec::new();
    let mut section = Section::Outside;

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        section = match section {
            Section::Outside if line.starts_with("<<<<<<<") => Section::Ours { open: lineno },
            Section::Outside => Section::Outside,
            Section::Ours { open } if line.starts_with("|||||||") => Section::Base {
                open,
                ours: span(open + 1, lineno),
            },
            Section::Ours { open } if line.starts_with("=======") => Section::Theirs {
                open,
                ours: span(open + 1, lineno),
                from: lineno + 1,
            },
            Section::Base { open, ours } if line.starts_with("=======") => Section::Theirs {
                open,
                ours,
                from: lineno + 1,
            },
            Section::Theirs { open, ours, from } if line.starts_with(">>>>>>>") => {
                regions.push(ConflictRegion {
                    marker_start: open,
                    marker_end: lineno,
                    ours,
                    theirs: span(from, lineno),
                });
                Section::Outside
            }
            other => other,
        };
    }

    regions
}

/// Lines `[from, until)` as a range.
fn span(from: usize, until: usize) -> LineRange {
    LineRange {
        start: from,
        count: until.saturating_sub(from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_WAY: &str = "\
fn main() {
<<<<<<< HEAD
    println!(\"ours\");
=======
    println!(\"theirs\");
    println!(\"more theirs\");
>>>>>>> feature
}
";

    #[test]
    fn parses_two_way_region() {
        let regions = parse_conflict_regions(TWO_WAY);
        assert_eq!(
            regions,
            vec![ConflictRegion {
                marker_start: 2,
                marker_end: 7,
                ours: LineRange { start: 3, count: 1 },
                theirs: LineRange { start: 5, count: 2 },
            }]
        );
    }

    #[test]
    fn parses_diff3_region_excluding_base() {
        let text = "<<<<<<< ours\na\n||||||| base\nb\n=======\nc\n>>>>>>> theirs\n";
        let regions = parse_conflict_regions(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ours, LineRange { start: 2, count: 1 });
        assert_eq!(regions[0].theirs, LineRange { start: 6, count: 1 });
    }

    #[test]
    fn parses_multiple_regions_and_empty_sides() {
        let text = "<<<<<<< a\n=======\nx\n>>>>>>> b\nmid\n<<<<<<< a\ny\n=======\n>>>>>>> b\n";
        let regions = parse_conflict_regions(text);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].ours.count, 0);
        assert_eq!(regions[0].theirs, LineRange { start: 3, count: 1 });
        assert_eq!(regions[1].marker_start, 6);
        assert_eq!(regions[1].theirs.count, 0);
    }

    #[test]
    fn unterminated_block_is_ignored() {
        assert!(parse_conflict_regions("<<<<<<< a\nx\n=======\ny\n").is_empty());
    }

    #[test]
    fn detects_markers() {
        assert!(has_conflict_markers(TWO_WAY));
        assert!(!has_conflict_markers("clean file\n"));
        // A markdown underline alone is not a conflict.
        assert!(!has_conflict_markers("Title\n=======\n"));
        assert!(!has_conflict_markers("text <<<<<<< inline\n"));
    }
}
