//! Three-way textual merge.
//!
//! Combines two divergent revisions of a text buffer against their common
//! ancestor at line granularity. Overlapping modifications produce
//! diff3-style conflict markers labelled `LOCAL`/`BASE`/`REMOTE`; the
//! `clean` flag mirrors the exit contract of `git merge-file`.

use similar::{Algorithm, DiffOp, DiffTag, capture_diff_slices};

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Merged content; contains conflict markers when `clean` is false.
    pub content: Vec<u8>,
    /// True when no overlapping hunks remained.
    pub clean: bool,
}

impl MergeOutcome {
    fn clean(content: &[u8]) -> Self {
        Self {
            content: content.to_vec(),
            clean: true,
        }
    }
}

const BINARY_SNIFF_LEN: usize = 8000;

/// A file is treated as binary when any of its first 8000 bytes is NUL.
pub fn is_binary(data: &[u8]) -> bool {
    let len = data.len().min(BINARY_SNIFF_LEN);
    data[..len].contains(&0)
}

/// True if the buffer carries any git conflict marker.
pub fn contains_conflict_markers(data: &[u8]) -> bool {
    const MARKERS: [&[u8]; 3] = [b"<<<<<<<", b"=======", b">>>>>>>"];
    MARKERS.iter().any(|marker| contains(data, marker))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Merge `local` and `remote` against `base`.
///
/// Pairwise-equal inputs short-circuit: no remote change keeps local, no
/// local change takes remote, and identical edits on both sides are taken
/// once. Everything else goes through the line-based diff3 combination.
pub fn three_way_merge(base: &[u8], local: &[u8], remote: &[u8]) -> MergeOutcome {
    if base == remote {
        return MergeOutcome::clean(local);
    }
    if base == local {
        return MergeOutcome::clean(remote);
    }
    if local == remote {
        return MergeOutcome::clean(local);
    }
    diff3(base, local, remote)
}

/// One contiguous change relative to the base: base lines
/// `[old_start, old_end)` are replaced by side lines `[new_start, new_end)`.
#[derive(Debug, Clone)]
struct Edit {
    old_start: usize,
    old_end: usize,
    new_start: usize,
    new_end: usize,
}

impl Edit {
    fn is_insert(&self) -> bool {
        self.old_start == self.old_end
    }
}

fn diff3(base: &[u8], local: &[u8], remote: &[u8]) -> MergeOutcome {
    let base_lines = split_lines(base);
    let local_lines = split_lines(local);
    let remote_lines = split_lines(remote);

    let local_edits = edits(&capture_diff_slices(
        Algorithm::Myers,
        &base_lines,
        &local_lines,
    ));
    let remote_edits = edits(&capture_diff_slices(
        Algorithm::Myers,
        &base_lines,
        &remote_lines,
    ));

    let mut out: Vec<u8> = Vec::new();
    let mut clean = true;
    let mut cursor = 0usize;
    let mut i = 0usize;
    let mut j = 0usize;

    while i < local_edits.len() || j < remote_edits.len() {
        let conflicting = match (local_edits.get(i), remote_edits.get(j)) {
            (Some(a), Some(b)) => edits_conflict(a, b),
            _ => false,
        };

        if !conflicting {
            // Emit the earlier edit alone; at equal positions the pure
            // insertion goes first (it lands before the base line the
            // other edit consumes).
            let take_local = match (local_edits.get(i), remote_edits.get(j)) {
                (Some(a), Some(b)) => {
                    if a.old_start == b.old_start {
                        a.is_insert()
                    } else {
                        a.old_start < b.old_start
                    }
                }
                (Some(_), None) => true,
                _ => false,
            };
            let (edit, lines) = if take_local {
                i += 1;
                (&local_edits[i - 1], &local_lines)
            } else {
                j += 1;
                (&remote_edits[j - 1], &remote_lines)
            };
            copy_lines(&mut out, &base_lines[cursor..edit.old_start]);
            copy_lines(&mut out, &lines[edit.new_start..edit.new_end]);
            cursor = edit.old_end.max(cursor);
            continue;
        }

        // Conflict region: absorb every edit from either side that touches
        // the growing [lo, hi) span of base lines.
        let a = &local_edits[i];
        let b = &remote_edits[j];
        let lo = a.old_start.min(b.old_start);
        let mut hi = a.old_end.max(b.old_end);
        let mut group_local = vec![local_edits[i].clone()];
        let mut group_remote = vec![remote_edits[j].clone()];
        i += 1;
        j += 1;
        loop {
            let mut grew = false;
            while let Some(e) = local_edits.get(i) {
                if !touches_region(lo, hi, e) {
                    break;
                }
                hi = hi.max(e.old_end);
                group_local.push(e.clone());
                i += 1;
                grew = true;
            }
            while let Some(e) = remote_edits.get(j) {
                if !touches_region(lo, hi, e) {
                    break;
                }
                hi = hi.max(e.old_end);
                group_remote.push(e.clone());
                j += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }

        copy_lines(&mut out, &base_lines[cursor..lo]);
        let local_version = apply_edits(&base_lines, &local_lines, lo, hi, &group_local);
        let remote_version = apply_edits(&base_lines, &remote_lines, lo, hi, &group_remote);
        if local_version == remote_version {
            out.extend_from_slice(&local_version);
        } else {
            clean = false;
            let mut base_version = Vec::new();
            copy_lines(&mut base_version, &base_lines[lo..hi]);
            push_marker(&mut out, b"<<<<<<< LOCAL");
            push_block(&mut out, &local_version);
            push_marker(&mut out, b"||||||| BASE");
            push_block(&mut out, &base_version);
            push_marker(&mut out, b"=======");
            push_block(&mut out, &remote_version);
            push_marker(&mut out, b">>>>>>> REMOTE");
        }
        cursor = hi;
    }

    copy_lines(&mut out, &base_lines[cursor..]);
    MergeOutcome { content: out, clean }
}

/// Whether two edits (one per side) contend for the same base lines.
///
/// A pure insertion only conflicts with an edit that strictly contains its
/// anchor point, or with another insertion at the same point; an insertion
/// at a region boundary composes cleanly.
fn edits_conflict(a: &Edit, b: &Edit) -> bool {
    match (a.is_insert(), b.is_insert()) {
        (true, true) => a.old_start == b.old_start,
        (true, false) => b.old_start < a.old_start && a.old_start < b.old_end,
        (false, true) => a.old_start < b.old_start && b.old_start < a.old_end,
        (false, false) => a.old_start < b.old_end && b.old_start < a.old_end,
    }
}

fn touches_region(lo: usize, hi: usize, e: &Edit) -> bool {
    if e.is_insert() {
        lo < e.old_start && e.old_start < hi
    } else {
        e.old_start < hi && e.old_end > lo
    }
}

fn edits(ops: &[DiffOp]) -> Vec<Edit> {
    ops.iter()
        .filter(|op| op.tag() != DiffTag::Equal)
        .map(|op| {
            let old = op.old_range();
            let new = op.new_range();
            Edit {
                old_start: old.start,
                old_end: old.end,
                new_start: new.start,
                new_end: new.end,
            }
        })
        .collect()
}

/// Replay one side's grouped edits over base lines `[lo, hi)`.
fn apply_edits(
    base_lines: &[&[u8]],
    side_lines: &[&[u8]],
    lo: usize,
    hi: usize,
    group: &[Edit],
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = lo;
    for edit in group {
        copy_lines(&mut out, &base_lines[pos..edit.old_start]);
        copy_lines(&mut out, &side_lines[edit.new_start..edit.new_end]);
        pos = edit.old_end.max(pos);
    }
    copy_lines(&mut out, &base_lines[pos..hi]);
    out
}

/// Split into lines, keeping terminators; a final line without a newline is
/// kept as-is.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (idx, &byte) in data.iter().enumerate() {
        if byte == b'\n' {
            lines.push(&data[start..=idx]);
            start = idx + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

fn copy_lines(out: &mut Vec<u8>, lines: &[&[u8]]) {
    for line in lines {
        out.extend_from_slice(line);
    }
}

fn push_marker(out: &mut Vec<u8>, marker: &[u8]) {
    out.extend_from_slice(marker);
    out.push(b'\n');
}

/// Append a version block, newline-terminating it so the following marker
/// starts on its own line.
fn push_block(out: &mut Vec<u8>, block: &[u8]) {
    out.extend_from_slice(block);
    if !block.is_empty() && !block.ends_with(b"\n") {
        out.push(b'\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_remote_change_keeps_local() {
        let base = b"line1\nline2\n";
        let local = b"line1\nlocal\n";
        let outcome = three_way_merge(base, local, base);
        assert!(outcome.clean);
        assert_eq!(outcome.content, local);
    }

    #[test]
    fn no_local_change_takes_remote() {
        let base = b"line1\nline2\n";
        let remote = b"line1\nremote\n";
        let outcome = three_way_merge(base, base, remote);
        assert!(outcome.clean);
        assert_eq!(outcome.content, remote);
    }

    #[test]
    fn identical_edits_taken_once() {
        let base = b"line1\n";
        let both = b"line1\nshared\n";
        let outcome = three_way_merge(base, both, both);
        assert!(outcome.clean);
        assert_eq!(outcome.content, both);
    }

    #[test]
    fn non_overlapping_edits_combine_cleanly() {
        // Remote rewrites the first line and appends; local appends a
        // different line at the end. All three land in the result.
        let base = b"export function capitalize(s){return s[0].toUpperCase()+s.slice(1);}\n";
        let local = b"export function capitalize(s){return s[0].toUpperCase()+s.slice(1);}\nexport function lowercase(s){return s.toLowerCase();}\n";
        let remote = b"export function capitalize(s){return s.toUpperCase();}\nexport function uppercase(s){return s.toUpperCase();}\n";

        let outcome = three_way_merge(base, local, remote);
        assert!(outcome.clean);
        assert_eq!(
            outcome.content,
            b"export function capitalize(s){return s.toUpperCase();}\nexport function uppercase(s){return s.toUpperCase();}\nexport function lowercase(s){return s.toLowerCase();}\n"
        );
    }

    #[test]
    fn distinct_lines_changed_on_both_sides_merge_cleanly() {
        let base = b"a\nb\nc\nd\n";
        let local = b"a\nB\nc\nd\n";
        let remote = b"a\nb\nc\nD\n";
        let outcome = three_way_merge(base, local, remote);
        assert!(outcome.clean);
        assert_eq!(outcome.content, b"a\nB\nc\nD\n");
    }

    #[test]
    fn same_line_changed_both_sides_conflicts() {
        let base = b"line1\nline2\nline3\n";
        let local = b"line1\nlocal change to line2\nline3\n";
        let remote = b"line1\nremote change to line2\nline3\n";

        let outcome = three_way_merge(base, local, remote);
        assert!(!outcome.clean);
        let expected = b"line1\n\
            <<<<<<< LOCAL\n\
            local change to line2\n\
            ||||||| BASE\n\
            line2\n\
            =======\n\
            remote change to line2\n\
            >>>>>>> REMOTE\n\
            line3\n";
        assert_eq!(outcome.content, expected);
        assert!(contains_conflict_markers(&outcome.content));
    }

    #[test]
    fn insertions_at_same_point_conflict() {
        let base = b"a\nz\n";
        let local = b"a\nlocal\nz\n";
        let remote = b"a\nremote\nz\n";
        let outcome = three_way_merge(base, local, remote);
        assert!(!outcome.clean);
        assert!(contains_conflict_markers(&outcome.content));
    }

    #[test]
    fn missing_trailing_newline_is_preserved_on_clean_merge() {
        let base = b"a\nb";
        let local = b"a\nb";
        let remote = b"a\nc";
        let outcome = three_way_merge(base, local, remote);
        assert!(outcome.clean);
        assert_eq!(outcome.content, b"a\nc");
    }

    #[test]
    fn binary_detection_uses_leading_nul() {
        assert!(is_binary(b"\x00binary"));
        assert!(is_binary(b"head\x00tail"));
        assert!(!is_binary(b"plain text\n"));
        let mut long = vec![b'a'; BINARY_SNIFF_LEN];
        long.push(0);
        assert!(!is_binary(&long));
    }

    #[test]
    fn marker_scan_matches_each_marker() {
        assert!(contains_conflict_markers(b"<<<<<<< LOCAL\n"));
        assert!(contains_conflict_markers(b"x\n=======\ny\n"));
        assert!(contains_conflict_markers(b">>>>>>> REMOTE\n"));
        assert!(!contains_conflict_markers(b"== nothing here ==\n"));
    }
}
