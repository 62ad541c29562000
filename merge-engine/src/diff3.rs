//! Three-way text merge (diff3 algorithm).
//!
//! This is the baseline merge strategy used by git. We implement it from scratch
//! using the `similar` crate for LCS-based diffing, following the classic diff3
//! algorithm that partitions the file into stable and unstable regions.
//!
//! References:
//! - Khanna, Kuber, Pierce (2007), "A Formal Investigation of Diff3"
//! - GNU diff3 implementation

use similar::{DiffOp, TextDiff};

use crate::types::{Diff3Hunk, LineEnding, MarkerStyle, MergeOutput, MergeScenario};

/// Run a three-way merge on line-level content.
///
/// Returns a sequence of hunks, each being either stable (all agree),
/// left-only change, right-only change, an identical change on both sides,
/// or a conflict.
pub fn diff3_hunks<'a>(scenario: &MergeScenario<&'a [u8]>) -> Vec<Diff3Hunk<'a>> {
    let diff_bl = TextDiff::from_lines(scenario.base, scenario.left);
    let diff_br = TextDiff::from_lines(scenario.base, scenario.right);

    let base_lines: Vec<&'a [u8]> = diff_bl.old_slices().to_vec();
    let left_lines: Vec<&'a [u8]> = diff_bl.new_slices().to_vec();
    let right_lines: Vec<&'a [u8]> = diff_br.new_slices().to_vec();

    // For each base line, the line it is matched to on either side
    let left_match = matching(diff_bl.ops(), base_lines.len());
    let right_match = matching(diff_br.ops(), base_lines.len());

    let hunks = build_hunks(
        &base_lines,
        &left_lines,
        &right_lines,
        &left_match,
        &right_match,
    );
    coalesce_hunks(hunks)
}

/// Perform a full three-way merge, rendering conflicts with markers.
///
/// Marker lines end in CRLF when the surrounding content does, following
/// `git merge-file`.
pub fn merge(scenario: &MergeScenario<&[u8]>, style: &MarkerStyle) -> MergeOutput {
    let hunks = diff3_hunks(scenario);

    let firsts = MergeScenario::new(
        first_line(scenario.base),
        first_line(scenario.left),
        first_line(scenario.right),
    );
    let mut prev_left: Option<&[u8]> = None;
    let mut prev_right: Option<&[u8]> = None;

    let mut content = Vec::new();
    let mut conflicts = 0;

    for hunk in &hunks {
        match hunk {
            Diff3Hunk::Stable(lines) | Diff3Hunk::BothChanged(lines) => {
                extend_lines(&mut content, lines);
                if let Some(&last) = lines.last() {
                    prev_left = Some(last);
                    prev_right = Some(last);
                }
            }
            Diff3Hunk::LeftChanged(lines) => {
                extend_lines(&mut content, lines);
                prev_left = lines.last().copied().or(prev_left);
            }
            Diff3Hunk::RightChanged(lines) => {
                extend_lines(&mut content, lines);
                prev_right = lines.last().copied().or(prev_right);
            }
            Diff3Hunk::Conflict { base, left, right } => {
                conflicts += 1;
                let eol = conflict_ending(
                    prev_left.unwrap_or(firsts.left),
                    prev_right.unwrap_or(firsts.right),
                    firsts.base,
                );
                content.extend(style.start(eol));
                push_side(&mut content, left, eol);
                content.extend(style.base(eol));
                push_side(&mut content, base, eol);
                content.extend(style.separator(eol));
                push_side(&mut content, right, eol);
                content.extend(style.end(eol));
                prev_left = left.last().copied().or(prev_left);
                prev_right = right.last().copied().or(prev_right);
            }
        }
    }

    MergeOutput { content, conflicts }
}

fn extend_lines(out: &mut Vec<u8>, lines: &[&[u8]]) {
    for line in lines {
        out.extend_from_slice(line);
    }
}

/// Append one side of a conflict, terminating it so the next marker starts a line.
fn push_side(out: &mut Vec<u8>, lines: &[&[u8]], eol: LineEnding) {
    extend_lines(out, lines);
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.extend_from_slice(eol.as_bytes());
    }
}

fn first_line(text: &[u8]) -> &[u8] {
    match text.iter().position(|&b| b == b'\n') {
        Some(i) => &text[..=i],
        None => text,
    }
}

/// CRLF only if the line before the conflict on both sides, and the first
/// line of the base, all end in CRLF. Unterminated lines abstain; if every
/// line abstains the answer is LF.
fn conflict_ending(left: &[u8], right: &[u8], base: &[u8]) -> LineEnding {
    let mut crlf = None;
    for line in [left, right, base] {
        match LineEnding::of(line) {
            Some(LineEnding::Lf) => return LineEnding::Lf,
            Some(LineEnding::CrLf) => crlf = Some(LineEnding::CrLf),
            None => {}
        }
    }
    crlf.unwrap_or_default()
}

/// Map each base line to its partner on the other side of a diff.
fn matching(ops: &[DiffOp], base_len: usize) -> Vec<Option<usize>> {
    let mut matched = vec![None; base_len];
    for op in ops {
        if let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        {
            for k in 0..*len {
                matched[*old_index + k] = Some(*new_index + k);
            }
        }
    }
    matched
}

/// Walk the base, alternating between maximal stable runs and the unstable
/// chunks that lie between synchronisation points.
fn build_hunks<'a>(
    base: &[&'a [u8]],
    left: &[&'a [u8]],
    right: &[&'a [u8]],
    left_match: &[Option<usize>],
    right_match: &[Option<usize>],
) -> Vec<Diff3Hunk<'a>> {
    let mut hunks = Vec::new();
    let (mut o, mut l, mut r) = (0, 0, 0);

    loop {
        // Stable prefix: base, left and right all advance in lockstep
        let mut run = 0;
        while o + run < base.len()
            && left_match[o + run] == Some(l + run)
            && right_match[o + run] == Some(r + run)
        {
            run += 1;
        }
        if run > 0 {
            hunks.push(Diff3Hunk::Stable(base[o..o + run].to_vec()));
            o += run;
            l += run;
            r += run;
            continue;
        }

        // Next base line that both sides still carry
        let sync = (o..base.len()).find_map(|i| match (left_match[i], right_match[i]) {
            (Some(li), Some(ri)) => Some((i, li, ri)),
            _ => None,
        });

        let (next_o, next_l, next_r) = sync.unwrap_or((base.len(), left.len(), right.len()));
        if next_o == o && next_l == l && next_r == r {
            break;
        }

        if let Some(hunk) = classify(&base[o..next_o], &left[l..next_l], &right[r..next_r]) {
            hunks.push(hunk);
        }
        o = next_o;
        l = next_l;
        r = next_r;
    }

    hunks
}

/// Decide how an unstable chunk merges.
fn classify<'a>(base: &[&'a [u8]], left: &[&'a [u8]], right: &[&'a [u8]]) -> Option<Diff3Hunk<'a>> {
    let left_same = left == base;
    let right_same = right == base;

    match (left_same, right_same) {
        (true, true) => None,
        (true, false) => Some(Diff3Hunk::RightChanged(right.to_vec())),
        (false, true) => Some(Diff3Hunk::LeftChanged(left.to_vec())),
        (false, false) if left == right => Some(Diff3Hunk::BothChanged(left.to_vec())),
        (false, false) => Some(Diff3Hunk::Conflict {
            base: base.to_vec(),
            left: left.to_vec(),
            right: right.to_vec(),
        }),
    }
}

fn coalesce_hunks(hunks: Vec<Diff3Hunk<'_>>) -> Vec<Diff3Hunk<'_>> {
    let mut result: Vec<Diff3Hunk<'_>> = Vec::new();
    for hunk in hunks {
        let same_kind = matches!(
            (result.last(), &hunk),
            (Some(Diff3Hunk::Stable(_)), Diff3Hunk::Stable(_))
                | (Some(Diff3Hunk::LeftChanged(_)), Diff3Hunk::LeftChanged(_))
                | (Some(Diff3Hunk::RightChanged(_)), Diff3Hunk::RightChanged(_))
                | (Some(Diff3Hunk::BothChanged(_)), Diff3Hunk::BothChanged(_))
        );
        if !same_kind {
            result.push(hunk);
            continue;
        }
        if let (Some(existing), Some(new)) =
            (result.last_mut().and_then(Diff3Hunk::lines_mut), hunk.into_lines())
        {
            existing.extend(new);
        }
    }
    result
}

impl<'a> Diff3Hunk<'a> {
    /// Lines of a non-conflicting hunk.
    fn lines_mut(&mut self) -> Option<&mut Vec<&'a [u8]>> {
        match self {
            Diff3Hunk::Stable(lines)
            | Diff3Hunk::LeftChanged(lines)
            | Diff3Hunk::RightChanged(lines)
            | Diff3Hunk::BothChanged(lines) => Some(lines),
            Diff3Hunk::Conflict { .. } => None,
        }
    }

    fn into_lines(self) -> Option<Vec<&'a [u8]>> {
        match self {
            Diff3Hunk::Stable(lines)
            | Diff3Hunk::LeftChanged(lines)
            | Diff3Hunk::RightChanged(lines)
            | Diff3Hunk::BothChanged(lines) => Some(lines),
            Diff3Hunk::Conflict { .. } => None,
        }
    }
}
