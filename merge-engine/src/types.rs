//! Core types for the merge engine.
//!
//! A merge is described by three revisions of the same file: the common
//! ancestor (`base`), our side (`left`) and their side (`right`). The diff3
//! walk partitions them into hunks, and the renderer turns hunks back into
//! bytes, emitting git-style conflict markers where the sides disagree.
//!
//! Content is handled as raw bytes, so inputs in any ASCII-compatible
//! encoding merge the same way `git merge-file` merges them.

use std::fmt;

/// The three-way merge scenario: base, left, and right revisions.
#[derive(Debug, Clone)]
pub struct MergeScenario<T> {
    pub base: T,
    pub left: T,
    pub right: T,
}

impl<T> MergeScenario<T> {
    pub fn new(base: T, left: T, right: T) -> Self {
        Self { base, left, right }
    }
}

/// A line-level hunk from diff3. Lines keep their terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diff3Hunk<'a> {
    /// All three versions agree.
    Stable(Vec<&'a [u8]>),
    /// Only left changed from base.
    LeftChanged(Vec<&'a [u8]>),
    /// Only right changed from base.
    RightChanged(Vec<&'a [u8]>),
    /// Both sides made the identical change.
    BothChanged(Vec<&'a [u8]>),
    /// Both sides changed differently.
    Conflict {
        base: Vec<&'a [u8]>,
        left: Vec<&'a [u8]>,
        right: Vec<&'a [u8]>,
    },
}

impl Diff3Hunk<'_> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Diff3Hunk::Conflict { .. })
    }
}

/// Terminator written after marker lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    /// The ending of `line`, if it has one.
    pub fn of(line: &[u8]) -> Option<Self> {
        if line.ends_with(b"\r\n") {
            Some(LineEnding::CrLf)
        } else if line.ends_with(b"\n") {
            Some(LineEnding::Lf)
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::Lf => b"\n",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

/// How conflict regions are annotated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerStyle {
    /// Width of each marker run (`<<<<<<<` is 7).
    pub size: usize,
    pub left_label: String,
    pub base_label: String,
    pub right_label: String,
}

pub const DEFAULT_MARKER_SIZE: usize = 7;

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            size: DEFAULT_MARKER_SIZE,
            left_label: "current".into(),
            base_label: "base".into(),
            right_label: "other".into(),
        }
    }
}

impl MarkerStyle {
    pub fn with_labels(
        size: usize,
        left: impl Into<String>,
        base: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        Self {
            size,
            left_label: left.into(),
            base_label: base.into(),
            right_label: right.into(),
        }
    }

    fn marker(&self, ch: u8, label: &str, eol: LineEnding) -> Vec<u8> {
        let mut line = vec![ch; self.size.max(1)];
        if !label.is_empty() {
            line.push(b' ');
            line.extend_from_slice(label.as_bytes());
        }
        line.extend_from_slice(eol.as_bytes());
        line
    }

    pub fn start(&self, eol: LineEnding) -> Vec<u8> {
        self.marker(b'<', &self.left_label, eol)
    }

    pub fn base(&self, eol: LineEnding) -> Vec<u8> {
        self.marker(b'|', &self.base_label, eol)
    }

    pub fn separator(&self, eol: LineEnding) -> Vec<u8> {
        self.marker(b'=', "", eol)
    }

    pub fn end(&self, eol: LineEnding) -> Vec<u8> {
        self.marker(b'>', &self.right_label, eol)
    }
}

/// The rendered result of a whole-file merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    /// Merged bytes, with conflict markers around unresolved regions.
    pub content: Vec<u8>,
    /// Number of conflict regions in `content`.
    pub conflicts: usize,
}

impl MergeOutput {
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }
}

impl fmt::Display for MergeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.content))
    }
}
