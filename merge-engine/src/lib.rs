//! # merge-engine
//!
//! An in-process three-way line merge over raw bytes, compatible with the
//! output of `git merge-file --diff3`.
//!
//! ## Approach
//!
//! The engine diffs base→left and base→right with an LCS line diff, then walks
//! the base alternating between **stable** runs (all three agree) and
//! **unstable** chunks between synchronisation points. Each chunk is taken
//! from whichever side changed it; when both sides changed it differently the
//! chunk is emitted as a conflict:
//!
//! ```text
//! <<<<<<< current
//! our lines
//! ||||||| base
//! ancestor lines
//! =======
//! their lines
//! >>>>>>> other
//! ```
//!
//! *Based on: Khanna, Kuber, Pierce, "A Formal Investigation of Diff3",
//! FSTTCS 2007*
//!
//! ## Example
//!
//! ```rust
//! use merge_engine::{merge, MarkerStyle, MergeScenario};
//!
//! let (base, left, right): (&[u8], &[u8], &[u8]) = (b"a\nb\nc\n", b"a\nB\nc\n", b"a\nb\nc\nd\n");
//! let scenario = MergeScenario::new(base, left, right);
//! let output = merge(&scenario, &MarkerStyle::default());
//!
//! assert!(output.is_clean());
//! assert_eq!(output.content, b"a\nB\nc\nd\n");
//! ```

pub mod diff3;
pub mod types;

// Re-export primary public API
pub use diff3::{diff3_hunks, merge};
pub use types::{Diff3Hunk, LineEnding, MarkerStyle, MergeOutput, MergeScenario, DEFAULT_MARKER_SIZE};
