//! Three-way merge backends.
//!
//! A delegate merges `other` into `current` using `base` as the common
//! ancestor, writes the result over `current`, and reports whether conflict
//! markers were left behind.

use crate::config::{MergeEngine, MergeSettings};
use anyhow::Context;
use merge_engine::{MarkerStyle, MergeScenario};
use std::path::PathBuf;

/// Highest conflict count representable in an exit status.
pub const MAX_CONFLICT_STATUS: usize = 127;

/// The three files of one merge request.
#[derive(Debug, Clone)]
pub struct MergePaths {
    pub base: PathBuf,
    pub current: PathBuf,
    pub other: PathBuf,
}

impl MergePaths {
    pub fn new(base: impl Into<PathBuf>, current: impl Into<PathBuf>, other: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            current: current.into(),
            other: other.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Clean,
    /// `current` holds this many conflict regions.
    Conflicts(usize),
    /// The merge tool itself failed with this status.
    Failed(i32),
}

impl MergeStatus {
    /// Process exit status, following `git merge-file`.
    pub fn exit_code(&self) -> i32 {
        match self {
            MergeStatus::Clean => 0,
            MergeStatus::Conflicts(n) => (*n).clamp(1, MAX_CONFLICT_STATUS) as i32,
            MergeStatus::Failed(code) => *code,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, MergeStatus::Clean)
    }
}

#[async_trait::async_trait]
pub trait MergeDelegate: Send + Sync + 'static {
    /// Human-readable backend name (e.g., "builtin", "git")
    fn name(&self) -> &str;

    /// Merge into `paths.current`.
    async fn merge(&self, paths: &MergePaths) -> anyhow::Result<MergeStatus>;
}

/// In-process diff3 from `merge-engine`.
#[derive(Debug, Clone)]
pub struct BuiltinMerge {
    marker_size: usize,
}

impl BuiltinMerge {
    pub fn new(marker_size: usize) -> Self {
        Self { marker_size }
    }
}

#[async_trait::async_trait]
impl MergeDelegate for BuiltinMerge {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn merge(&self, paths: &MergePaths) -> anyhow::Result<MergeStatus> {
        let base = read_bytes(&paths.base).await?;
        let current = read_bytes(&paths.current).await?;
        let other = read_bytes(&paths.other).await?;

        let style = MarkerStyle::with_labels(
            self.marker_size,
            paths.current.display().to_string(),
            paths.base.display().to_string(),
            paths.other.display().to_string(),
        );
        let output = merge_engine::merge(&MergeScenario::new(&base[..], &current[..], &other[..]), &style);

        tokio::fs::write(&paths.current, &output.content)
            .await
            .with_context(|| format!("failed to write {}", paths.current.display()))?;

        Ok(if output.is_clean() {
            MergeStatus::Clean
        } else {
            MergeStatus::Conflicts(output.conflicts)
        })
    }
}

/// Inputs are merged as bytes whatever their encoding.
async fn read_bytes(path: &std::path::Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Shells out to `git merge-file --diff3`.
#[derive(Debug, Clone)]
pub struct GitMergeFile {
    program: String,
    marker_size: usize,
}

impl GitMergeFile {
    pub fn new(program: impl Into<String>, marker_size: usize) -> Self {
        Self {
            program: program.into(),
            marker_size,
        }
    }
}

#[async_trait::async_trait]
impl MergeDelegate for GitMergeFile {
    fn name(&self) -> &str {
        "git"
    }

    async fn merge(&self, paths: &MergePaths) -> anyhow::Result<MergeStatus> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("merge-file").arg("--diff3");
        if self.marker_size != merge_engine::DEFAULT_MARKER_SIZE {
            cmd.arg(format!("--marker-size={}", self.marker_size));
        }
        cmd.arg(&paths.current).arg(&paths.base).arg(&paths.other);

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to run {} merge-file", self.program))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "git merge-file");
        }

        Ok(match output.status.code() {
            Some(0) => MergeStatus::Clean,
            Some(n) if (1..=MAX_CONFLICT_STATUS as i32).contains(&n) => {
                MergeStatus::Conflicts(n as usize)
            }
            Some(n) => MergeStatus::Failed(n),
            // Killed by a signal
            None => MergeStatus::Failed(255),
        })
    }
}

/// Build the delegate selected in settings.
pub fn from_settings(settings: &MergeSettings) -> Box<dyn MergeDelegate> {
    match settings.engine {
        MergeEngine::Builtin => Box::new(BuiltinMerge::new(settings.marker_size)),
        MergeEngine::Git => Box::new(GitMergeFile::new(
            settings.git_program.clone(),
            settings.marker_size,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_triple(dir: &std::path::Path, base: &str, current: &str, other: &str) -> MergePaths {
        let paths = MergePaths::new(dir.join("base"), dir.join("current"), dir.join("other"));
        fs::write(&paths.base, base).unwrap();
        fs::write(&paths.current, current).unwrap();
        fs::write(&paths.other, other).unwrap();
        paths
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MergeStatus::Clean.exit_code(), 0);
        assert_eq!(MergeStatus::Conflicts(3).exit_code(), 3);
        assert_eq!(MergeStatus::Conflicts(500).exit_code(), 127);
        assert_eq!(MergeStatus::Failed(255).exit_code(), 255);
    }

    #[tokio::test]
    async fn test_builtin_clean_merge() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_triple(dir.path(), "a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\nd\n");

        let status = BuiltinMerge::new(7).merge(&paths).await.unwrap();
        assert_eq!(status, MergeStatus::Clean);
        assert_eq!(fs::read_to_string(&paths.current).unwrap(), "a\nB\nc\nd\n");
    }

    #[tokio::test]
    async fn test_builtin_conflict_labels_with_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_triple(dir.path(), "x\n", "y\n", "z\n");

        let status = BuiltinMerge::new(7).merge(&paths).await.unwrap();
        assert_eq!(status, MergeStatus::Conflicts(1));

        let merged = fs::read_to_string(&paths.current).unwrap();
        let expected = format!(
            "<<<<<<< {}\ny\n||||||| {}\nx\n=======\nz\n>>>>>>> {}\n",
            paths.current.display(),
            paths.base.display(),
            paths.other.display()
        );
        assert_eq!(merged, expected);
    }

    #[tokio::test]
    async fn test_builtin_merges_non_utf8_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let paths = MergePaths::new(dir.path().join("base"), dir.path().join("current"), dir.path().join("other"));
        fs::write(&paths.base, b"caf\xe9\nkeep\nx\n").unwrap();
        fs::write(&paths.current, b"caf\xe9!\nkeep\nx\n").unwrap();
        fs::write(&paths.other, b"caf\xe9\nkeep\ny\n").unwrap();

        let status = BuiltinMerge::new(7).merge(&paths).await.unwrap();
        assert_eq!(status, MergeStatus::Clean);
        assert_eq!(fs::read(&paths.current).unwrap(), b"caf\xe9!\nkeep\ny\n");
    }

    #[tokio::test]
    async fn test_builtin_crlf_conflict_markers() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_triple(dir.path(), "k\r\nx\r\nk\r\n", "k\r\ny\r\nk\r\n", "k\r\nz\r\nk\r\n");

        let status = BuiltinMerge::new(7).merge(&paths).await.unwrap();
        assert_eq!(status, MergeStatus::Conflicts(1));

        let merged = fs::read_to_string(&paths.current).unwrap();
        let expected = format!(
            "k\r\n<<<<<<< {}\r\ny\r\n||||||| {}\r\nx\r\n=======\r\nz\r\n>>>>>>> {}\r\nk\r\n",
            paths.current.display(),
            paths.base.display(),
            paths.other.display()
        );
        assert_eq!(merged, expected);
    }

    #[tokio::test]
    async fn test_builtin_missing_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = MergePaths::new(dir.path().join("a"), dir.path().join("b"), dir.path().join("c"));
        assert!(BuiltinMerge::new(7).merge(&paths).await.is_err());
    }

    #[tokio::test]
    async fn test_git_merge_file_conflict() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let paths = write_triple(dir.path(), "keep\nx\nkeep\n", "keep\ny\nkeep\n", "keep\nz\nkeep\n");

        let status = GitMergeFile::new("git", 7).merge(&paths).await.unwrap();
        assert_eq!(status, MergeStatus::Conflicts(1));

        let merged = fs::read_to_string(&paths.current).unwrap();
        assert!(merged.contains("<<<<<<< "));
        assert!(merged.contains("||||||| "));
        assert!(merged.contains("=======\nz\n>>>>>>> "));
    }

    #[tokio::test]
    async fn test_missing_git_program_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_triple(dir.path(), "a\n", "a\n", "a\n");
        let delegate = GitMergeFile::new("xmlsort-no-such-git", 7);
        assert!(delegate.merge(&paths).await.is_err());
    }

    #[test]
    fn test_from_settings() {
        let mut settings = MergeSettings::default();
        assert_eq!(from_settings(&settings).name(), "builtin");
        settings.engine = MergeEngine::Git;
        assert_eq!(from_settings(&settings).name(), "git");
    }
}
