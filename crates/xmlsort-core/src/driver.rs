use crate::canonical::{Canonicalization, Canonicalizer, SkipReason};
use crate::config::Settings;
use crate::delegate::{self, MergeDelegate, MergePaths, MergeStatus};
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of one merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub base: Canonicalization,
    pub current: Canonicalization,
    pub other: Canonicalization,
    pub status: MergeStatus,
}

/// Canonicalizes the three inputs, then hands them to the merge delegate.
pub struct Driver {
    canonicalizer: Arc<Canonicalizer>,
    delegate: Box<dyn MergeDelegate>,
}

impl Driver {
    pub fn new(canonicalizer: Canonicalizer, delegate: Box<dyn MergeDelegate>) -> Self {
        Self {
            canonicalizer: Arc::new(canonicalizer),
            delegate,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Canonicalizer::new(&settings.canonical),
            delegate::from_settings(&settings.merge),
        )
    }

    pub async fn run(&self, paths: &MergePaths) -> anyhow::Result<MergeReport> {
        // Each file is independent, so the three passes run side by side
        let (base, current, other) = tokio::join!(
            self.canonicalize(paths.base.clone()),
            self.canonicalize(paths.current.clone()),
            self.canonicalize(paths.other.clone()),
        );

        tracing::info!(
            delegate = self.delegate.name(),
            current = %paths.current.display(),
            "Merging"
        );
        let status = self.delegate.merge(paths).await?;

        match status {
            MergeStatus::Clean => tracing::info!("Merged cleanly"),
            MergeStatus::Conflicts(n) => tracing::warn!(conflicts = n, "Merge left conflicts"),
            MergeStatus::Failed(code) => tracing::error!(code, "Merge tool failed"),
        }

        Ok(MergeReport {
            base,
            current,
            other,
            status,
        })
    }

    async fn canonicalize(&self, path: PathBuf) -> Canonicalization {
        let canonicalizer = Arc::clone(&self.canonicalizer);
        match tokio::task::spawn_blocking(move || canonicalizer.canonicalize(&path)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Canonicalization task failed");
                Canonicalization::Skipped(SkipReason::Internal(e.to_string()))
            }
        }
    }
}
