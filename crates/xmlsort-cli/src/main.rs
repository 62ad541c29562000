use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use xmlsort_core::config::{Settings, DEFAULT_SETTINGS_FILE};
use xmlsort_core::logging::init_logging;
use xmlsort_core::{Driver, MergePaths};

/// Exit status when the driver itself fails, matching `git merge-file`.
const FAILURE_EXIT: i32 = 255;

#[derive(Parser, Debug)]
#[command(
    name = "xmlsort-merge",
    version,
    about = "Three-way merge driver for XML files whose top-level elements are unordered",
    long_about = "Sorts the direct children of the root element in all three files, then \
                  runs a diff3 merge. Configure in git with:\n\n  \
                  [merge \"xmlsort\"]\n    driver = xmlsort-merge %O %A %B --marker-size %L"
)]
struct Cli {
    /// Common ancestor version (%O)
    base: PathBuf,

    /// Our version; replaced with the merge result (%A)
    current: PathBuf,

    /// Their version (%B)
    other: PathBuf,

    /// Settings file [default: .xmlsort-merge.json, if present]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Width of conflict markers (%L)
    #[arg(long)]
    marker_size: Option<usize>,
}

fn main() {
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("xmlsort-merge: {:#}", e);
            FAILURE_EXIT
        }
    };
    std::process::exit(code);
}

#[tokio::main]
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let (mut settings, ignored) = load_settings(cli.config.as_deref())?;
    if let Some(size) = cli.marker_size {
        settings.merge.marker_size = size;
    }

    let _guard = init_logging(&settings.logging)?;
    if let Some(reason) = ignored {
        tracing::warn!("{}", reason);
    }

    let driver = Driver::from_settings(&settings);
    let paths = MergePaths::new(cli.base, cli.current, cli.other);
    let report = driver.run(&paths).await?;

    Ok(report.status.exit_code())
}

/// An explicit settings file must load; the implicit one is best-effort and
/// any problem with it is returned as a warning alongside the defaults.
fn load_settings(explicit: Option<&Path>) -> anyhow::Result<(Settings, Option<String>)> {
    if let Some(path) = explicit {
        let settings = Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        return Ok((settings, None));
    }

    let implicit = Path::new(DEFAULT_SETTINGS_FILE);
    if !implicit.exists() {
        return Ok((Settings::default(), None));
    }
    match Settings::load(implicit) {
        Ok(settings) => Ok((settings, None)),
        Err(e) => Ok((
            Settings::default(),
            Some(format!("Ignoring {}: {:#}", DEFAULT_SETTINGS_FILE, e)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_positional_arguments() {
        let cli = Cli::try_parse_from(["xmlsort-merge", "o.xml", "a.xml", "b.xml"]).unwrap();
        assert_eq!(cli.base, PathBuf::from("o.xml"));
        assert_eq!(cli.current, PathBuf::from("a.xml"));
        assert_eq!(cli.other, PathBuf::from("b.xml"));
        assert!(cli.config.is_none());
        assert!(cli.marker_size.is_none());
    }

    #[test]
    fn test_rejects_wrong_arity() {
        assert!(Cli::try_parse_from(["xmlsort-merge", "o.xml", "a.xml"]).is_err());
        assert!(Cli::try_parse_from(["xmlsort-merge", "o", "a", "b", "c"]).is_err());
    }

    #[test]
    fn test_marker_size_flag() {
        let cli = Cli::try_parse_from(["xmlsort-merge", "o", "a", "b", "--marker-size", "9"]).unwrap();
        assert_eq!(cli.marker_size, Some(9));
    }

    #[test]
    fn test_explicit_settings_must_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(load_settings(Some(missing.as_path())).is_err());

        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "merge": { "marker_size": 11 } }"#).unwrap();
        let (settings, ignored) = load_settings(Some(path.as_path())).unwrap();
        assert_eq!(settings.merge.marker_size, 11);
        assert!(ignored.is_none());
    }
}
