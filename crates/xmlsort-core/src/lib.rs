pub mod canonical;
pub mod config;
pub mod delegate;
pub mod document;
pub mod driver;
pub mod logging;
pub mod validate;

pub use canonical::{Canonicalization, Canonicalizer, SkipReason};
pub use config::Settings;
pub use delegate::{MergeDelegate, MergePaths, MergeStatus};
pub use driver::{Driver, MergeReport};
