//! Best-effort canonicalization of markup files.
//!
//! Direct children of the root element are stable-sorted by
//! `(tag, secondary name)` so that two revisions holding the same elements in
//! different orders serialize to the same lines. Deeper levels are never
//! touched, and the namespace, declaration and tag bytes come out exactly as
//! they went in.
//!
//! Canonicalization never fails the merge: every problem turns into
//! [`Canonicalization::Skipped`] and the file is left byte-for-byte as it was.

use crate::config::CanonicalSettings;
use crate::document::{Document, DocumentError, Element};
use crate::validate::{self, Validation, Validator};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonicalization {
    /// The file was rewritten in canonical order.
    Applied,
    /// The file was already canonical and was not written.
    Unchanged,
    /// The file was left untouched.
    Skipped(SkipReason),
}

impl Canonicalization {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Canonicalization::Skipped(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Unreadable(String),
    ValidatorUnavailable(String),
    Invalid(String),
    UnsupportedEncoding(String),
    Internal(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "canonicalization disabled"),
            SkipReason::Unreadable(e) => write!(f, "unreadable: {}", e),
            SkipReason::ValidatorUnavailable(name) => write!(f, "validator {} unavailable", name),
            SkipReason::Invalid(e) => write!(f, "invalid document: {}", e),
            SkipReason::UnsupportedEncoding(e) => write!(f, "unsupported encoding: {}", e),
            SkipReason::Internal(e) => write!(f, "internal error: {}", e),
        }
    }
}

/// Ordering key for a direct child of the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    /// Local name, or `{uri}local` outside the root namespace.
    pub tag: String,
    /// Text of the first non-empty secondary key child, else empty.
    pub name: String,
}

pub struct Canonicalizer {
    enabled: bool,
    secondary_keys: Vec<String>,
    validator: Box<dyn Validator>,
}

impl Canonicalizer {
    pub fn new(settings: &CanonicalSettings) -> Self {
        Self::with_validator(settings, validate::from_settings(&settings.validator))
    }

    pub fn with_validator(settings: &CanonicalSettings, validator: Box<dyn Validator>) -> Self {
        Self {
            enabled: settings.enabled,
            secondary_keys: settings.secondary_keys.clone(),
            validator,
        }
    }

    /// Canonicalize the file at `path` in place, if possible.
    pub fn canonicalize(&self, path: &Path) -> Canonicalization {
        let outcome = self.try_canonicalize(path);
        match &outcome {
            Canonicalization::Applied => {
                tracing::debug!(path = %path.display(), "Canonicalized");
            }
            Canonicalization::Unchanged => {
                tracing::debug!(path = %path.display(), "Already canonical");
            }
            Canonicalization::Skipped(reason) => {
                tracing::info!(path = %path.display(), %reason, "Skipped canonicalization");
            }
        }
        outcome
    }

    fn try_canonicalize(&self, path: &Path) -> Canonicalization {
        if !self.enabled {
            return Canonicalization::Skipped(SkipReason::Disabled);
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => return Canonicalization::Skipped(SkipReason::Unreadable(e.to_string())),
        };
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                return Canonicalization::Skipped(SkipReason::UnsupportedEncoding(
                    "content is not UTF-8".into(),
                ))
            }
        };

        match self.validator.check(path, &text) {
            Validation::Valid => {}
            Validation::Invalid(msg) => return Canonicalization::Skipped(SkipReason::Invalid(msg)),
            Validation::Unavailable => {
                return Canonicalization::Skipped(SkipReason::ValidatorUnavailable(
                    self.validator.name().to_string(),
                ))
            }
        }

        let canonical = match self.canonicalize_str(&text) {
            Ok(out) => out,
            Err(CanonicalError::Document(DocumentError::UnsupportedEncoding(enc))) => {
                return Canonicalization::Skipped(SkipReason::UnsupportedEncoding(enc))
            }
            Err(CanonicalError::Document(e)) => {
                return Canonicalization::Skipped(SkipReason::Invalid(e.to_string()))
            }
            Err(e) => return Canonicalization::Skipped(SkipReason::Internal(e.to_string())),
        };

        if canonical == text {
            return Canonicalization::Unchanged;
        }

        match write_atomically(path, canonical.as_bytes()) {
            Ok(()) => Canonicalization::Applied,
            Err(e) => Canonicalization::Skipped(SkipReason::Internal(e.to_string())),
        }
    }

    /// The pure transform: parse, sort the root's children, serialize.
    pub fn canonicalize_str(&self, text: &str) -> Result<String, CanonicalError> {
        let mut doc = Document::parse(text)?;
        let ns = doc.root().namespace().map(str::to_string);
        doc.root_mut()
            .try_sort_children_by_key(|el| self.sort_key(el, ns.as_deref()))?;
        Ok(doc.to_xml_string()?)
    }

    pub fn sort_key(&self, el: &Element, ns: Option<&str>) -> Result<SortKey, DocumentError> {
        let tag = el.qualified_key(ns);
        for key in &self.secondary_keys {
            if let Some(name) = el.child_text(ns, key)? {
                if !name.is_empty() {
                    return Ok(SortKey { tag, name });
                }
            }
        }
        Ok(SortKey {
            tag,
            name: String::new(),
        })
    }
}

/// Replace `path` with `contents` via a temp sibling and a rename, so the
/// file is never observed half-written.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), CanonicalError> {
    let permissions = fs::metadata(path)?.permissions();
    let tmp = temp_sibling(path);

    let result = fs::write(&tmp, contents)
        .and_then(|()| fs::set_permissions(&tmp, permissions))
        .and_then(|()| fs::rename(&tmp, path));

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map_err(CanonicalError::from)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_name = format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::CommandValidator;

    const NS: &str = "http://soap.sforce.com/2006/04/metadata";

    fn canonicalizer() -> Canonicalizer {
        Canonicalizer::new(&CanonicalSettings::default())
    }

    fn wrap(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CustomObject xmlns=\"{}\">{}\n</CustomObject>\n",
            NS, body
        )
    }

    fn field(name: &str) -> String {
        format!("\n    <fields>\n        <fullName>{}</fullName>\n    </fields>", name)
    }

    #[test]
    fn test_sorts_by_tag_then_name() {
        let input = wrap(&format!(
            "{}\n    <label>Thing</label>{}{}",
            field("Zeta__c"),
            field("Alpha__c"),
            field("Mid__c")
        ));
        let expected = wrap(&format!(
            "{}{}{}\n    <label>Thing</label>",
            field("Alpha__c"),
            field("Mid__c"),
            field("Zeta__c")
        ));
        assert_eq!(canonicalizer().canonicalize_str(&input).unwrap(), expected);
    }

    #[test]
    fn test_idempotent() {
        let input = wrap(&format!("{}{}\n    <a/>", field("B"), field("A")));
        let c = canonicalizer();
        let once = c.canonicalize_str(&input).unwrap();
        let twice = c.canonicalize_str(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_order_invariant() {
        let parts = [field("A"), field("B"), "\n    <c/>".to_string()];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        let c = canonicalizer();
        let outputs: Vec<String> = orders
            .iter()
            .map(|o| {
                let body: String = o.iter().map(|&i| parts[i].as_str()).collect();
                c.canonicalize_str(&wrap(&body)).unwrap()
            })
            .collect();
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_ties_keep_original_order() {
        let input = "<r>\n  <item><v>2</v></item>\n  <a/>\n  <item><v>1</v></item>\n</r>";
        let out = canonicalizer().canonicalize_str(input).unwrap();
        assert_eq!(
            out,
            "<r>\n  <a/>\n  <item><v>2</v></item>\n  <item><v>1</v></item>\n</r>"
        );
    }

    #[test]
    fn test_grandchildren_never_reordered() {
        let input = "<r>\n  <z/>\n  <m>\n    <y/>\n    <x/>\n  </m>\n</r>";
        let out = canonicalizer().canonicalize_str(input).unwrap();
        assert_eq!(out, "<r>\n  <m>\n    <y/>\n    <x/>\n  </m>\n  <z/>\n</r>");
    }

    #[test]
    fn test_secondary_key_fallback() {
        let input = "<r>\n  <t><fullName></fullName><name>b</name></t>\n  <t><name>c</name></t>\n  <t><fullName>a</fullName><name>z</name></t>\n</r>";
        let out = canonicalizer().canonicalize_str(input).unwrap();
        assert_eq!(
            out,
            "<r>\n  <t><fullName>a</fullName><name>z</name></t>\n  <t><fullName></fullName><name>b</name></t>\n  <t><name>c</name></t>\n</r>"
        );
    }

    #[test]
    fn test_secondary_key_must_share_root_namespace() {
        let c = canonicalizer();
        let doc = Document::parse(
            "<r xmlns=\"urn:a\" xmlns:o=\"urn:o\"><t><o:name>x</o:name></t><t><name>y</name></t></r>",
        )
        .unwrap();
        let ns = doc.root().namespace();
        let keys: Vec<SortKey> = doc
            .root()
            .child_elements()
            .map(|el| c.sort_key(el, ns).unwrap())
            .collect();
        assert_eq!(keys[0].name, "");
        assert_eq!(keys[1].name, "y");
    }

    #[test]
    fn test_namespace_preserved_without_prefixes() {
        let input = wrap(&format!("{}{}", field("B"), field("A")));
        let out = canonicalizer().canonicalize_str(&input).unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(!out.contains("ns0:"));

        let doc = roxmltree::Document::parse(&out).unwrap();
        let root = doc.root_element();
        assert_eq!(root.tag_name().namespace(), Some(NS));
        assert!(root
            .descendants()
            .filter(|n| n.is_element())
            .all(|n| n.tag_name().namespace() == Some(NS)));
    }

    #[test]
    fn test_foreign_namespace_sorts_by_clark_name() {
        let input = "<r xmlns=\"urn:a\" xmlns:b=\"urn:b\"><b:a/><x/></r>";
        let out = canonicalizer().canonicalize_str(input).unwrap();
        assert_eq!(out, "<r xmlns=\"urn:a\" xmlns:b=\"urn:b\"><x/><b:a/></r>");
    }

    #[test]
    fn test_file_applied_then_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj.xml");
        fs::write(&path, "<r>\n  <b/>\n  <a/>\n</r>\n").unwrap();

        let c = canonicalizer();
        assert_eq!(c.canonicalize(&path), Canonicalization::Applied);
        assert_eq!(fs::read_to_string(&path).unwrap(), "<r>\n  <a/>\n  <b/>\n</r>\n");
        assert_eq!(c.canonicalize(&path), Canonicalization::Unchanged);

        // No temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_invalid_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.xml");
        let input = "<r>\n  <b/>\n  <a>\n</r>\n";
        fs::write(&path, input).unwrap();

        let outcome = canonicalizer().canonicalize(&path);
        assert!(matches!(outcome, Canonicalization::Skipped(SkipReason::Invalid(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), input);
    }

    #[test]
    fn test_missing_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = canonicalizer().canonicalize(&dir.path().join("nope.xml"));
        assert!(matches!(outcome, Canonicalization::Skipped(SkipReason::Unreadable(_))));
    }

    #[test]
    fn test_unavailable_validator_skips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj.xml");
        let input = "<r><b/><a/></r>";
        fs::write(&path, input).unwrap();

        let c = Canonicalizer::with_validator(
            &CanonicalSettings::default(),
            Box::new(CommandValidator::new("xmlsort-no-such-validator", vec![])),
        );
        assert!(matches!(
            c.canonicalize(&path),
            Canonicalization::Skipped(SkipReason::ValidatorUnavailable(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), input);
    }

    #[test]
    fn test_disabled_skips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obj.xml");
        fs::write(&path, "<r><b/><a/></r>").unwrap();

        let settings = CanonicalSettings {
            enabled: false,
            ..CanonicalSettings::default()
        };
        let c = Canonicalizer::new(&settings);
        assert_eq!(
            c.canonicalize(&path),
            Canonicalization::Skipped(SkipReason::Disabled)
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "<r><b/><a/></r>");
    }

    #[test]
    fn test_non_utf8_declaration_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin.xml");
        let input = "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<r><b/><a/></r>";
        fs::write(&path, input).unwrap();

        assert!(canonicalizer().canonicalize(&path).is_skipped());
        assert_eq!(fs::read_to_string(&path).unwrap(), input);
    }
}
