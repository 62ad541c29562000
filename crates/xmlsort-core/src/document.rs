//! Lossless markup document model.
//!
//! The document is read with a namespace-resolving streaming reader and every
//! event is kept owned, so writing it back reproduces the original tag bytes:
//! attributes, namespace declarations, prefixes and escapes are never
//! re-synthesised. Only the *order* of nodes can change between parse and
//! serialization.

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use quick_xml::Writer;

const BOM: char = '\u{feff}';

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("malformed markup at byte {position}: {message}")]
    Syntax { position: u64, message: String },
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("unbound namespace prefix: {0}")]
    UnknownPrefix(String),
    #[error("document has no root element")]
    NoRoot,
    #[error("document has more than one root element")]
    MultipleRoots,
    #[error("unclosed element <{0}>")]
    Unclosed(String),
    #[error("closing tag without matching start tag")]
    UnexpectedEnd,
    #[error("character data outside the root element")]
    StrayText,
    #[error("invalid character data: {0}")]
    Text(String),
    #[error("serialization failed: {0}")]
    Write(String),
}

/// A node in the element tree.
#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    /// Text, CDATA, comments and processing instructions, kept verbatim.
    Other(Event<'static>),
}

impl Node {
    /// Whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Node::Other(event) => is_blank(event),
            Node::Element(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    start: BytesStart<'static>,
    /// `None` for self-closing elements.
    end: Option<BytesEnd<'static>>,
    namespace: Option<String>,
    local: String,
    children: Vec<Node>,
}

impl Element {
    fn open(start: BytesStart<'static>, namespace: Option<String>) -> Result<Self, DocumentError> {
        let local = std::str::from_utf8(start.local_name().as_ref())
            .map_err(|e| DocumentError::Text(e.to_string()))?
            .to_string();
        Ok(Self {
            start,
            end: None,
            namespace,
            local,
            children: Vec::new(),
        })
    }

    /// Namespace URI the element's name resolves to, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Other(_) => None,
        })
    }

    /// Whether the element is named `local` within namespace `ns`.
    pub fn is(&self, ns: Option<&str>, local: &str) -> bool {
        self.namespace() == ns && self.local == local
    }

    /// Name relative to `ns`: the bare local name when the element lives in
    /// `ns`, Clark notation (`{uri}local`) otherwise.
    pub fn qualified_key(&self, ns: Option<&str>) -> String {
        match self.namespace() {
            Some(own) if Some(own) != ns => format!("{{{}}}{}", own, self.local),
            _ => self.local.clone(),
        }
    }

    /// Character data before the first child element, unescaped.
    pub fn text(&self) -> Result<String, DocumentError> {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Element(_) => break,
                Node::Other(Event::Text(text)) => {
                    let value = text
                        .unescape()
                        .map_err(|e| DocumentError::Text(e.to_string()))?;
                    out.push_str(&value);
                }
                Node::Other(Event::CData(cdata)) => {
                    let value = std::str::from_utf8(cdata)
                        .map_err(|e| DocumentError::Text(e.to_string()))?;
                    out.push_str(value);
                }
                Node::Other(_) => {}
            }
        }
        Ok(out)
    }

    /// Text of the first direct child named `local` in `ns`.
    pub fn child_text(&self, ns: Option<&str>, local: &str) -> Result<Option<String>, DocumentError> {
        match self.child_elements().find(|el| el.is(ns, local)) {
            Some(el) => el.text().map(Some),
            None => Ok(None),
        }
    }

    /// Stable-sort the child elements by `key`.
    ///
    /// The whitespace run directly before each child stays where it is, so
    /// indentation does not travel with the element. Comments, processing
    /// instructions and text that precede a child move together with it.
    /// Anything after the last child stays at the end. Keys are computed for
    /// every child before anything moves, so an error leaves the element
    /// untouched.
    pub fn try_sort_children_by_key<K, E, F>(&mut self, mut key: F) -> Result<(), E>
    where
        K: Ord,
        F: FnMut(&Element) -> Result<K, E>,
    {
        let mut keys = self
            .child_elements()
            .map(&mut key)
            .collect::<Result<Vec<K>, E>>()?
            .into_iter();

        let mut gaps: Vec<Option<Node>> = Vec::new();
        let mut units: Vec<(K, Vec<Node>, Element)> = Vec::new();
        let mut pending: Vec<Node> = Vec::new();

        for node in std::mem::take(&mut self.children) {
            match node {
                Node::Element(el) => {
                    let mut leading = std::mem::take(&mut pending);
                    let gap = if leading.first().is_some_and(Node::is_blank) {
                        Some(leading.remove(0))
                    } else {
                        None
                    };
                    gaps.push(gap);
                    // One key per child element, computed above in the same order
                    if let Some(k) = keys.next() {
                        units.push((k, leading, el));
                    }
                }
                other => pending.push(other),
            }
        }

        units.sort_by(|a, b| a.0.cmp(&b.0));

        let mut children = Vec::new();
        for (gap, (_, leading, el)) in gaps.into_iter().zip(units) {
            children.extend(gap);
            children.extend(leading);
            children.push(Node::Element(el));
        }
        children.extend(pending);
        self.children = children;

        Ok(())
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), DocumentError> {
        match &self.end {
            None => write_event(writer, Event::Empty(self.start.clone())),
            Some(end) => {
                write_event(writer, Event::Start(self.start.clone()))?;
                for child in &self.children {
                    match child {
                        Node::Element(el) => el.write_to(writer)?,
                        Node::Other(event) => write_event(writer, event.clone())?,
                    }
                }
                write_event(writer, Event::End(end.clone()))
            }
        }
    }
}

/// A parsed document: everything before the root, the root, everything after.
#[derive(Debug, Clone)]
pub struct Document {
    bom: bool,
    prolog: Vec<Event<'static>>,
    root: Element,
    epilog: Vec<Event<'static>>,
}

impl Document {
    pub fn parse(input: &str) -> Result<Self, DocumentError> {
        let (bom, text) = match input.strip_prefix(BOM) {
            Some(rest) => (true, rest),
            None => (false, input),
        };

        let mut reader = NsReader::from_str(text);
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<Element> = None;
        let mut stack: Vec<Element> = Vec::new();

        loop {
            let (resolved, event) = match reader.read_resolved_event() {
                Ok(pair) => pair,
                Err(e) => {
                    return Err(DocumentError::Syntax {
                        position: reader.error_position() as u64,
                        message: e.to_string(),
                    })
                }
            };

            let closed = match event {
                Event::Eof => break,
                Event::Start(start) => {
                    let namespace = resolve(resolved)?;
                    stack.push(Element::open(start.into_owned(), namespace)?);
                    continue;
                }
                Event::Empty(start) => {
                    let namespace = resolve(resolved)?;
                    Node::Element(Element::open(start.into_owned(), namespace)?)
                }
                Event::End(end) => {
                    let mut el = stack.pop().ok_or(DocumentError::UnexpectedEnd)?;
                    el.end = Some(end.into_owned());
                    Node::Element(el)
                }
                Event::Decl(decl) => {
                    if let Some(encoding) = decl.encoding() {
                        let encoding = encoding.map_err(|e| DocumentError::Syntax {
                            position: reader.buffer_position() as u64,
                            message: e.to_string(),
                        })?;
                        check_encoding(&String::from_utf8_lossy(&encoding))?;
                    }
                    Node::Other(Event::Decl(decl.into_owned()))
                }
                other => Node::Other(other.into_owned()),
            };

            if let Some(parent) = stack.last_mut() {
                parent.children.push(closed);
                continue;
            }

            match closed {
                Node::Element(el) => {
                    if root.is_some() {
                        return Err(DocumentError::MultipleRoots);
                    }
                    root = Some(el);
                }
                Node::Other(event) => {
                    if matches!(event, Event::Text(_) | Event::CData(_)) && !is_blank(&event) {
                        return Err(DocumentError::StrayText);
                    }
                    if root.is_none() {
                        prolog.push(event);
                    } else {
                        epilog.push(event);
                    }
                }
            }
        }

        if let Some(open) = stack.pop() {
            return Err(DocumentError::Unclosed(open.local));
        }
        let root = root.ok_or(DocumentError::NoRoot)?;

        Ok(Self {
            bom,
            prolog,
            root,
            epilog,
        })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    /// Encoding named in the XML declaration, if there is one.
    pub fn declared_encoding(&self) -> Option<String> {
        self.prolog.iter().find_map(|event| match event {
            Event::Decl(decl) => decl
                .encoding()
                .and_then(Result::ok)
                .map(|enc| String::from_utf8_lossy(&enc).into_owned()),
            _ => None,
        })
    }

    pub fn to_xml_string(&self) -> Result<String, DocumentError> {
        let mut writer = Writer::new(Vec::new());
        for event in &self.prolog {
            write_event(&mut writer, event.clone())?;
        }
        self.root.write_to(&mut writer)?;
        for event in &self.epilog {
            write_event(&mut writer, event.clone())?;
        }

        let body =
            String::from_utf8(writer.into_inner()).map_err(|e| DocumentError::Write(e.to_string()))?;
        if self.bom {
            let mut out = String::with_capacity(body.len() + BOM.len_utf8());
            out.push(BOM);
            out.push_str(&body);
            Ok(out)
        } else {
            Ok(body)
        }
    }
}

fn is_blank(event: &Event<'_>) -> bool {
    match event {
        Event::Text(text) => text.iter().all(u8::is_ascii_whitespace),
        _ => false,
    }
}

fn resolve(resolved: ResolveResult<'_>) -> Result<Option<String>, DocumentError> {
    match resolved {
        ResolveResult::Bound(ns) => std::str::from_utf8(ns.as_ref())
            .map(|uri| Some(uri.to_string()))
            .map_err(|e| DocumentError::Text(e.to_string())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(DocumentError::UnknownPrefix(
            String::from_utf8_lossy(&prefix).into_owned(),
        )),
    }
}

/// Only UTF-8 (and its ASCII subset) round-trips through a `&str`.
fn check_encoding(encoding: &str) -> Result<(), DocumentError> {
    match encoding.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => Ok(()),
        _ => Err(DocumentError::UnsupportedEncoding(encoding.to_string())),
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), DocumentError> {
    writer
        .write_event(event)
        .map_err(|e| DocumentError::Write(e.to_string()))
}
