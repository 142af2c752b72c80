//! Host page model.
//! The extension lives inside a page it does not control, so everything the
//! detector reads goes through this small in-memory DOM: elements with a tag,
//! classes, attributes, text, an optional bounding rect and children.
//! Recorded pages deserialize straight into it with serde.
//! Selectors cover only the compound forms the board/move-list lookups need
//! (no combinators, no pseudo-classes).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{DetectError, DetectResult};

static TRANSLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"translate(?:3d)?\(\s*(-?[0-9.]+)px\s*,\s*(-?[0-9.]+)px").expect("static regex")
});

// *************** Elements ***************

/// Bounding box in page pixels (what `getBoundingClientRect` reports).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Element {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub rect: Option<Rect>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Attribute value as a selector sees it: `class` and `id` live in their own fields.
    fn attr_text(&self, name: &str) -> Option<String> {
        match name {
            "class" if !self.classes.is_empty() => Some(self.classes.join(" ")),
            "class" => None,
            "id" => self.id.clone(),
            _ => self.attrs.get(name).cloned(),
        }
    }

    /// 2D translation from the inline `style` attribute, e.g.
    /// `transform: translate(120px, 240px)`. `translate3d` ignores its z component.
    pub fn translate(&self) -> Option<(f64, f64)> {
        let style = self.attr("style")?;
        let caps = TRANSLATE_RE.captures(style)?;
        let x = caps.get(1)?.as_str().parse().ok()?;
        let y = caps.get(2)?.as_str().parse().ok()?;
        Some((x, y))
    }

    /// Own text followed by all descendant text, whitespace separated.
    pub fn text_content(&self) -> String {
        let mut parts = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }

    fn collect_text<'a>(&'a self, parts: &mut Vec<&'a str>) {
        let own = self.text.trim();
        if !own.is_empty() {
            parts.push(own);
        }
        for child in &self.children {
            child.collect_text(parts);
        }
    }

    /// All descendants (not `self`) matching `selector`, in document order.
    pub fn query_all<'a>(&'a self, selector: &Selector) -> Vec<&'a Element> {
        let mut found = Vec::new();
        for child in &self.children {
            child.collect_matching(selector, &mut found);
        }
        found
    }

    fn collect_matching<'a>(&'a self, selector: &Selector, found: &mut Vec<&'a Element>) {
        if selector.matches(self) {
            found.push(self);
        }
        for child in &self.children {
            child.collect_matching(selector, found);
        }
    }

    fn find_path(&self, selector: &Selector, path: &mut Vec<usize>) -> bool {
        if selector.matches(self) {
            return true;
        }
        for (index, child) in self.children.iter().enumerate() {
            path.push(index);
            if child.find_path(selector, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    /// Removes every descendant for which `pred` holds. Returns how many were removed.
    pub fn remove_descendants<F>(&mut self, pred: &F) -> usize
    where
        F: Fn(&Element) -> bool,
    {
        let before = self.children.len();
        self.children.retain(|child| !pred(child));
        let mut removed = before - self.children.len();
        for child in &mut self.children {
            removed += child.remove_descendants(pred);
        }
        removed
    }
}

// *************** Document ***************

/// Child-index path from the document root to an element. Cheap to cache;
/// goes stale on structural mutations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ElementPath(pub Vec<usize>);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    pub fn get(&self, path: &ElementPath) -> Option<&Element> {
        path.0
            .iter()
            .try_fold(&self.root, |el, &index| el.children.get(index))
    }

    pub fn get_mut(&mut self, path: &ElementPath) -> Option<&mut Element> {
        path.0
            .iter()
            .try_fold(&mut self.root, |el, &index| el.children.get_mut(index))
    }

    /// First element (root included) matching `selector`, depth first.
    pub fn query_first(&self, selector: &Selector) -> Option<(ElementPath, &Element)> {
        let mut path = Vec::new();
        if self.root.find_path(selector, &mut path) {
            let path = ElementPath(path);
            let el = self.get(&path)?;
            Some((path, el))
        } else {
            None
        }
    }

    pub fn remove_where<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&Element) -> bool,
    {
        self.root.remove_descendants(&pred)
    }
}

// *************** Selectors ***************

#[derive(Clone, Debug, PartialEq, Eq)]
enum AttrMatch {
    Present(String),
    Equals(String, String),
    Contains(String, String),
}

impl AttrMatch {
    fn parse(body: &str) -> Option<Self> {
        let unquote = |v: &str| v.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
        let parsed = if let Some((name, value)) = body.split_once("*=") {
            AttrMatch::Contains(name.trim().to_string(), unquote(value))
        } else if let Some((name, value)) = body.split_once('=') {
            AttrMatch::Equals(name.trim().to_string(), unquote(value))
        } else {
            AttrMatch::Present(body.trim().to_string())
        };
        let name = match &parsed {
            AttrMatch::Present(n) | AttrMatch::Equals(n, _) | AttrMatch::Contains(n, _) => n,
        };
        (ident_len(name) == name.len() && !name.is_empty()).then_some(parsed)
    }

    fn matches(&self, el: &Element) -> bool {
        match self {
            AttrMatch::Present(name) => el.attr_text(name).is_some(),
            AttrMatch::Equals(name, value) => el.attr_text(name).is_some_and(|v| v == *value),
            AttrMatch::Contains(name, value) => {
                el.attr_text(name).is_some_and(|v| v.contains(value.as_str()))
            }
        }
    }
}

/// A compound CSS selector: `tag`, `.class`, `#id`, `[attr]`, `[attr='v']`,
/// `[attr*='v']`, in any combination without whitespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

fn ident_len(s: &str) -> usize {
    s.bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
        .count()
}

impl Selector {
    pub fn parse(input: &str) -> DetectResult<Self> {
        let invalid = || DetectError::InvalidSelector(input.to_string());
        let mut rest = input.trim();
        if rest.is_empty() {
            return Err(invalid());
        }

        let mut sel = Selector::default();
        let tag_len = ident_len(rest);
        if tag_len > 0 {
            sel.tag = Some(rest[..tag_len].to_ascii_lowercase());
            rest = &rest[tag_len..];
        }

        while let Some(c) = rest.chars().next() {
            match c {
                '.' | '#' => {
                    let len = ident_len(&rest[1..]);
                    if len == 0 {
                        return Err(invalid());
                    }
                    let name = rest[1..=len].to_string();
                    if c == '.' {
                        sel.classes.push(name);
                    } else {
                        sel.id = Some(name);
                    }
                    rest = &rest[1 + len..];
                }
                '[' => {
                    let end = rest.find(']').ok_or_else(invalid)?;
                    sel.attrs.push(AttrMatch::parse(&rest[1..end]).ok_or_else(invalid)?);
                    rest = &rest[end + 1..];
                }
                _ => return Err(invalid()),
            }
        }
        Ok(sel)
    }

    /// Parses an ordered candidate list, failing on the first bad entry.
    pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> DetectResult<Vec<Selector>> {
        inputs.iter().map(|s| Selector::parse(s.as_ref())).collect()
    }

    pub fn matches(&self, el: &Element) -> bool {
        self.tag.as_ref().is_none_or(|t| t.eq_ignore_ascii_case(&el.tag))
            && self.id.as_ref().is_none_or(|id| el.id.as_ref() == Some(id))
            && self.classes.iter().all(|c| el.has_class(c))
            && self.attrs.iter().all(|a| a.matches(el))
    }
}

impl FromStr for Selector {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

// *************** Mutations ***************

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Attributes,
    ChildList,
}

/// One observed mutation, reduced to what the detector filters on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    pub kind: MutationKind,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub target_classes: Vec<String>,
}

impl MutationRecord {
    pub fn attributes(attribute: &str, target_classes: &[&str]) -> Self {
        Self {
            kind: MutationKind::Attributes,
            attribute: Some(attribute.to_string()),
            target_classes: target_classes.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn child_list() -> Self {
        Self {
            kind: MutationKind::ChildList,
            attribute: None,
            target_classes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationBatch {
    #[serde(default)]
    pub records: Vec<MutationRecord>,
}

impl MutationBatch {
    pub fn new(records: Vec<MutationRecord>) -> Self {
        Self { records }
    }

    /// Nodes were added or removed: cached element paths may be stale.
    pub fn is_structural(&self) -> bool {
        self.records.iter().any(|r| r.kind == MutationKind::ChildList)
    }

    /// Structural change, or an attribute change on an element carrying a watched class.
    pub fn is_relevant(&self, watched: &[String]) -> bool {
        self.records.iter().any(|r| {
            r.kind == MutationKind::ChildList
                || r.target_classes.iter().any(|c| watched.contains(c))
        })
    }
}
