use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SnapshotError, ValidationError};
use crate::hands::Page;
use crate::selector::{self, SelectorMap};
use crate::types::Handle;

/// Tags that survive pruning. Anything else is removed together with its subtree.
pub const CONTENT_TAGS: &[&str] = &[
    "html", "body", "button", "a", "label", "input", "textarea", "select", "option", "span", "div",
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "form", "img", "nav", "section", "article",
    "table", "thead", "tbody", "tr", "td", "th", "ul", "ol", "iframe", "video", "audio", "i",
    "canvas",
];

/// Attributes that survive pruning.
pub const KEPT_ATTRIBUTES: &[&str] = &[
    "id",
    "class",
    "name",
    "type",
    "value",
    "href",
    "alt",
    "title",
    "role",
    "placeholder",
    "onclick",
    "onchange",
    "for",
    "selected",
    "checked",
    "min",
    "max",
    "step",
    "data-value",
    "aria-label",
    "aria-hidden",
    "data-testid",
];

const STRIPPED_TAGS: &[&str] = &["script", "style"];

/// Serializes `document.body` as a flat pre-order node list.
///
/// Each entry is `{parent, tag, attrs}` for elements or `{parent, text}` for non-blank text,
/// `parent` being the index of the enclosing element (null for the root). A flat list keeps
/// deeply nested pages within the JSON parser's nesting limit.
pub const CAPTURE_JS: &str = r#"
(() => {
  const nodes = [];
  const visit = (node, parent) => {
    if (node.nodeType === Node.TEXT_NODE) {
      const text = node.nodeValue;
      if (text && text.trim()) nodes.push({ parent, text });
      return;
    }
    if (node.nodeType !== Node.ELEMENT_NODE) return;
    const index = nodes.length;
    nodes.push({
      parent,
      tag: node.tagName.toLowerCase(),
      attrs: Array.from(node.attributes, a => [a.name, a.value]),
    });
    for (const child of node.childNodes) visit(child, index);
  };
  visit(document.body, null);
  return JSON.stringify(nodes);
})()
"#;

/// Writes each form control's displayed value into `data-value`; selects report the visible
/// label of the selected option rather than its underlying value.
pub const NORMALIZE_FORM_VALUES_JS: &str = r#"
(() => {
  let count = 0;
  document.querySelectorAll("input, textarea, select").forEach(el => {
    if (el.tagName.toLowerCase() === "select") {
      const option = el.options[el.selectedIndex];
      el.setAttribute("data-value", option ? option.text : "");
    } else {
      el.setAttribute("data-value", el.value || "");
    }
    count += 1;
  });
  return count;
})()
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlatNode {
    #[serde(default)]
    parent: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attrs: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// Unpruned element as captured from the page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<RawNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawNode {
    Element(RawElement),
    Text(String),
}

impl RawElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.children.push(RawNode::Text(text.to_string()));
        self
    }

    pub fn child(mut self, child: RawElement) -> Self {
        self.children.push(RawNode::Element(child));
        self
    }

    /// Parse the capture format produced by [`CAPTURE_JS`].
    pub fn from_markup(markup: &str) -> Result<Self, SnapshotError> {
        let nodes: Vec<FlatNode> = serde_json::from_str(markup)?;
        build_tree(nodes)
    }

    /// Encode back into the capture format.
    pub fn to_markup(&self) -> String {
        let mut nodes = Vec::new();
        flatten(self, None, &mut nodes);
        // A Vec of plain structs always serializes.
        serde_json::to_string(&nodes).unwrap_or_default()
    }

    /// Remove script and style content anywhere in the tree.
    pub fn strip_scripts(&mut self) {
        self.children.retain_mut(|child| match child {
            RawNode::Element(el) if STRIPPED_TAGS.contains(&el.tag.as_str()) => false,
            RawNode::Element(el) => {
                el.strip_scripts();
                true
            }
            RawNode::Text(_) => true,
        });
    }

    /// Drop every descendant whose tag is outside [`CONTENT_TAGS`] and every attribute outside
    /// [`KEPT_ATTRIBUTES`]. The root itself is always kept.
    pub fn prune(self) -> Element {
        let attrs = self
            .attrs
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .filter(|(k, _)| KEPT_ATTRIBUTES.contains(&k.as_str()))
            .collect();
        let children = self
            .children
            .into_iter()
            .filter_map(|child| match child {
                RawNode::Element(el) if CONTENT_TAGS.contains(&el.tag.to_lowercase().as_str()) => {
                    Some(Node::Element(el.prune()))
                }
                RawNode::Element(_) => None,
                RawNode::Text(text) => Some(Node::Text(text)),
            })
            .collect();
        Element {
            tag: self.tag.to_lowercase(),
            attrs,
            children,
        }
    }
}

fn build_tree(nodes: Vec<FlatNode>) -> Result<RawElement, SnapshotError> {
    let malformed = |reason: String| SnapshotError::Malformed(reason);

    match nodes.first() {
        Some(root) if root.parent.is_none() && root.tag.is_some() => {}
        Some(_) => return Err(malformed("first node must be a parentless element".into())),
        None => return Err(malformed("no nodes captured".into())),
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate().skip(1) {
        match node.parent {
            Some(p) if p < i && nodes[p].tag.is_some() => children[p].push(i),
            _ => return Err(malformed(format!("node {} has no valid parent", i))),
        }
    }

    let mut slots: Vec<Option<FlatNode>> = nodes.into_iter().map(Some).collect();
    match assemble(0, &mut slots, &children) {
        RawNode::Element(root) => Ok(root),
        RawNode::Text(_) => Err(malformed("root is a text node".into())),
    }
}

fn assemble(i: usize, slots: &mut [Option<FlatNode>], children: &[Vec<usize>]) -> RawNode {
    let node = slots[i].take().unwrap_or(FlatNode {
        parent: None,
        tag: None,
        attrs: Vec::new(),
        text: None,
    });
    match node.tag {
        Some(tag) => RawNode::Element(RawElement {
            tag,
            attrs: node.attrs,
            children: children[i]
                .iter()
                .map(|&c| assemble(c, slots, children))
                .collect(),
        }),
        None => RawNode::Text(node.text.unwrap_or_default()),
    }
}

fn flatten(el: &RawElement, parent: Option<usize>, out: &mut Vec<FlatNode>) {
    let index = out.len();
    out.push(FlatNode {
        parent,
        tag: Some(el.tag.clone()),
        attrs: el.attrs.clone(),
        text: None,
    });
    for child in &el.children {
        match child {
            RawNode::Element(child) => flatten(child, Some(index), out),
            RawNode::Text(text) => out.push(FlatNode {
                parent: Some(index),
                tag: None,
                attrs: Vec::new(),
                text: Some(text.clone()),
            }),
        }
    }
}

/// Pruned element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: String) {
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    /// Depth-first search for the first element matching `pred`, root included.
    pub fn find(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.child_elements().find_map(|c| c.find(pred))
    }

    /// Object form: `_attributes`, `_value` (direct text) and one array per child tag.
    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        if !self.attrs.is_empty() {
            let attrs = self
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            obj.insert("_attributes".into(), Value::Object(attrs));
        }

        let text: Vec<&str> = self
            .children
            .iter()
            .filter_map(|c| match c {
                Node::Text(t) => Some(t.trim()),
                Node::Element(_) => None,
            })
            .filter(|t| !t.is_empty())
            .collect();
        if !text.is_empty() {
            obj.insert("_value".into(), Value::String(text.join(" ")));
        }

        for child in self.child_elements() {
            let slot = obj
                .entry(child.tag.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = slot {
                items.push(child.to_json());
            }
        }
        Value::Object(obj)
    }
}

/// Pruned, annotated view of the page at one instant plus its handle table.
///
/// A snapshot is a value: it is stale as soon as the page changes, and its handles are only
/// meaningful until the next snapshot replaces it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    tree: Option<Element>,
    selectors: SelectorMap,
}

impl Snapshot {
    /// Parse, strip, prune and annotate captured markup.
    pub fn from_markup(markup: &str) -> Result<Self, SnapshotError> {
        Ok(Self::from_raw(RawElement::from_markup(markup)?))
    }

    pub fn from_raw(mut raw: RawElement) -> Self {
        raw.strip_scripts();
        let mut tree = raw.prune();
        let selectors = selector::assign(&mut tree);
        Self {
            tree: Some(tree),
            selectors,
        }
    }

    /// Snapshot with no elements; every handle lookup fails.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn selector(&self, handle: Handle) -> Result<&str, ValidationError> {
        self.selectors
            .get(handle)
            .ok_or(ValidationError::UnknownHandle(handle))
    }

    pub fn selectors(&self) -> &SelectorMap {
        &self.selectors
    }

    pub fn tree(&self) -> Option<&Element> {
        self.tree.as_ref()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn to_json(&self) -> Value {
        match &self.tree {
            Some(root) => {
                let mut obj = Map::new();
                obj.insert(root.tag.clone(), Value::Array(vec![root.to_json()]));
                Value::Object(obj)
            }
            None => Value::Object(Map::new()),
        }
    }

    /// Compact serialized form for embedding in a decision request.
    pub fn serialized(&self) -> String {
        self.to_json().to_string()
    }
}

/// Take a fresh snapshot of the live page.
pub fn capture<P: Page + ?Sized>(page: &P) -> Result<Snapshot, SnapshotError> {
    let markup = page.capture_markup()?;
    let snapshot = Snapshot::from_markup(&markup)?;
    tracing::debug!(
        elements = snapshot.len(),
        markup_bytes = markup.len(),
        "captured DOM snapshot"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::ELEMENT_ID_ATTR;
    use serde_json::json;

    fn page() -> RawElement {
        RawElement::new("body")
            .attr("class", "app")
            .attr("style", "margin:0")
            .child(RawElement::new("script").text("window.secret = 1"))
            .child(
                RawElement::new("div")
                    .attr("id", "login")
                    .attr("data-v-123", "")
                    .child(RawElement::new("style").text(".x{}"))
                    .child(
                        RawElement::new("input")
                            .attr("type", "text")
                            .attr("placeholder", "Email")
                            .attr("data-value", "a@b.c")
                            .attr("autocomplete", "off"),
                    )
                    .child(
                        RawElement::new("svg")
                            .child(RawElement::new("span").text("inside svg")),
                    )
                    .child(RawElement::new("button").text(" Sign in ")),
            )
    }

    #[test]
    fn pruning_drops_tags_attributes_and_scripts() {
        let snapshot = Snapshot::from_raw(page());
        let root = snapshot.tree().unwrap();

        assert_eq!(root.attr("style"), None);
        assert_eq!(root.attr("class"), Some("app"));

        let div = root.child_elements().next().unwrap();
        let tags: Vec<&str> = div.child_elements().map(|c| c.tag.as_str()).collect();
        assert_eq!(tags, vec!["input", "button"]);
        assert_eq!(div.attr("data-v-123"), None);

        let input = div.child_elements().next().unwrap();
        assert_eq!(input.attr("data-value"), Some("a@b.c"));
        assert_eq!(input.attr("autocomplete"), None);

        assert!(root.find(&|el| el.tag == "script" || el.tag == "span").is_none());
        assert_eq!(snapshot.len(), 4);
    }

    #[test]
    fn selectors_only_reference_surviving_nodes() {
        let snapshot = Snapshot::from_raw(page());
        assert_eq!(snapshot.selector(3), Ok("body.app > div#login > button:nth-of-type(1)"));
        assert_eq!(snapshot.selector(4), Err(ValidationError::UnknownHandle(4)));
    }

    #[test]
    fn serialized_form_mirrors_the_tree() {
        let snapshot = Snapshot::from_raw(page());
        let json = snapshot.to_json();
        let button = &json["body"][0]["div"][0]["button"][0];
        assert_eq!(button["_value"], json!("Sign in"));
        assert_eq!(button["_attributes"][ELEMENT_ID_ATTR], json!("3"));
        assert_eq!(button["_attributes"]["idx"], json!("2"));
        assert!(!snapshot.serialized().contains("secret"));
    }

    #[test]
    fn markup_round_trips_through_the_capture_format() {
        let raw = page();
        assert_eq!(RawElement::from_markup(&raw.to_markup()).unwrap(), raw);
    }

    #[test]
    fn unparseable_markup_is_an_error() {
        assert!(matches!(
            Snapshot::from_markup("<html><body>"),
            Err(SnapshotError::Parse(_))
        ));
        assert!(matches!(
            Snapshot::from_markup("[]"),
            Err(SnapshotError::Malformed(_))
        ));
        assert!(matches!(
            Snapshot::from_markup(r#"[{"tag":"body"},{"parent":5,"tag":"div"}]"#),
            Err(SnapshotError::Malformed(_))
        ));
    }

    #[test]
    fn empty_snapshot_resolves_nothing() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.selector(0), Err(ValidationError::UnknownHandle(0)));
        assert_eq!(snapshot.to_json(), json!({}));
    }
}
