//! Handle and CSS selector assignment over a pruned element tree.
//!
//! Every element gets the next integer handle in pre-order (parent before children,
//! children in document order) and a selector rebuilt from the root:
//!
//! * `tag#id` when the element has a non-empty id,
//! * `tag.class1.class2` when it has non-empty class tokens,
//! * `tag:nth-of-type(k)` otherwise, `k` being its 1-based rank among same-tag siblings,
//! * a bare `tag` for the root.
//!
//! Fragments are joined root-to-leaf with the child combinator. The element also receives
//! its 1-based position among *all* sibling elements, which the decision-maker uses for
//! ordinal references.

use std::collections::HashMap;

use crate::dom::{Element, Node};
use crate::types::Handle;

pub const ELEMENT_ID_ATTR: &str = "_element_id";
pub const SIBLING_INDEX_ATTR: &str = "idx";

/// Handle to selector table of one snapshot. Handles are dense and start at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorMap {
    selectors: Vec<String>,
}

impl SelectorMap {
    pub fn get(&self, handle: Handle) -> Option<&str> {
        self.selectors.get(handle as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &str)> {
        self.selectors
            .iter()
            .enumerate()
            .map(|(i, s)| (i as Handle, s.as_str()))
    }

    fn push(&mut self, selector: String) -> Handle {
        self.selectors.push(selector);
        (self.selectors.len() - 1) as Handle
    }
}

/// Annotate `root` with handles and sibling indices and return the fresh selector table.
pub fn assign(root: &mut Element) -> SelectorMap {
    let mut map = SelectorMap::default();
    visit(root, None, None, &mut map);
    map
}

struct Position {
    nth_of_type: usize,
    sibling_index: usize,
}

fn visit(el: &mut Element, parent: Option<&str>, position: Option<Position>, map: &mut SelectorMap) {
    let fragment = fragment(el, position.as_ref().map(|p| p.nth_of_type));
    let selector = match parent {
        Some(path) => format!("{} > {}", path, fragment),
        None => fragment,
    };

    let handle = map.push(selector.clone());
    el.set_attr(ELEMENT_ID_ATTR, handle.to_string());
    if let Some(position) = &position {
        el.set_attr(SIBLING_INDEX_ATTR, position.sibling_index.to_string());
    }

    let mut positions = child_positions(el).into_iter();
    for child in el.children.iter_mut() {
        if let Node::Element(child) = child {
            let position = positions.next();
            visit(child, Some(&selector), position, map);
        }
    }
}

fn child_positions(el: &Element) -> Vec<Position> {
    let mut per_tag: HashMap<&str, usize> = HashMap::new();
    el.child_elements()
        .enumerate()
        .map(|(i, child)| {
            let rank = per_tag.entry(child.tag.as_str()).or_insert(0);
            *rank += 1;
            Position {
                nth_of_type: *rank,
                sibling_index: i + 1,
            }
        })
        .collect()
}

/// Selector fragment for one element. `nth_of_type` is `None` only for the root.
pub fn fragment(el: &Element, nth_of_type: Option<usize>) -> String {
    if let Some(id) = el.attr("id").map(str::trim).filter(|id| !id.is_empty()) {
        return format!("{}#{}", el.tag, css_escape(id));
    }

    let classes: Vec<String> = el
        .attr("class")
        .map(|c| c.split_whitespace().map(css_escape).collect())
        .unwrap_or_default();
    if !classes.is_empty() {
        return format!("{}.{}", el.tag, classes.join("."));
    }

    match nth_of_type {
        Some(k) => format!("{}:nth-of-type({})", el.tag, k),
        None => el.tag.clone(),
    }
}

/// Escape a CSS identifier so ids and class tokens like `a:b` or `2col` stay valid.
fn css_escape(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    for (i, c) in ident.chars().enumerate() {
        match c {
            '0'..='9' if i == 0 => out.push_str(&format!("\\3{} ", c)),
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => out.push(c),
            c if !c.is_ascii() => out.push(c),
            c => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    out
}
