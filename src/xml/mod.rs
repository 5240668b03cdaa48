//! Owned, mutable XML tree used by the encryption engine.
//!
//! The engine reads templates, rewrites ciphertext into them, and substitutes
//! plaintext for encrypted subtrees in place, so it needs a document model it
//! can mutate. Parsing and serialisation are delegated to `quick-xml` at the
//! edges; in between, nodes live in a flat arena addressed by [`NodeId`].
//!
//! The operation set is exactly what the engine consumes: namespace-aware
//! name checks, element-only sibling iteration, text content access,
//! cross-document import, node/content replacement, and explicit known-ID
//! registration. Unlinked nodes stay in the arena for the document's
//! lifetime; a document is a processing scratchpad, not a long-lived store.

mod reader;
mod writer;

use std::collections::HashMap;

use crate::error::{Result, XmlEncError};

/// Index of a node inside its owning [`Document`] arena.
pub type NodeId = usize;

/// A single attribute, name kept exactly as written (including any
/// `xmlns`/`xmlns:prefix` declarations).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// An element node: serialisation prefix, local name, resolved namespace URI,
/// and attributes in document order.
#[derive(Clone, Debug)]
pub struct Element {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl Element {
    /// The name as serialised, `prefix:local` or bare `local`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }

    /// Looks up an attribute value by its literal name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|a| a.name == name).map(|a| a.value.as_str())
    }

    /// True when an `xmlns`-style attribute on this element binds `prefix`.
    fn declares_prefix(&self, prefix: Option<&str>) -> bool {
        let decl = match prefix {
            Some(p) => format!("xmlns:{p}"),
            None => "xmlns".to_owned(),
        };
        self.attributes.iter().any(|a| a.name == decl)
    }
}

/// A node is either an element or a text run. Comments and processing
/// instructions are dropped at parse time.
#[derive(Clone, Debug)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

struct NodeSlot {
    node: XmlNode,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An XML document: arena of nodes, a root, and the registered-ID table.
#[derive(Default)]
pub struct Document {
    slots: Vec<NodeSlot>,
    root: Option<NodeId>,
    ids: HashMap<String, NodeId>,
}

impl Document {
    /// Creates an empty document with no root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a complete document from text.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Xml`] on malformed input or a missing root.
    pub fn parse(text: &str) -> Result<Self> {
        reader::parse_document(text)
    }

    /// Serialises the whole document, root subtree only, no XML declaration.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Xml`] when the document has no root or
    /// serialisation fails.
    pub fn to_xml(&self) -> Result<String> {
        let root = self.root.ok_or_else(|| XmlEncError::Xml("document has no root".into()))?;
        let bytes = writer::serialize_node(self, root, &[])?;
        String::from_utf8(bytes).map_err(|e| XmlEncError::Xml(e.to_string()))
    }

    /// Serialises one subtree verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Xml`] when serialisation fails.
    pub fn serialize_node(&self, id: NodeId) -> Result<Vec<u8>> {
        writer::serialize_node(self, id, &[])
    }

    /// Serialises one subtree, injecting onto its top element every namespace
    /// declaration that is in scope from ancestors but not redeclared inside
    /// the subtree root itself. The dump stays well formed when parsed
    /// standalone.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Xml`] when serialisation fails.
    pub fn serialize_node_with_scope(&self, id: NodeId) -> Result<Vec<u8>> {
        let extra = self.missing_scope_declarations(id);
        writer::serialize_node(self, id, &extra)
    }

    /// The root element, if one exists.
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Makes `id` the document root. The node is detached from any parent.
    pub fn set_root(&mut self, id: NodeId) {
        self.detach(id);
        self.root = Some(id);
    }

    /// Borrows a node.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not a node of this document.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &XmlNode {
        &self.slots[id].node
    }

    /// Borrows a node as an element, if it is one.
    #[must_use]
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.slots[id].node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        }
    }

    /// Child list of a node, all node kinds, document order.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id].children
    }

    /// Parent of a node, `None` for the root and unlinked nodes.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id].parent
    }

    /// Name for diagnostics: the qualified element name, or `#text`.
    #[must_use]
    pub fn name_of(&self, id: NodeId) -> String {
        match &self.slots[id].node {
            XmlNode::Element(el) => el.qualified_name(),
            XmlNode::Text(_) => "#text".to_owned(),
        }
    }

    /// Checks local name and namespace URI of an element node.
    #[must_use]
    pub fn is_named(&self, id: NodeId, local_name: &str, namespace: &str) -> bool {
        self.element(id)
            .is_some_and(|el| el.local_name == local_name && el.namespace.as_deref() == Some(namespace))
    }

    /// First child that is an element, skipping text runs.
    #[must_use]
    pub fn first_element_child(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id].children.iter().copied().find(|&c| self.element(c).is_some())
    }

    /// Next sibling that is an element, skipping text runs.
    #[must_use]
    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.slots[id].parent?;
        let siblings = &self.slots[parent].children;
        let position = siblings.iter().position(|&c| c == id)?;
        siblings[position + 1..].iter().copied().find(|&c| self.element(c).is_some())
    }

    /// Attribute value of an element node.
    #[must_use]
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|el| el.attribute(name))
    }

    /// Sets (or replaces) an attribute on an element node.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        if let XmlNode::Element(el) = &mut self.slots[id].node {
            if let Some(existing) = el.attributes.iter_mut().find(|a| a.name == name) {
                existing.value = value.to_owned();
            } else {
                el.attributes.push(Attribute { name: name.to_owned(), value: value.to_owned() });
            }
        }
    }

    /// Concatenated text of the subtree, in document order.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.slots[id].node {
            XmlNode::Text(t) => out.push_str(t),
            XmlNode::Element(_) => {
                for &child in &self.slots[id].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Unlinks every child of `id`.
    pub fn clear_children(&mut self, id: NodeId) {
        let old: Vec<NodeId> = self.slots[id].children.drain(..).collect();
        for child in old {
            self.slots[child].parent = None;
        }
    }

    /// Replaces the node's children with a single text run.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        self.clear_children(id);
        let text_id = self.create_text(text);
        self.slots[text_id].parent = Some(id);
        self.slots[id].children.push(text_id);
    }

    /// Creates an unlinked element node.
    pub fn create_element(&mut self, prefix: Option<&str>, local_name: &str, namespace: Option<&str>) -> NodeId {
        self.push_slot(XmlNode::Element(Element {
            prefix: prefix.map(str::to_owned),
            local_name: local_name.to_owned(),
            namespace: namespace.map(str::to_owned),
            attributes: Vec::new(),
        }))
    }

    /// Creates an unlinked text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_slot(XmlNode::Text(text.to_owned()))
    }

    /// Appends `child` to `parent`, detaching it from any previous parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.slots[child].parent = Some(parent);
        self.slots[parent].children.push(child);
    }

    /// Creates an element in `namespace` and appends it to `parent`, reusing
    /// the prefix the namespace is already bound to when one is in scope and
    /// declaring a default namespace on the new element otherwise.
    pub fn add_element_child(&mut self, parent: NodeId, local_name: &str, namespace: &str) -> NodeId {
        let prefix = self.prefix_for(parent, namespace);
        let needs_declaration = prefix.is_none() && !self.in_scope(parent, None, namespace);
        let child = self.create_element(prefix.as_deref(), local_name, Some(namespace));
        if needs_declaration {
            self.set_attribute(child, "xmlns", namespace);
        }
        self.append_child(parent, child);
        child
    }

    /// Walks the subtree under `start` and records every attribute named in
    /// `attr_names` into the ID table. A later registration for the same
    /// value wins, matching repeated registration on a reused document.
    pub fn register_ids(&mut self, start: NodeId, attr_names: &[&str]) {
        let mut pending = vec![start];
        while let Some(id) = pending.pop() {
            if let XmlNode::Element(el) = &self.slots[id].node {
                for name in attr_names {
                    if let Some(value) = el.attribute(name) {
                        self.ids.insert(value.to_owned(), id);
                    }
                }
            }
            pending.extend(self.slots[id].children.iter().copied());
        }
    }

    /// Resolves a registered ID value to its element.
    #[must_use]
    pub fn element_by_id(&self, value: &str) -> Option<NodeId> {
        self.ids.get(value).copied()
    }

    /// Deep-copies a subtree from another document into this one. The copy is
    /// unlinked; namespace declarations in scope at the source but absent
    /// from the copied root are added to it so the subtree stays resolvable.
    pub fn import(&mut self, other: &Document, node: NodeId) -> NodeId {
        let copied = self.copy_subtree(other, node);
        if self.element(copied).is_some() {
            for (prefix, uri) in other.missing_scope_declarations(node) {
                let name = match &prefix {
                    Some(p) => format!("xmlns:{p}"),
                    None => "xmlns".to_owned(),
                };
                self.set_attribute(copied, &name, &uri);
            }
        }
        copied
    }

    fn copy_subtree(&mut self, other: &Document, node: NodeId) -> NodeId {
        let copied = self.push_slot(other.slots[node].node.clone());
        for &child in &other.slots[node].children {
            let child_copy = self.copy_subtree(other, child);
            self.slots[child_copy].parent = Some(copied);
            self.slots[copied].children.push(child_copy);
        }
        copied
    }

    /// Puts `new` where `old` stands; `old` is unlinked. When `old` is the
    /// root, `new` becomes the root.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Xml`] when `old` is neither linked nor the root.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        match self.slots[old].parent {
            Some(parent) => {
                self.detach(new);
                let position = self.slots[parent]
                    .children
                    .iter()
                    .position(|&c| c == old)
                    .ok_or_else(|| XmlEncError::Xml("node not linked to its parent".into()))?;
                self.slots[parent].children[position] = new;
                self.slots[new].parent = Some(parent);
                self.slots[old].parent = None;
                Ok(())
            }
            None if self.root == Some(old) => {
                self.set_root(new);
                Ok(())
            }
            None => Err(XmlEncError::Xml("cannot replace an unlinked node".into())),
        }
    }

    /// Drops all children of `node` and installs `new_child` as its only one.
    pub fn replace_content(&mut self, node: NodeId, new_child: NodeId) {
        self.clear_children(node);
        self.detach(new_child);
        self.slots[new_child].parent = Some(node);
        self.slots[node].children.push(new_child);
    }

    /// Parses `bytes` as a document fragment and splices the parsed nodes in
    /// place of `old`. This is how decrypted plaintext re-enters the tree.
    ///
    /// # Errors
    ///
    /// Returns [`XmlEncError::Xml`] on malformed plaintext, or when `old` is
    /// the root and the fragment does not hold exactly one element.
    pub fn replace_node_with_fragment(&mut self, old: NodeId, bytes: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(bytes).map_err(|e| XmlEncError::Xml(e.to_string()))?;
        let fragment = reader::parse_fragment(text)?;
        let wrapper = fragment.root.ok_or_else(|| XmlEncError::Xml("empty fragment".into()))?;
        let imported: Vec<NodeId> =
            fragment.children(wrapper).iter().map(|&c| self.import(&fragment, c)).collect();

        match self.slots[old].parent {
            Some(parent) => {
                let position = self.slots[parent]
                    .children
                    .iter()
                    .position(|&c| c == old)
                    .ok_or_else(|| XmlEncError::Xml("node not linked to its parent".into()))?;
                self.slots[parent].children.remove(position);
                self.slots[old].parent = None;
                for (offset, id) in imported.into_iter().enumerate() {
                    self.slots[id].parent = Some(parent);
                    self.slots[parent].children.insert(position + offset, id);
                }
                Ok(())
            }
            None => {
                let mut elements = imported.iter().copied().filter(|&id| self.element(id).is_some());
                let first = elements
                    .next()
                    .ok_or_else(|| XmlEncError::Xml("fragment holds no element to become the root".into()))?;
                if elements.next().is_some() {
                    return Err(XmlEncError::Xml("fragment holds more than one root element".into()));
                }
                self.set_root(first);
                Ok(())
            }
        }
    }

    /// Namespace declarations visible at `id`: own and inherited, nearest
    /// binding first per prefix.
    #[must_use]
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<(Option<String>, String)> {
        let mut seen: Vec<(Option<String>, String)> = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let XmlNode::Element(el) = &self.slots[current].node {
                for attr in &el.attributes {
                    let prefix = if attr.name == "xmlns" {
                        Some(None)
                    } else {
                        attr.name.strip_prefix("xmlns:").map(|p| Some(p.to_owned()))
                    };
                    if let Some(prefix) = prefix {
                        if !seen.iter().any(|(p, _)| *p == prefix) {
                            seen.push((prefix, attr.value.clone()));
                        }
                    }
                }
            }
            cursor = self.slots[current].parent;
        }
        seen
    }

    /// In-scope declarations that the element does not redeclare itself.
    fn missing_scope_declarations(&self, id: NodeId) -> Vec<(Option<String>, String)> {
        let Some(el) = self.element(id) else { return Vec::new() };
        let Some(parent) = self.slots[id].parent else { return Vec::new() };
        self.in_scope_namespaces(parent)
            .into_iter()
            .filter(|(prefix, _)| !el.declares_prefix(prefix.as_deref()))
            .collect()
    }

    /// The prefix `namespace` is bound to at `context`, when it is in scope.
    /// `Some(None)` collapses to `None`: a default-namespace binding needs no
    /// prefix on the new element.
    fn prefix_for(&self, context: NodeId, namespace: &str) -> Option<String> {
        self.in_scope_namespaces(context)
            .into_iter()
            .find(|(_, uri)| uri == namespace)
            .and_then(|(prefix, _)| prefix)
    }

    /// True when `prefix` currently resolves to `namespace` at `context`.
    fn in_scope(&self, context: NodeId, prefix: Option<&str>, namespace: &str) -> bool {
        self.in_scope_namespaces(context)
            .iter()
            .any(|(p, uri)| p.as_deref() == prefix && uri == namespace)
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.slots[id].parent {
            self.slots[parent].children.retain(|&c| c != id);
            self.slots[id].parent = None;
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    fn push_slot(&mut self, node: XmlNode) -> NodeId {
        let id = self.slots.len();
        self.slots.push(NodeSlot { node, parent: None, children: Vec::new() });
        id
    }

    pub(crate) fn link_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    pub(crate) fn link_child(&mut self, parent: NodeId, child: NodeId) {
        self.slots[child].parent = Some(parent);
        self.slots[parent].children.push(child);
    }
}
