//! Document parsing: quick-xml events into the owned tree.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use super::{Document, NodeId};
use crate::error::{Result, XmlEncError};

/// Parses a complete document. Comments, processing instructions, and the
/// XML declaration are dropped; text and CDATA runs are kept verbatim.
pub(super) fn parse_document(text: &str) -> Result<Document> {
    let mut doc = Document::new();
    let mut reader = NsReader::from_str(text);
    let mut stack: Vec<NodeId> = Vec::new();

    loop {
        let (resolve, event) = reader.read_resolved_event().map_err(xml_err)?;
        match event {
            Event::Start(ref element) => {
                let id = build_element(&mut doc, &resolve, element)?;
                attach(&mut doc, &stack, id)?;
                stack.push(id);
            }
            Event::Empty(ref element) => {
                let id = build_element(&mut doc, &resolve, element)?;
                attach(&mut doc, &stack, id)?;
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(t) => {
                let value = t.unescape().map_err(xml_err)?.into_owned();
                append_text(&mut doc, &stack, &value)?;
            }
            Event::CData(t) => {
                let value =
                    String::from_utf8(t.into_inner().into_owned()).map_err(|e| XmlEncError::Xml(e.to_string()))?;
                append_text(&mut doc, &stack, &value)?;
            }
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if doc.root().is_none() {
        return Err(XmlEncError::Xml("document has no root element".into()));
    }
    Ok(doc)
}

/// Parses a node sequence by wrapping it in a synthetic root. The caller
/// splices the wrapper's children and discards the wrapper.
pub(super) fn parse_fragment(text: &str) -> Result<Document> {
    parse_document(&format!("<fragment-wrapper>{text}</fragment-wrapper>"))
}

fn build_element(doc: &mut Document, resolve: &ResolveResult<'_>, element: &BytesStart<'_>) -> Result<NodeId> {
    let namespace = match resolve {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.0).into_owned()),
        ResolveResult::Unbound | ResolveResult::Unknown(_) => None,
    };
    let prefix = element.name().prefix().map(|p| String::from_utf8_lossy(p.into_inner()).into_owned());
    let local_name = String::from_utf8_lossy(element.local_name().into_inner()).into_owned();

    let id = doc.create_element(prefix.as_deref(), &local_name, namespace.as_deref());
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| XmlEncError::Xml(e.to_string()))?;
        let name = String::from_utf8_lossy(attribute.key.into_inner()).into_owned();
        let value = attribute.unescape_value().map_err(xml_err)?.into_owned();
        doc.set_attribute(id, &name, &value);
    }
    Ok(id)
}

fn attach(doc: &mut Document, stack: &[NodeId], id: NodeId) -> Result<()> {
    if let Some(&parent) = stack.last() {
        doc.link_child(parent, id);
    } else if doc.root().is_some() {
        return Err(XmlEncError::Xml("more than one root element".into()));
    } else {
        doc.link_root(id);
    }
    Ok(())
}

fn append_text(doc: &mut Document, stack: &[NodeId], value: &str) -> Result<()> {
    if let Some(&parent) = stack.last() {
        let id = doc.create_text(value);
        doc.link_child(parent, id);
    } else if !value.trim().is_empty() {
        return Err(XmlEncError::Xml("text content outside the root element".into()));
    }
    Ok(())
}

fn xml_err(err: quick_xml::Error) -> XmlEncError {
    XmlEncError::Xml(err.to_string())
}
