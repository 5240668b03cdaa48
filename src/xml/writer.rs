//! Subtree serialisation: the owned tree back into quick-xml events.

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use super::{Document, NodeId, XmlNode};
use crate::error::{Result, XmlEncError};

/// Serialises one subtree. `extra_ns` declarations are written onto the top
/// element only, letting callers re-anchor namespace bindings inherited from
/// ancestors that the dump would otherwise lose.
pub(super) fn serialize_node(
    doc: &Document,
    id: NodeId,
    extra_ns: &[(Option<String>, String)],
) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    write_node(doc, id, extra_ns, &mut writer)?;
    Ok(writer.into_inner())
}

fn write_node(
    doc: &Document,
    id: NodeId,
    extra_ns: &[(Option<String>, String)],
    writer: &mut Writer<Vec<u8>>,
) -> Result<()> {
    match doc.node(id) {
        XmlNode::Text(text) => {
            writer.write_event(Event::Text(BytesText::new(text))).map_err(|e| XmlEncError::Xml(e.to_string()))?;
        }
        XmlNode::Element(element) => {
            let declarations: Vec<(String, &str)> = extra_ns
                .iter()
                .map(|(prefix, uri)| {
                    let name = match prefix {
                        Some(p) => format!("xmlns:{p}"),
                        None => "xmlns".to_owned(),
                    };
                    (name, uri.as_str())
                })
                .collect();

            let qualified = element.qualified_name();
            let mut start = BytesStart::new(qualified.as_str());
            for attribute in &element.attributes {
                start.push_attribute((attribute.name.as_str(), attribute.value.as_str()));
            }
            for (name, uri) in &declarations {
                start.push_attribute((name.as_str(), *uri));
            }

            let children = doc.children(id);
            if children.is_empty() {
                writer.write_event(Event::Empty(start)).map_err(|e| XmlEncError::Xml(e.to_string()))?;
            } else {
                writer.write_event(Event::Start(start)).map_err(|e| XmlEncError::Xml(e.to_string()))?;
                for &child in children {
                    write_node(doc, child, &[], writer)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(qualified.as_str())))
                    .map_err(|e| XmlEncError::Xml(e.to_string()))?;
            }
        }
    }
    Ok(())
}
