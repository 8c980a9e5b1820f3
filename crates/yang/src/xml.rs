//! XML ⇄ data-tree codec.
//!
//! Parsing resolves namespaces eagerly (every node stores its namespace
//! URI, prefixes are erased). Serialization is byte-stable: default
//! namespaces only, declared at the shallowest node that introduces
//! them, attributes in stored order, no synthetic whitespace.

use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::{NsReader, Writer};

use crate::tree::{Attr, DataNode};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed XML attribute: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unexpected end of document")]
    UnexpectedEof,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one XML document into a data tree.
pub fn parse(input: &[u8]) -> Result<DataNode, CodecError> {
    let mut reader = NsReader::from_reader(input);
    let config = reader.config_mut();
    config.trim_text_start = true;
    config.trim_text_end = true;
    let decoder = reader.decoder();

    // Stack of open elements; the finished root pops out at Eof.
    let mut stack: Vec<DataNode> = Vec::new();
    let mut root: Option<DataNode> = None;

    loop {
        let (resolve, event) = reader.read_resolved_event()?;
        match event {
            Event::Start(e) => {
                let node = start_node(decoder, &resolve, &e)?;
                stack.push(node);
            }
            Event::Empty(e) => {
                let node = start_node(decoder, &resolve, &e)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| {
                    CodecError::Malformed("close tag without open element".into())
                })?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| CodecError::Malformed(format!("bad character data: {e}")))?
                    .into_owned();
                if text.trim().is_empty() {
                    continue;
                }
                let Some(open) = stack.last_mut() else {
                    return Err(CodecError::Malformed("text outside root element".into()));
                };
                if open.children.is_empty() {
                    open.value = Some(match open.value.take() {
                        Some(prev) => prev + &text,
                        None => text,
                    });
                }
                // Mixed content after child elements is not meaningful in
                // YANG-modeled data; drop it.
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                if let Some(open) = stack.last_mut() {
                    if open.children.is_empty() {
                        open.value = Some(open.value.take().unwrap_or_default() + &text);
                    }
                }
            }
            Event::Eof => break,
            // Declarations, comments, PIs and doctypes carry no data.
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(CodecError::UnexpectedEof);
    }
    root.ok_or(CodecError::UnexpectedEof)
}

fn start_node(
    decoder: Decoder,
    resolve: &ResolveResult,
    e: &BytesStart<'_>,
) -> Result<DataNode, CodecError> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let namespace = match resolve {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    };

    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        attrs.push(Attr {
            name: String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned(),
            value: attr
                .decode_and_unescape_value(decoder)
                .map_err(|e| CodecError::Malformed(format!("bad attribute value: {e}")))?
                .into_owned(),
        });
    }

    Ok(DataNode {
        name,
        namespace,
        value: None,
        attrs,
        children: Vec::new(),
    })
}

fn attach(
    stack: &mut [DataNode],
    root: &mut Option<DataNode>,
    node: DataNode,
) -> Result<(), CodecError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(CodecError::Malformed("multiple root elements".into()));
            }
            *root = Some(node);
            Ok(())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render a tree to compact XML.
pub fn serialize(node: &DataNode) -> Vec<u8> {
    let mut writer = Writer::new(Vec::new());
    write_node(&mut writer, node, None);
    writer.into_inner()
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &DataNode, inherited: Option<&str>) {
    let mut start = BytesStart::new(node.name.as_str());
    // Namespace declared only where it changes (shallowest-introducer
    // rule keeps output minimal and byte-stable).
    if let Some(ns) = node.namespace.as_deref() {
        if inherited != Some(ns) {
            start.push_attribute(("xmlns", ns));
        }
    }
    for attr in &node.attrs {
        start.push_attribute((attr.name.as_str(), attr.value.as_str()));
    }

    let effective = node.effective_namespace(inherited);

    if node.children.is_empty() && node.value.is_none() {
        let _ = writer.write_event(Event::Empty(start));
        return;
    }

    let _ = writer.write_event(Event::Start(start));
    if let Some(value) = &node.value {
        let _ = writer.write_event(Event::Text(BytesText::new(value)));
    }
    for child in &node.children {
        write_node(writer, child, effective);
    }
    let _ = writer.write_event(Event::End(BytesEnd::new(node.name.as_str())));
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_CONFIG: &str = r#"<rpc message-id="42" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get-config><source><running/></source></get-config></rpc>"#;

    #[test]
    fn parse_resolves_default_namespace() {
        let tree = parse(GET_CONFIG.as_bytes()).unwrap();
        assert_eq!(tree.name, "rpc");
        assert_eq!(
            tree.namespace.as_deref(),
            Some("urn:ietf:params:xml:ns:netconf:base:1.0")
        );
        assert_eq!(tree.attr("message-id"), Some("42"));
        let source = tree.child("get-config").unwrap().child("source").unwrap();
        assert!(source.child("running").unwrap().is_presence());
    }

    #[test]
    fn serialize_is_roundtrip_stable() {
        let tree = parse(GET_CONFIG.as_bytes()).unwrap();
        let first = serialize(&tree);
        assert_eq!(std::str::from_utf8(&first).unwrap(), GET_CONFIG);
        let reparsed = parse(&first).unwrap();
        assert_eq!(reparsed, tree);
        assert_eq!(serialize(&reparsed), first);
    }

    #[test]
    fn prefixed_input_normalizes_to_default_ns() {
        let input = r#"<nc:rpc xmlns:nc="urn:ns" nc:message-id="7"><nc:get/></nc:rpc>"#;
        let tree = parse(input.as_bytes()).unwrap();
        assert_eq!(tree.namespace.as_deref(), Some("urn:ns"));
        assert_eq!(tree.attr("message-id"), Some("7"));
        let out = serialize(&tree);
        assert_eq!(
            std::str::from_utf8(&out).unwrap(),
            r#"<rpc xmlns="urn:ns" message-id="7"><get/></rpc>"#
        );
    }

    #[test]
    fn nested_namespace_declared_once() {
        let inner = DataNode::container("interfaces")
            .with_namespace("urn:ietf:params:xml:ns:yang:ietf-interfaces")
            .with_child(
                DataNode::container("interface").with_child(DataNode::leaf("name", "eth0")),
            );
        let tree = DataNode::container("data")
            .with_namespace("urn:ietf:params:xml:ns:netconf:base:1.0")
            .with_child(inner);
        let out = String::from_utf8(serialize(&tree)).unwrap();
        assert_eq!(
            out,
            r#"<data xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><interfaces xmlns="urn:ietf:params:xml:ns:yang:ietf-interfaces"><interface><name>eth0</name></interface></interfaces></data>"#
        );
    }

    #[test]
    fn escapes_text_and_attributes() {
        let tree = DataNode::leaf("description", "a < b & c").with_attr("note", "say \"hi\"");
        let out = serialize(&tree);
        let reparsed = parse(&out).unwrap();
        assert_eq!(reparsed.value.as_deref(), Some("a < b & c"));
        assert_eq!(reparsed.attr("note"), Some("say \"hi\""));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse(b"<rpc><unclosed></rpc>").is_err());
        assert!(parse(b"no xml here").is_err());
        assert!(parse(b"").is_err());
    }
}
