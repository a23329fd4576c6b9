//! Stanza helpers: inbound parsing, chat notices, and fixture readdressing.
//!
//! These are thin wrappers around quick-xml. Stanzas travel through the
//! system as XML text; only the few fields the probe logic needs (kind,
//! sender, type, body) are ever extracted.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::jid::{Jid, JidError};

/// Top-level stanza kinds defined by RFC 6120.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaKind {
    Message,
    Presence,
    Iq,
    /// Anything else that appears at stanza level (stream errors, SM acks…).
    Other(String),
}

impl StanzaKind {
    fn from_local_name(name: &[u8]) -> Self {
        match name {
            b"message" => Self::Message,
            b"presence" => Self::Presence,
            b"iq" => Self::Iq,
            other => Self::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StanzaError {
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("no root element")]
    Empty,
    #[error("truncated stanza")]
    Truncated,
    #[error("unexpected text outside an element")]
    StrayText,
    #[error("invalid sender address: {0}")]
    Sender(#[from] JidError),
}

fn xml_err(e: impl std::fmt::Display) -> StanzaError {
    StanzaError::Xml(e.to_string())
}

/// An inbound stanza with the fields the probe logic cares about.
#[derive(Debug, Clone)]
pub struct InboundStanza {
    pub kind: StanzaKind,
    /// Sender address. Absent for stanzas originated by our own server.
    pub from: Option<Jid>,
    /// Value of the `type` attribute, e.g. "chat", "error", "unavailable".
    pub stanza_type: Option<String>,
    pub id: Option<String>,
    /// Concatenated text of the `<body/>` child, if any.
    pub body: Option<String>,
    /// The stanza exactly as received.
    pub raw: String,
}

impl InboundStanza {
    pub fn parse(raw: &str) -> Result<Self, StanzaError> {
        let mut reader = Reader::from_str(raw);
        let mut depth = 0usize;
        let mut root: Option<Root> = None;
        let mut body: Option<String> = None;
        let mut in_body = false;

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) => {
                    if depth == 0 {
                        root = Some(read_root(&e)?);
                    } else if depth == 1 && e.local_name().as_ref() == b"body" {
                        in_body = true;
                        body.get_or_insert_with(String::new);
                    }
                    depth += 1;
                }
                Event::Empty(e) => {
                    if depth == 0 {
                        root = Some(read_root(&e)?);
                        break;
                    }
                    if depth == 1 && e.local_name().as_ref() == b"body" {
                        body.get_or_insert_with(String::new);
                    }
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth <= 1 {
                        in_body = false;
                    }
                    if depth == 0 {
                        break;
                    }
                }
                Event::Text(t) => {
                    if in_body {
                        let text = t.unescape().map_err(xml_err)?;
                        body.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                Event::CData(c) => {
                    if in_body {
                        let text = String::from_utf8_lossy(&c);
                        body.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                Event::Eof => {
                    if depth > 0 {
                        return Err(StanzaError::Truncated);
                    }
                    break;
                }
                _ => {}
            }
        }

        let root = root.ok_or(StanzaError::Empty)?;
        Ok(Self {
            kind: root.kind,
            from: root.from,
            stanza_type: root.stanza_type,
            id: root.id,
            body,
            raw: raw.to_string(),
        })
    }

    pub fn is_message(&self) -> bool {
        self.kind == StanzaKind::Message
    }
}

struct Root {
    kind: StanzaKind,
    from: Option<Jid>,
    stanza_type: Option<String>,
    id: Option<String>,
}

fn read_root(e: &BytesStart<'_>) -> Result<Root, StanzaError> {
    let from = match attribute(e, "from")? {
        Some(v) => Some(Jid::parse(&v)?),
        None => None,
    };
    Ok(Root {
        kind: StanzaKind::from_local_name(e.local_name().as_ref()),
        from,
        stanza_type: attribute(e, "type")?,
        id: attribute(e, "id")?,
    })
}

/// Text of the first element named `local_name` anywhere in `raw`.
pub fn child_text(raw: &str, local_name: &str) -> Result<Option<String>, StanzaError> {
    let mut reader = Reader::from_str(raw);
    let mut capture: Option<String> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                if capture.is_none() && e.local_name().as_ref() == local_name.as_bytes() {
                    capture = Some(String::new());
                    depth = 0;
                } else if capture.is_some() {
                    depth += 1;
                }
            }
            Event::Empty(e) => {
                if capture.is_none() && e.local_name().as_ref() == local_name.as_bytes() {
                    return Ok(Some(String::new()));
                }
            }
            Event::Text(t) => {
                if let Some(text) = capture.as_mut() {
                    text.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::End(_) => {
                if capture.is_some() {
                    if depth == 0 {
                        return Ok(capture);
                    }
                    depth -= 1;
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, StanzaError> {
    match e.try_get_attribute(name).map_err(xml_err)? {
        Some(attr) => Ok(Some(attr.unescape_value().map_err(xml_err)?.into_owned())),
        None => Ok(None),
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), StanzaError> {
    writer.write_event(event).map_err(xml_err)
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String, StanzaError> {
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

/// Build a `type='chat'` message carrying a plain-text body.
pub fn chat_message(to: &Jid, body: &str) -> Result<String, StanzaError> {
    let mut writer = Writer::new(Vec::new());
    let mut start = BytesStart::new("message");
    start.push_attribute(("to", to.as_str()));
    start.push_attribute(("type", "chat"));
    write(&mut writer, Event::Start(start))?;
    write(&mut writer, Event::Start(BytesStart::new("body")))?;
    write(&mut writer, Event::Text(BytesText::new(body)))?;
    write(&mut writer, Event::End(BytesEnd::new("body")))?;
    write(&mut writer, Event::End(BytesEnd::new("message")))?;
    finish(writer)
}

/// Split a recorded fragment into its top-level elements and address each
/// one to `to`, replacing any `to` attribute already present.
///
/// Everything below the top level is copied through untouched.
pub fn readdress(fragment: &str, to: &Jid) -> Result<Vec<String>, StanzaError> {
    let mut reader = Reader::from_str(fragment);
    let mut stanzas = Vec::new();
    let mut current: Option<Writer<Vec<u8>>> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                if depth == 0 {
                    let mut writer = Writer::new(Vec::new());
                    write(&mut writer, Event::Start(with_recipient(&e, to)?))?;
                    current = Some(writer);
                } else if let Some(writer) = current.as_mut() {
                    write(writer, Event::Start(e))?;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 0 {
                    let mut writer = Writer::new(Vec::new());
                    write(&mut writer, Event::Empty(with_recipient(&e, to)?))?;
                    stanzas.push(finish(writer)?);
                } else if let Some(writer) = current.as_mut() {
                    write(writer, Event::Empty(e))?;
                }
            }
            Event::End(e) => {
                depth = depth.checked_sub(1).ok_or(StanzaError::Truncated)?;
                if let Some(writer) = current.as_mut() {
                    write(writer, Event::End(e))?;
                }
                if depth == 0 {
                    if let Some(writer) = current.take() {
                        stanzas.push(finish(writer)?);
                    }
                }
            }
            Event::Text(t) => {
                if depth > 0 {
                    if let Some(writer) = current.as_mut() {
                        write(writer, Event::Text(t))?;
                    }
                } else if !t.iter().all(u8::is_ascii_whitespace) {
                    return Err(StanzaError::StrayText);
                }
            }
            Event::CData(c) => {
                if let Some(writer) = current.as_mut() {
                    write(writer, Event::CData(c))?;
                }
            }
            // Declarations and comments never leave the fixture.
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) | Event::Comment(_) => {}
            Event::Eof => break,
        }
    }

    if depth > 0 {
        return Err(StanzaError::Truncated);
    }
    if stanzas.is_empty() {
        return Err(StanzaError::Empty);
    }
    Ok(stanzas)
}

fn with_recipient(e: &BytesStart<'_>, to: &Jid) -> Result<BytesStart<'static>, StanzaError> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(xml_err)?
        .to_string();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref() == b"to" {
            continue;
        }
        // Re-escaped for double quotes; the raw value may have been
        // single-quoted with a literal `"` inside.
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(xml_err)?;
        let value = attr.unescape_value().map_err(xml_err)?;
        out.push_attribute((key, value.as_ref()));
    }
    out.push_attribute(("to", to.as_str()));
    Ok(out)
}
