//! `<stream:features/>` parsing.

use quick_xml::events::Event;
use quick_xml::Reader;

/// What the server offered after a stream (re)start.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamFeatures {
    pub starttls: bool,
    pub mechanisms: Vec<String>,
    pub bind: bool,
    /// RFC 3921 session establishment is offered and not marked optional.
    pub session_required: bool,
}

impl StreamFeatures {
    pub fn parse(raw: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_str(raw);
        let mut features = Self::default();
        let mut in_mechanism = false;
        let mut in_session = false;

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"starttls" => features.starttls = true,
                    b"mechanism" => in_mechanism = true,
                    b"bind" => features.bind = true,
                    b"session" => {
                        features.session_required = true;
                        in_session = true;
                    }
                    b"optional" if in_session => features.session_required = false,
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"starttls" => features.starttls = true,
                    b"bind" => features.bind = true,
                    b"session" => features.session_required = true,
                    b"optional" if in_session => features.session_required = false,
                    _ => {}
                },
                Event::Text(t) if in_mechanism => {
                    let name = t.unescape()?;
                    features.mechanisms.push(name.trim().to_string());
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"mechanism" => in_mechanism = false,
                    b"session" => in_session = false,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(features)
    }

    pub fn offers(&self, mechanism: &str) -> bool {
        self.mechanisms.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }
}
