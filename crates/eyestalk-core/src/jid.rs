//! Peer identity: an XMPP address of the form `[local@]domain[/resource]`.
//!
//! The full address is kept verbatim and used as the session key. No
//! stringprep/case folding is applied: two addresses that differ in any
//! byte are two different peers.

use std::fmt;
use std::str::FromStr;

/// A parsed XMPP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Jid {
    raw: String,
    /// Byte offset of the '@' separator, if there is a local part.
    at: Option<usize>,
    /// Byte offset of the '/' separator, if there is a resource.
    slash: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JidError {
    #[error("empty address")]
    Empty,
    #[error("address {0:?} has an empty domain")]
    EmptyDomain(String),
    #[error("address {0:?} has an empty local part")]
    EmptyLocal(String),
    #[error("address {0:?} has an empty resource")]
    EmptyResource(String),
}

impl Jid {
    pub fn parse(s: &str) -> Result<Self, JidError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(JidError::Empty);
        }

        // The resource may itself contain '@' or '/', so split on the first '/'
        // and only look for '@' before it.
        let slash = s.find('/');
        let head = &s[..slash.unwrap_or(s.len())];
        let at = head.find('@');

        if at == Some(0) {
            return Err(JidError::EmptyLocal(s.to_string()));
        }
        let domain_start = at.map(|i| i + 1).unwrap_or(0);
        if domain_start >= head.len() {
            return Err(JidError::EmptyDomain(s.to_string()));
        }
        if let Some(i) = slash {
            if i + 1 == s.len() {
                return Err(JidError::EmptyResource(s.to_string()));
            }
        }

        Ok(Self {
            raw: s.to_string(),
            at,
            slash,
        })
    }

    /// The full address as received.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn local(&self) -> Option<&str> {
        self.at.map(|i| &self.raw[..i])
    }

    pub fn domain(&self) -> &str {
        let start = self.at.map(|i| i + 1).unwrap_or(0);
        let end = self.slash.unwrap_or(self.raw.len());
        &self.raw[start..end]
    }

    pub fn resource(&self) -> Option<&str> {
        self.slash.map(|i| &self.raw[i + 1..])
    }

    /// The address with any resource stripped.
    pub fn bare(&self) -> Jid {
        match self.slash {
            Some(i) => Jid {
                raw: self.raw[..i].to_string(),
                at: self.at,
                slash: None,
            },
            None => self.clone(),
        }
    }

    pub fn is_bare(&self) -> bool {
        self.slash.is_none()
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::parse(s)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for Jid {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}
