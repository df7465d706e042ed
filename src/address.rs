//! The address book: which game servers to join.
//!
//! The endpoint list is a plain text file with one server per line.  Each line
//! is `host`, `host:port`, or `[ipv6]:port`, optionally prefixed with a
//! `tw-0.6+udp://` or `tw-0.7+udp://` scheme as copied from a server browser.
//! The port defaults to 8303.  Blank lines and `#` comments are skipped.
//! Lines that fail to parse are reported and dropped; they never abort startup
//! on their own.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use utf8path::Path;

use crate::error::{Error, Result};

/// Port used when an entry does not name one.
pub const DEFAULT_PORT: u16 = 8303;

/// Contents written when the endpoint list does not exist yet.
pub const SAMPLE_ADDRESS_BOOK: &str = "127.0.0.1:8303\nexample.com:8303\n";

const SCHEME_PREFIXES: &[&str] = &["tw-0.6+udp://", "tw-0.7+udp://"];

/// A host/port pair identifying one game server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint, rejecting empty hosts, hosts with whitespace, and port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(Error::validation("host is empty", Some("host".to_string())));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(Error::validation(
                format!("host {host:?} contains whitespace"),
                Some("host".to_string()),
            ));
        }
        if port == 0 {
            return Err(Error::validation(
                "port must be between 1 and 65535",
                Some("port".to_string()),
            ));
        }
        Ok(Self { host, port })
    }

    /// The host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut entry = s.trim();
        for prefix in SCHEME_PREFIXES {
            if let Some(rest) = entry.strip_prefix(prefix) {
                entry = rest;
                break;
            }
        }

        if let Some(rest) = entry.strip_prefix('[') {
            let Some((host, tail)) = rest.split_once(']') else {
                return Err(Error::validation(
                    format!("unterminated IPv6 address in {s:?}"),
                    None,
                ));
            };
            let Some(port) = tail.strip_prefix(':') else {
                return Err(Error::validation(
                    format!("expected :port after IPv6 address in {s:?}"),
                    None,
                ));
            };
            return Endpoint::new(host, parse_port(port)?);
        }

        match entry.split_once(':') {
            None => Endpoint::new(entry, DEFAULT_PORT),
            Some((_, port)) if port.contains(':') => Err(Error::validation(
                format!("too many ':' separators in {s:?}"),
                None,
            )),
            Some((host, port)) => Endpoint::new(host, parse_port(port)?),
        }
    }
}

fn parse_port(port: &str) -> Result<u16> {
    let value = port.trim().parse::<u16>().map_err(|_| {
        Error::validation(
            format!("invalid port {port:?}"),
            Some("port".to_string()),
        )
    })?;
    if value == 0 {
        return Err(Error::validation(
            "port must be between 1 and 65535",
            Some("port".to_string()),
        ));
    }
    Ok(value)
}

/// A line of the endpoint list that did not become a session.
#[derive(Clone, Debug)]
pub struct RejectedEntry {
    /// One-based line number.
    pub line: usize,
    /// The line as written.
    pub text: String,
    /// Why it was dropped.
    pub reason: String,
}

/// The validated, de-duplicated list of endpoints, in file order.
#[derive(Clone, Debug, Default)]
pub struct AddressBook {
    endpoints: Vec<Endpoint>,
    rejected: Vec<RejectedEntry>,
}

impl AddressBook {
    /// Parses an endpoint list from text.
    pub fn parse(text: &str) -> Self {
        Self::from_entries(text.lines())
    }

    /// Builds an address book from individual entries.
    ///
    /// Entries that fail to parse and repeats of an earlier endpoint are
    /// recorded in [`AddressBook::rejected`] rather than returned as errors.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut book = AddressBook::default();
        let mut seen = HashSet::new();
        for (idx, entry) in entries.into_iter().enumerate() {
            let text = entry.as_ref().trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            match text.parse::<Endpoint>() {
                Ok(endpoint) if seen.contains(&endpoint) => {
                    book.rejected.push(RejectedEntry {
                        line: idx + 1,
                        text: text.to_string(),
                        reason: format!("duplicate of {endpoint}"),
                    });
                }
                Ok(endpoint) => {
                    seen.insert(endpoint.clone());
                    book.endpoints.push(endpoint);
                }
                Err(err) => {
                    book.rejected.push(RejectedEntry {
                        line: idx + 1,
                        text: text.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        book
    }

    /// Loads the endpoint list from `path`, writing [`SAMPLE_ADDRESS_BOOK`] first
    /// if the file does not exist.
    ///
    /// Returns a configuration error when no valid endpoint remains.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.as_str(), "endpoint list missing; writing sample");
            std::fs::write(path.as_str(), SAMPLE_ADDRESS_BOOK).map_err(|err| {
                Error::io(format!("could not create {}: {err}", path.as_str()), err)
            })?;
        }
        let text = std::fs::read_to_string(path.as_str())
            .map_err(|err| Error::io(format!("could not read {}: {err}", path.as_str()), err))?;
        let book = Self::parse(&text);
        if book.is_empty() {
            return Err(Error::configuration(
                "no valid endpoints",
                Some(path.as_str().to_string()),
            ));
        }
        Ok(book)
    }

    /// The valid endpoints in file order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Entries that were dropped.
    pub fn rejected(&self) -> &[RejectedEntry] {
        &self.rejected
    }

    /// Number of valid endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// True when no valid endpoint was found.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Consumes the book, returning its endpoints.
    pub fn into_endpoints(self) -> Vec<Endpoint> {
        self.endpoints
    }
}
