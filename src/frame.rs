//! TNC2 text frames (`SRC>DST,PATH:INFO`).
//!
//! Parsing never fails. A line that does not have the `SRC>DST...:INFO` shape is
//! kept verbatim as a pass-through frame so that radio noise or a misbehaving
//! upstream feed can never stall the relay.

use std::fmt;

/// One element of a digipeater path, e.g. `WIDE2-1`, `N0CALL-7*` or `TCPIP*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathElement {
    /// Text before the first `-` (callsign or alias such as `WIDE2`)
    pub call: String,
    /// Text after the first `-`, if any (SSID or remaining hop count)
    pub ssid: Option<String>,
    /// Trailing `*`: this element has already been used
    pub used: bool,
}

impl PathElement {
    /// Parse a single path element; never fails
    pub fn parse(text: &str) -> Self {
        let (body, used) = match text.strip_suffix('*') {
            Some(stripped) => (stripped, true),
            None => (text, false),
        };

        let (call, ssid) = match body.split_once('-') {
            Some((call, ssid)) => (call.to_string(), Some(ssid.to_string())),
            None => (body.to_string(), None),
        };

        Self { call, ssid, used }
    }

    /// Build a used element for our own callsign (`N0CALL-10*`)
    pub fn used_by(callsign: &str) -> Self {
        let mut element = Self::parse(callsign);
        element.used = true;
        element
    }

    /// The numeric suffix, when the suffix is a number
    pub fn hops(&self) -> Option<u8> {
        self.ssid.as_deref().and_then(|s| s.parse::<u8>().ok())
    }

    /// True when the rendered element contains `*` anywhere
    pub fn has_repeat_marker(&self) -> bool {
        self.used || self.call.contains('*') || self.ssid.as_deref().is_some_and(|s| s.contains('*'))
    }

    /// Substring match against the full rendered element
    pub fn contains(&self, needle: &str) -> bool {
        self.to_string().contains(needle)
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.call)?;
        if let Some(ssid) = &self.ssid {
            write!(f, "-{}", ssid)?;
        }
        if self.used {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// A decoded packet in TNC2 form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: String,
    pub destination: String,
    pub path: Vec<PathElement>,
    pub info: String,
}

impl Frame {
    /// Parse a TNC2 line.
    ///
    /// The source ends at the first `>`, the header ends at the first `:` after
    /// it, and the header splits on its first `,` into destination and path.
    /// Anything that does not fit produces a pass-through frame carrying the
    /// whole line as `info`.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        let Some((source, rest)) = line.split_once('>') else {
            return Self::passthrough(line);
        };
        let Some((header, info)) = rest.split_once(':') else {
            return Self::passthrough(line);
        };

        let (destination, path_text) = match header.split_once(',') {
            Some((destination, path)) => (destination, Some(path)),
            None => (header, None),
        };

        if source.is_empty() || destination.is_empty() {
            return Self::passthrough(line);
        }

        let path = path_text
            .map(|text| {
                text.split(',')
                    .filter(|element| !element.is_empty())
                    .map(PathElement::parse)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            path,
            info: info.to_string(),
        }
    }

    /// Frame that could not be parsed; rendered back as the original line
    pub fn passthrough(line: &str) -> Self {
        Self {
            source: String::new(),
            destination: String::new(),
            path: Vec::new(),
            info: line.to_string(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.source.is_empty() || self.destination.is_empty()
    }

    /// `source>destination[,path]`, the part before the `:`
    pub fn header(&self) -> String {
        let mut header = format!("{}>{}", self.source, self.destination);
        for element in &self.path {
            header.push(',');
            header.push_str(&element.to_string());
        }
        header
    }

    /// Wire form with `info` supplied as raw bytes.
    /// Radio payloads are not guaranteed to be UTF-8, so the info field of a
    /// repeated frame is copied byte for byte from what was heard.
    pub fn encode_with_info(&self, info: &[u8]) -> Vec<u8> {
        let header = self.header();
        let mut out = Vec::with_capacity(header.len() + 1 + info.len());
        out.extend_from_slice(header.as_bytes());
        out.push(b':');
        out.extend_from_slice(info);
        out
    }

    /// Path rendered as strings, mostly useful for logging and assertions
    pub fn path_strings(&self) -> Vec<String> {
        self.path.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_passthrough() {
            return write!(f, "{}", self.info);
        }

        write!(f, "{}:{}", self.header(), self.info)
    }
}

/// `raw` without trailing CR/LF
pub fn trim_line_end(raw: &[u8]) -> &[u8] {
    let end = raw
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |last| last + 1);
    &raw[..end]
}

/// Info bytes of a raw TNC2 frame: everything after the first `:` that
/// follows the first `>`. `None` when the frame has no such separator.
pub fn raw_info(raw: &[u8]) -> Option<&[u8]> {
    let raw = trim_line_end(raw);
    let arrow = raw.iter().position(|&b| b == b'>')?;
    let colon = raw[arrow..].iter().position(|&b| b == b':')? + arrow;
    Some(&raw[colon + 1..])
}

/// Callsign comparison used for own-traffic checks
pub fn same_callsign(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
