//! Header block parsing and header key normalization.
//!
//! Every message handed to a consumer carries normalized keys (see
//! [`capitalize`]), whatever casing the switch used on the wire.

use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use std::io;

/// Normalize a header key to the canonical ESL casing.
///
/// - keys starting with `_` are returned unchanged;
/// - channel variables (`?ariable_*`, the first letter in any case) become
///   `Variable_` followed by the lowercased remainder;
/// - everything else is lowercased, then the first letter and every letter
///   following a `-` or `_` is uppercased.
///
/// ```
/// use freeswitch_esl_socket::headers::capitalize;
///
/// assert_eq!(capitalize("job-uuid"), "Job-Uuid");
/// assert_eq!(capitalize("Caller-Caller-ID-Number"), "Caller-Caller-Id-Number");
/// assert_eq!(capitalize("variable_Sip_From_User"), "Variable_sip_from_user");
/// assert_eq!(capitalize("_body"), "_body");
/// ```
pub fn capitalize(key: &str) -> String {
    if key.is_empty() || key.starts_with('_') {
        return key.to_string();
    }

    if key.len() > 9 && key.get(1..9) == Some("ariable_") {
        if let Some(rest) = key.get(1..) {
            return format!("V{}", rest.to_lowercase());
        }
    }

    let mut to_upper = true;
    key.to_lowercase()
        .chars()
        .map(|c| {
            if to_upper {
                to_upper = false;
                c.to_ascii_uppercase()
            } else {
                if c == '-' || c == '_' {
                    to_upper = true;
                }
                c
            }
        })
        .collect()
}

/// Decode an escaped header value with query-unescape rules (`+` is a
/// space, `%XX` is a byte). Values with malformed escapes, or that do not
/// decode to UTF-8, are returned as received.
pub fn unescape_value(raw: &str) -> String {
    if !has_valid_escapes(raw) {
        return raw.to_string();
    }
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn has_valid_escapes(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

/// One header block as read from the wire, keys as sent by the peer.
///
/// Lookups through [`HeaderBlock::get`] ignore ASCII case; when a key is
/// repeated the first value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    headers: IndexMap<String, String>,
}

impl HeaderBlock {
    /// Parse `Key: value` lines. Accepts `\n` or `\r\n` line endings and
    /// continuation lines starting with a space or tab.
    pub fn parse(raw: &str) -> io::Result<Self> {
        let mut headers: IndexMap<String, String> = IndexMap::new();
        let mut last_key: Option<String> = None;

        for line in raw.split('\n') {
            let line = line
                .strip_suffix('\r')
                .unwrap_or(line);
            if line.is_empty() {
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                match last_key
                    .as_ref()
                    .and_then(|k| headers.get_mut(k))
                {
                    Some(value) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None if last_key.is_some() => {}
                    None => return Err(malformed(line)),
                }
                continue;
            }

            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| malformed(line))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(malformed(line));
            }

            if headers.contains_key(key) {
                // Continuations of a duplicate are dropped with it.
                last_key = Some(String::new());
            } else {
                headers.insert(key.to_string(), value.trim().to_string());
                last_key = Some(key.to_string());
            }
        }

        Ok(Self { headers })
    }

    /// Case-insensitive lookup of a raw header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.headers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers
            .is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy into a map keyed by normalized header names, optionally
    /// unescaping the values.
    pub fn normalized(&self, unescape: bool) -> IndexMap<String, String> {
        let mut out = IndexMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            let value = if unescape {
                unescape_value(value)
            } else {
                value.clone()
            };
            out.entry(capitalize(key))
                .or_insert(value);
        }
        out
    }
}

fn malformed(line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed header line: {:?}", line),
    )
}
