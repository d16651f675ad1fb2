//! Parser for `Bearer` authentication challenges (RFC 6750 §3).

/// Parameters extracted from a `Bearer` challenge.
///
/// Only `issuer`, `realm` and `scope` are kept; anything else is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    /// `issuer` parameter.
    pub issuer: Option<String>,
    /// `realm` parameter.
    pub realm: Option<String>,
    /// `scope` parameter.
    pub scope: Option<String>,
}

/// Parses a `WWW-Authenticate` header value.
///
/// The scheme must be `Bearer` (any case) and every parameter must have the
/// form `key="value"`, separated by commas and/or whitespace. Any other
/// scheme or a malformed parameter list yields `None`.
#[must_use]
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let header = header.trim();
    let (scheme, rest) = header
        .split_once(|c: char| c.is_ascii_whitespace())
        .unwrap_or((header, ""));

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut challenge = BearerChallenge::default();
    let mut input = rest;

    loop {
        input = input.trim_start_matches(|c: char| c == ',' || c.is_ascii_whitespace());
        if input.is_empty() {
            return Some(challenge);
        }

        let (key, after_key) = input.split_once('=')?;
        let key = key.trim();
        if key.is_empty() || key.contains(|c: char| c.is_ascii_whitespace() || c == ',') {
            return None;
        }

        let (value, remainder) = quoted_value(after_key.trim_start())?;
        input = remainder;

        let slot = match key.to_ascii_lowercase().as_str() {
            "issuer" => &mut challenge.issuer,
            "realm" => &mut challenge.realm,
            "scope" => &mut challenge.scope,
            _ => continue,
        };
        slot.get_or_insert(value);
    }
}

/// Reads a quoted string from the start of `input`, handling `\` escapes.
/// Returns the unescaped value and the text after the closing quote.
fn quoted_value(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('"')?;
    let mut value = String::new();
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => value.push(chars.next()?.1),
            '"' => return Some((value, &body[idx + 1..])),
            _ => value.push(c),
        }
    }

    None
}
