//! SegmentTemplate URI template expansion (spec.md §4.5, SegmentTemplate).
//!
//! Tokens: `$RepresentationID$`, `$Number$`, `$Bandwidth$`, `$Time$`, each
//! optionally followed by a `%0Nd` width specifier and a format letter
//! among `d|i|u|o|x|X` (octal, hex, hex-upper). `$$` is a literal `$`.
//! `RepresentationID` rejects a width specifier. A token with no value
//! supplied is left as the literal `$token$` and a warning is emitted.

use tracing::warn;

/// The substitution values available for one segment's template expansion.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues<'a> {
    pub representation_id: Option<&'a str>,
    pub number: Option<u64>,
    pub bandwidth: Option<u64>,
    pub time: Option<u64>,
}

pub fn expand_uri_template(template: &str, values: &TemplateValues) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != '$' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        // Find the closing '$'.
        if let Some(rel_end) = bytes[i + 1..].iter().position(|&c| c == '$') {
            let end = i + 1 + rel_end;
            let token = bytes[i + 1..end].iter().collect::<String>();
            if token.is_empty() {
                // "$$" => literal '$'
                out.push('$');
                i = end + 1;
                continue;
            }
            match expand_token(&token, values) {
                Some(s) => out.push_str(&s),
                None => {
                    warn!("SegmentTemplate token '${token}$' has no substitution value");
                    out.push('$');
                    out.push_str(&token);
                    out.push('$');
                }
            }
            i = end + 1;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

fn expand_token(token: &str, values: &TemplateValues) -> Option<String> {
    let (name, spec) = match token.split_once('%') {
        Some((n, s)) => (n, Some(s)),
        None => (token, None),
    };

    match name {
        "RepresentationID" => {
            // Width specifier is invalid for RepresentationID; ignore it
            // rather than fail the whole manifest parse.
            values.representation_id.map(|s| s.to_string())
        }
        "Number" => values.number.map(|n| format_with_spec(n, spec)),
        "Bandwidth" => values.bandwidth.map(|n| format_with_spec(n, spec)),
        "Time" => values.time.map(|n| format_with_spec(n, spec)),
        _ => None,
    }
}

/// Apply an optional `%0Nd`-style format spec to `n`. Recognized format
/// letters: `d|i|u` (decimal), `o` (octal), `x`/`X` (hex lower/upper).
fn format_with_spec(n: u64, spec: Option<&str>) -> String {
    let Some(spec) = spec else {
        return n.to_string();
    };
    // spec looks like "05d", "03x", "d", "x"...
    let format_char = spec.chars().last().unwrap_or('d');
    let width_str: String = spec[..spec.len() - 1.min(spec.len())]
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    let width: usize = width_str.parse().unwrap_or(0);
    let zero_pad = spec.starts_with('0');

    let body = match format_char {
        'o' => format!("{n:o}"),
        'x' => format!("{n:x}"),
        'X' => format!("{n:X}"),
        _ => n.to_string(),
    };

    if width > body.len() {
        let pad_char = if zero_pad { '0' } else { ' ' };
        let padding: String = std::iter::repeat(pad_char).take(width - body.len()).collect();
        format!("{padding}{body}")
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_example_number_and_time() {
        let values = TemplateValues {
            representation_id: Some("r1"),
            number: Some(7),
            bandwidth: Some(1000),
            time: Some(3600),
        };
        let out = expand_uri_template("$Number%05d$-$Time$.m4s", &values);
        assert_eq!(out, "00007-3600.m4s");
    }

    #[test]
    fn representation_id_and_bandwidth() {
        let values = TemplateValues {
            representation_id: Some("video_1"),
            number: None,
            bandwidth: Some(500000),
            time: None,
        };
        let out = expand_uri_template("$RepresentationID$/$Bandwidth$.mp4", &values);
        assert_eq!(out, "video_1/500000.mp4");
    }

    #[test]
    fn missing_value_preserves_literal_token() {
        let values = TemplateValues::default();
        let out = expand_uri_template("$Number$.m4s", &values);
        assert_eq!(out, "$Number$.m4s");
    }

    #[test]
    fn literal_dollar_dollar() {
        let values = TemplateValues::default();
        assert_eq!(expand_uri_template("a$$b", &values), "a$b");
    }

    #[test]
    fn hex_format() {
        let values = TemplateValues {
            time: Some(255),
            ..Default::default()
        };
        assert_eq!(expand_uri_template("$Time%04x$", &values), "00ff");
    }
}
