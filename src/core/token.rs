//! Scraping helpers for the portal's HTML pages.

use regex::Regex;
use std::sync::OnceLock;

fn inline_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"csrf_token(.*)").expect("valid regex"))
}

fn escaped_json_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"csrfToken\\u0022\\u003A\\u0022([^,]+)\\u0022,\\u0022").expect("valid regex")
    })
}

fn counter_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"exporter-consommation/month/([0-9]+)").expect("valid regex"))
}

/// Older portal pages print the token inline; the rest of the line is the token.
pub fn token_from_inline(content: &str) -> Option<String> {
    match inline_token_re().captures(content) {
        Some(caps) => {
            tracing::info!("Found CSRF token in inline form");
            Some(caps[1].to_string())
        }
        None => {
            tracing::info!("Cannot get token from inline form");
            None
        }
    }
}

/// Newer pages embed it in an escaped JSON blob handed to the frontend.
pub fn token_from_escaped_json(content: &str) -> Option<String> {
    match escaped_json_token_re().captures(content) {
        Some(caps) => {
            tracing::info!("Found CSRF token in escaped JSON");
            Some(decode_unicode_escapes(&caps[1]))
        }
        None => {
            tracing::info!("Cannot get token from escaped JSON");
            None
        }
    }
}

pub fn extract_token(content: &str) -> Option<String> {
    token_from_inline(content).or_else(|| token_from_escaped_json(content))
}

pub fn extract_counter_id(content: &str) -> Option<String> {
    counter_id_re()
        .captures(content)
        .map(|caps| caps[1].to_string())
}

/// Decodes `\uXXXX`, `\xXX` and single-character backslash escapes.
/// Unknown or truncated escapes are kept verbatim.
pub fn decode_unicode_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('u') | Some('x') => {
                let marker = chars.next().unwrap_or('u');
                let width = if marker == 'u' { 4 } else { 2 };
                let digits: String = chars.clone().take(width).collect();
                let decoded = (digits.len() == width)
                    .then(|| u32::from_str_radix(&digits, 16).ok())
                    .flatten()
                    .and_then(char::from_u32);
                match decoded {
                    Some(ch) => {
                        out.push(ch);
                        for _ in 0..width {
                            chars.next();
                        }
                    }
                    None => {
                        out.push('\\');
                        out.push(marker);
                    }
                }
            }
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some(esc @ ('\\' | '"' | '\'')) => {
                chars.next();
                out.push(esc);
            }
            _ => out.push('\\'),
        }
    }

    out
}
