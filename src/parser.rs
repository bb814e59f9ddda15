// src/parser.rs

use tracing::{debug, info, warn};

use crate::types::SessionParameters;

const SEPARATOR: &str = " = ";

/// What a single line of the session start response turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponseLine<'a> {
    Markup,
    Blank,
    Malformed,
    Field { key: &'a str, value: &'a str },
}

pub fn classify_line(line: &str) -> ResponseLine<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ResponseLine::Blank;
    }
    // `}<` shows up where script blocks are glued to closing tags
    if line.starts_with('<') || line.starts_with("}<") {
        return ResponseLine::Markup;
    }
    match line.split_once(SEPARATOR) {
        Some((key, value)) => ResponseLine::Field { key, value },
        None => ResponseLine::Malformed,
    }
}

/// Extracts tunnel parameters from the HTML-wrapped `Key = Value` listing
/// returned by `/cgi-bin/sslvpnclient`.
///
/// Unknown keys are kept in `srv_options` so newer gateways don't break us.
/// The first occurrence of a key wins.
pub fn parse_session_response<I, S>(lines: I) -> SessionParameters
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut params = SessionParameters::default();

    for line in lines {
        let line = line.as_ref();
        let (key, value) = match classify_line(line) {
            ResponseLine::Field { key, value } => (key, value),
            ResponseLine::Malformed => {
                warn!("Unexpected line in session start message: '{}'", line.trim());
                continue;
            }
            ResponseLine::Markup | ResponseLine::Blank => continue,
        };

        match key {
            "Route" => params.routes.push(value.to_string()),
            "dns1" | "dns2" => params.nameservers.push(value.to_string()),
            "dnsSuffixes" => params.search_suffixes.push(value.to_string()),
            _ if params.srv_options.contains_key(key) => {
                info!("Duplicated srv_options value {} = {}", key, value);
                continue;
            }
            _ => {
                params.srv_options.insert(key.to_string(), value.to_string());
            }
        }

        debug!("srv_option '{}' = '{}'", key, value);
    }

    params
}
