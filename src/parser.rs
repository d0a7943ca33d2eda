use std::collections::HashMap;

use crate::error::TrackerError;

/// Minimum request length below which the grammar below cannot possibly
/// address valid passkey/action bytes.
const MIN_REQUEST_LEN: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Announce,
    Scrape,
    Update,
}

/// A parsed `GET /<passkey>/<action>?<params> HTTP/1.x` request.
pub struct Request {
    pub passkey: String,
    pub action: Action,
    pub params: HashMap<String, String>,
    pub scrape_info_hashes: Vec<String>,
    pub headers: HashMap<String, String>,
}

/// Either a real request, or the bare robots.txt probe, which short-circuits
/// before any passkey/action parsing.
pub enum ParseOutcome {
    Request(Request),
    RobotsTxt,
}

/// Parses a raw HTTP/1.x request line + headers byte-for-byte, following the
/// original's substr-free, index-walking grammar: a too-short buffer, a
/// missing `/` at byte 37 (robots.txt vs malformed), single-character action
/// dispatch with fixed skip offsets, then `key=value&...` query parsing and
/// lowercase `key: value` header parsing.
pub fn parse(input: &[u8]) -> Result<ParseOutcome, TrackerError> {
    let len = input.len();
    if len < MIN_REQUEST_LEN {
        return Err(TrackerError::RequestTooShort);
    }

    if input[37] != b'/' {
        if input[11] == b'.' {
            return Ok(ParseOutcome::RobotsTxt);
        }
        return Err(TrackerError::MalformedRequest);
    }

    let passkey = String::from_utf8_lossy(&input[5..37]).into_owned();

    let mut pos = 38;
    let (action, skip) = match input.get(pos) {
        Some(b'a') => (Action::Announce, 9),
        Some(b's') => (Action::Scrape, 7),
        Some(b'u') => (Action::Update, 7),
        _ => return Err(TrackerError::InvalidAction),
    };
    pos += skip;

    let mut params: HashMap<String, String> = HashMap::new();
    let mut scrape_info_hashes = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut parsing_key = true;

    while pos < len {
        match input[pos] {
            b'=' => parsing_key = false,
            b'&' | b' ' => {
                parsing_key = true;
                if action == Action::Scrape && key == "info_hash" {
                    scrape_info_hashes.push(std::mem::take(&mut value));
                } else {
                    params.insert(std::mem::take(&mut key), std::mem::take(&mut value));
                }
                key.clear();
                value.clear();
                if input[pos] == b' ' {
                    pos += 1;
                    break;
                }
            }
            byte => {
                if parsing_key {
                    key.push(byte as char);
                } else {
                    value.push(byte as char);
                }
            }
        }
        pos += 1;
    }

    // Skip "HTTP/1.1\r\n" (or similar) before the headers start.
    pos += 10;

    let mut headers: HashMap<String, String> = HashMap::new();
    let mut parsing_key = true;
    let mut found_data = false;
    key.clear();
    value.clear();

    while pos < len {
        match input[pos] {
            b':' => {
                parsing_key = false;
                pos += 1; // skip the space after ':'
            }
            b'\n' | b'\r' => {
                parsing_key = true;
                if found_data {
                    found_data = false;
                    headers.insert(key.to_lowercase(), std::mem::take(&mut value));
                    key.clear();
                }
            }
            byte => {
                found_data = true;
                if parsing_key {
                    key.push(byte as char);
                } else {
                    value.push(byte as char);
                }
            }
        }
        pos += 1;
    }

    Ok(ParseOutcome::Request(Request {
        passkey,
        action,
        params,
        scrape_info_hashes,
        headers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(s: &str) -> String {
        // Pad short fixtures out past MIN_REQUEST_LEN with query filler.
        let mut s = s.to_string();
        while s.len() < MIN_REQUEST_LEN {
            s.push('x');
        }
        s
    }

    #[test]
    fn rejects_too_short_requests() {
        let req = b"GET /short HTTP/1.1\r\n\r\n";
        assert_eq!(parse(req), Err(TrackerError::RequestTooShort));
    }

    #[test]
    fn recognizes_robots_txt() {
        let passkey = "x".repeat(32);
        let raw = pad(&format!("GET /{passkey}robots.txt HTTP/1.1\r\n\r\n"));
        match parse(raw.as_bytes()).unwrap() {
            ParseOutcome::RobotsTxt => {}
            _ => panic!("expected robots.txt outcome"),
        }
    }

    #[test]
    fn parses_announce_query_params() {
        let passkey = "a".repeat(32);
        let raw = pad(&format!(
            "GET /{passkey}/announce?info_hash=AB&peer_id=CD&port=6881&left=0 HTTP/1.1\r\nUser-Agent: Test\r\n\r\n"
        ));
        let req = match parse(raw.as_bytes()).unwrap() {
            ParseOutcome::Request(r) => r,
            _ => panic!("expected a request"),
        };
        assert_eq!(req.passkey, passkey);
        assert_eq!(req.action, Action::Announce);
        assert_eq!(req.params.get("info_hash").unwrap(), "AB");
        assert_eq!(req.params.get("port").unwrap(), "6881");
        assert_eq!(req.headers.get("user-agent").unwrap(), "Test");
    }

    #[test]
    fn parses_scrape_multiple_info_hashes() {
        let passkey = "b".repeat(32);
        let raw = pad(&format!(
            "GET /{passkey}/scrape?info_hash=AA&info_hash=BB HTTP/1.1\r\n\r\n"
        ));
        let req = match parse(raw.as_bytes()).unwrap() {
            ParseOutcome::Request(r) => r,
            _ => panic!("expected a request"),
        };
        assert_eq!(req.action, Action::Scrape);
        assert_eq!(req.scrape_info_hashes, vec!["AA".to_string(), "BB".to_string()]);
    }

    #[test]
    fn rejects_invalid_action_byte() {
        let passkey = "c".repeat(32);
        let raw = pad(&format!("GET /{passkey}/zzzzzzzzz?x=1 HTTP/1.1\r\n\r\n"));
        assert_eq!(parse(raw.as_bytes()), Err(TrackerError::InvalidAction));
    }
}
