use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::TrackerError;
use crate::parser::{self, Action, ParseOutcome, Request};
use crate::state::ids::percent_decode_20;
use crate::tracker::{Status, Tracker};
use crate::{announce, control, scrape};

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REQUEST_BYTES: usize = 8 * 1024;
const ROBOTS_TXT_BODY: &[u8] = b"User-agent: *\nDisallow: /\n";

/// Binds the listen address and accepts connections until the process is
/// asked to shut down. Each connection is handled on its own task and
/// closed after a single request/response, matching the original's
/// one-shot-per-connection announce/scrape/update model.
pub async fn serve(tracker: Arc<Tracker>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&tracker.config.listen_addr).await?;
    tracing::info!("Listening on {}", tracker.config.listen_addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let tracker = tracker.clone();
        tokio::spawn(async move {
            if let Err(error) = handle_connection(stream, &tracker).await {
                tracing::debug!("Connection error: {error}");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, tracker: &Tracker) -> anyhow::Result<()> {
    let peer_ip = stream.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default();

    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let read = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut chunk)).await??;
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);

        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let body = dispatch(tracker, &buf, &peer_ip);
    let response = wrap_http(&body);
    stream.write_all(&response).await?;
    Ok(())
}

fn dispatch(tracker: &Tracker, buf: &[u8], peer_ip: &str) -> Vec<u8> {
    let request = match parser::parse(buf) {
        Ok(ParseOutcome::RobotsTxt) => return ROBOTS_TXT_BODY.to_vec(),
        Ok(ParseOutcome::Request(request)) => request,
        Err(error) => return error.to_bencoded(),
    };

    if tracker.status() != Status::Open && request.action != Action::Update {
        return TrackerError::TrackerUnavailable.to_bencoded();
    }

    match run_action(tracker, &request, peer_ip) {
        Ok(body) => body,
        Err(error) => error.to_bencoded(),
    }
}

fn run_action(tracker: &Tracker, request: &Request, peer_ip: &str) -> Result<Vec<u8>, TrackerError> {
    match request.action {
        Action::Update => control::update(tracker, &request.passkey, &request.params),
        Action::Scrape => {
            {
                let users = tracker.state.users.read();
                users
                    .get(&request.passkey)
                    .ok_or(TrackerError::PasskeyNotFound)?;
            }

            let mut hashes = Vec::with_capacity(request.scrape_info_hashes.len());
            for raw in &request.scrape_info_hashes {
                hashes.push(percent_decode_20(raw.as_bytes())?);
            }
            Ok(scrape::scrape(&tracker.state, &hashes))
        }
        Action::Announce => {
            let user = {
                let users = tracker.state.users.read();
                users
                    .get(&request.passkey)
                    .cloned()
                    .ok_or(TrackerError::PasskeyNotFound)?
            };

            let info_hash_raw = request
                .params
                .get("info_hash")
                .ok_or(TrackerError::InvalidInfoHashOrPeerId)?;
            let info_hash = percent_decode_20(info_hash_raw.as_bytes())?;

            let client_ip = request
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .unwrap_or(peer_ip)
                .to_string();

            let mut torrents = tracker.state.torrents.lock();
            let torrent = torrents
                .get_mut(&crate::state::InfoHash(info_hash))
                .ok_or(TrackerError::TorrentNotFound)?;

            announce::announce(tracker, torrent, &user, &request.params, &request.headers, &client_ip)
        }
    }
}

fn wrap_http(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + body.len());
    out.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
    out.extend_from_slice(b"Content-Type: text/plain\r\n");
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::Config;
    use crate::state::State;

    fn test_config() -> Config {
        Config {
            listen_addr: "127.0.0.1:0".to_string(),
            database_url: "mysql://localhost/test".to_string(),
            site_password: "secret".to_string(),
            peers_timeout: 3_600,
            reap_interval: 1_800,
            flush_interval: 3,
            numwant_default: 50,
            numwant_max: 50,
            announce_interval: 1_800,
            keep_speed: 1_024,
            max_bytes_transferred: 999_999_999_999_999,
        }
    }

    #[test]
    fn scrape_rejects_an_unknown_passkey() {
        let tracker = Tracker::for_tests(State::new(), test_config());
        let request = Request {
            passkey: "not-a-registered-passkey".to_string(),
            action: Action::Scrape,
            params: HashMap::new(),
            scrape_info_hashes: Vec::new(),
            headers: HashMap::new(),
        };

        let err = run_action(&tracker, &request, "127.0.0.1").unwrap_err();
        assert_eq!(err, TrackerError::PasskeyNotFound);
    }
}
