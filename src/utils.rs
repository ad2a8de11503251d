use url::Url;

use crate::error::{Result, SyncError};

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Socket.IO websocket endpoint for a server root.
pub fn socket_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(&normalize_url(base_url))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(SyncError::Config(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::Config(format!("cannot use {scheme} for {base_url}")))?;
    let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}
