//! Incremental parser and validator for the HTTP/1.1 upgrade handshake
//! (RFC 6455 Section 4), plus the `Sec-WebSocket-Accept` derivation.
//!
//! The parser consumes a small subset of HTTP/1.1 request syntax directly
//! from the connection's read buffer. It never consumes anything until the
//! terminating blank line is buffered, so feeding a request in arbitrary
//! byte-wise slices parses identically to feeding it whole, and it never
//! reads past the blank line: bytes after it (early frames from an eager
//! client) are left in the buffer for the frame decoder.

use std::collections::HashMap;

use base64::prelude::*;
use bytes::BytesMut;
use sha1::{Digest, Sha1};

use crate::WsError;

/// RFC 6455 GUID appended to the client key for the accept derivation.
const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Ceiling on the size of a request head. A buffer that grows past this
/// without a terminating blank line fails with [`WsError::HandshakeTooLarge`].
pub const MAX_HANDSHAKE_SIZE: usize = 16 * 1024;

/// Computes the `Sec-WebSocket-Accept` value:
/// `base64(SHA1(client_key ∥ GUID))`.
///
/// The client key is hashed verbatim as an opaque ASCII token; RFC 6455
/// never base64-decodes it.
///
/// ```
/// assert_eq!(
///     sockeye::handshake::accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=",
/// );
/// ```
pub fn accept_key(client_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(client_key.as_bytes());
    sha1.update(WS_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Renders the `101 Switching Protocols` response for an accepted upgrade.
pub fn accept_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(client_key)
    )
}

/// Renders the canned reject response for a handshake error: `404 Not
/// Found` for a bad request-target, `400 Bad Request` for everything else.
pub fn reject_response(err: &WsError) -> &'static str {
    match err {
        WsError::InvalidPath => "HTTP/1.1 404 Not Found\r\n\r\n",
        _ => "HTTP/1.1 400 Bad Request\r\n\r\n",
    }
}

/// A parsed upgrade request: the request-target plus a case-insensitive
/// header map.
///
/// Header names are lowercased at parse time; each value is trimmed, then
/// comma-split into an ordered list with every element trimmed (so
/// `Connection: keep-alive, Upgrade` matches the `Upgrade` token). Repeated
/// headers append to the existing list in arrival order. Value casing is
/// preserved for passthrough; matching is done case-insensitively via
/// [`header_contains`](Self::header_contains).
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    target: String,
    headers: HashMap<String, Vec<String>>,
}

impl UpgradeRequest {
    /// Attempts to parse a complete request head from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the terminating blank line has not arrived
    /// (consuming nothing). On success, consumes exactly through the blank
    /// line and leaves any trailing bytes in `buf`.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Self>, WsError> {
        let Some(head_end) = memchr::memmem::find(buf, b"\r\n\r\n") else {
            if buf.len() > MAX_HANDSHAKE_SIZE {
                return Err(WsError::HandshakeTooLarge);
            }
            return Ok(None);
        };

        let head = buf.split_to(head_end + 4);
        let head =
            std::str::from_utf8(&head[..head_end]).map_err(|_| WsError::InvalidHeaderSyntax)?;

        let mut lines = head.split("\r\n");
        let target = parse_request_line(lines.next().unwrap_or_default())?;

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for line in lines {
            let (name, value) = line.split_once(':').ok_or(WsError::InvalidHeaderSyntax)?;
            headers
                .entry(name.trim().to_ascii_lowercase())
                .or_default()
                .extend(value.split(',').map(|v| v.trim().to_string()));
        }

        Ok(Some(Self { target, headers }))
    }

    /// Checks the requirements of RFC 6455 §4.2.1, in a deterministic order:
    /// `Upgrade` contains `websocket`, `Connection` contains `upgrade` (both
    /// case-insensitive, matching any list element), `Sec-WebSocket-Key` is
    /// a non-empty token, `Sec-WebSocket-Version` is exactly `13`, and the
    /// remaining required headers (`Host`) are present.
    pub fn validate(&self) -> Result<(), WsError> {
        if !self.header_contains("upgrade", "websocket") {
            return Err(WsError::InvalidUpgradeHeader);
        }
        if !self.header_contains("connection", "upgrade") {
            return Err(WsError::InvalidConnectionHeader);
        }
        if self.sec_websocket_key().is_none() {
            return Err(WsError::MissingSecWebSocketKey);
        }
        match self.header("sec-websocket-version") {
            Some([version]) if version == "13" => {}
            _ => return Err(WsError::InvalidSecWebSocketVersion),
        }
        if self.header("host").is_none() {
            return Err(WsError::MissingRequiredHeader("host"));
        }
        Ok(())
    }

    /// Returns the raw request-target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the request path, the target up to the query string.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// Returns the decoded query parameters in request order.
    pub fn query(&self) -> Vec<(String, String)> {
        match self.target.split_once('?') {
            Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns the value list of a header by lowercase name.
    pub fn header(&self, name: &str) -> Option<&[String]> {
        self.headers.get(name).map(Vec::as_slice)
    }

    /// Returns `true` if any element of the named header equals `token`
    /// case-insensitively.
    pub fn header_contains(&self, name: &str, token: &str) -> bool {
        self.headers
            .get(name)
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(token)))
    }

    /// Returns the client's `Sec-WebSocket-Key` when present and non-empty.
    pub fn sec_websocket_key(&self) -> Option<&str> {
        self.headers
            .get("sec-websocket-key")
            .and_then(|values| values.first())
            .map(String::as_str)
            .filter(|key| !key.is_empty())
    }
}

fn parse_request_line(line: &str) -> Result<String, WsError> {
    let mut parts = line.splitn(3, ' ');
    if parts.next().unwrap_or_default() != "GET" {
        return Err(WsError::InvalidMethod);
    }
    let target = parts.next().ok_or(WsError::InvalidPath)?;
    if !target.starts_with('/') {
        return Err(WsError::InvalidPath);
    }
    match parts.next() {
        Some("HTTP/1.1") => Ok(target.to_string()),
        _ => Err(WsError::InvalidHttpVersion),
    }
}
