//! Minimal request parsing for `--dir` static-file mode.
//!
//! HTTP parsing lives entirely in this binary — `ring-core`/
//! `ring-runtime` know nothing about this module. It exists only so the
//! binary can demonstrate the splice-based file transfer against
//! something resembling a real request.

/// Extract the path from a `GET <path> HTTP/1.x\r\n...\r\n\r\n` request
/// once the full header block has arrived. Returns `None` if the header
/// terminator hasn't been seen yet (caller should keep receiving).
pub fn parse_request_path(buf: &[u8]) -> Option<&[u8]> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")?;

    if buf.len() < 5 || &buf[..4] != b"GET " {
        return Some(b"/");
    }
    let path_start = 4;
    let path_end = buf[path_start..].iter().position(|&b| b == b' ').map(|p| path_start + p)?;
    Some(&buf[path_start..path_end])
}

pub fn guess_content_type(path: &str) -> &'static str {
    if path.ends_with(".html") || path.ends_with(".htm") {
        "text/html"
    } else if path.ends_with(".css") {
        "text/css"
    } else if path.ends_with(".js") {
        "application/javascript"
    } else if path.ends_with(".json") {
        "application/json"
    } else if path.ends_with(".svg") {
        "image/svg+xml"
    } else if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}

pub fn response_header(status: &str, content_type: &str, content_length: u64) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {content_length}\r\n\
         Connection: close\r\n\
         Server: ring-httpd\r\n\
         \r\n"
    )
    .into_bytes()
}

/// Resolve a request path against `root`, rejecting `..` traversal —
/// a request-shaped failure, answered with 404, not a fatal condition.
pub fn resolve_path(root: &std::path::Path, requested: &[u8]) -> Option<std::path::PathBuf> {
    let requested = std::str::from_utf8(requested).ok()?;
    if requested.contains("..") {
        return None;
    }
    let requested = if requested == "/" { "/index.html" } else { requested };
    Some(root.join(requested.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_path_out_of_a_get_line() {
        let req = b"GET /style.css HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(parse_request_path(req), Some(&b"/style.css"[..]));
    }

    #[test]
    fn returns_none_until_headers_are_complete() {
        let req = b"GET /style.css HTTP/1.1\r\nHost: x";
        assert_eq!(parse_request_path(req), None);
    }

    #[test]
    fn rejects_parent_traversal() {
        let root = std::path::Path::new("/srv/www");
        assert!(resolve_path(root, b"/../etc/passwd").is_none());
    }

    #[test]
    fn root_request_maps_to_index_html() {
        let root = std::path::Path::new("/srv/www");
        assert_eq!(resolve_path(root, b"/"), Some(std::path::PathBuf::from("/srv/www/index.html")));
    }

    #[test]
    fn content_type_guess_falls_back_to_octet_stream() {
        assert_eq!(guess_content_type("file.css"), "text/css");
        assert_eq!(guess_content_type("file.bin"), "application/octet-stream");
    }
}
