use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// A parsed request head plus whatever body bytes were already read past
/// the header terminator. Headers are kept in raw wire order, including
/// duplicates, per the design notes: the upgrade bridge reconstructs its
/// preamble from this, not from a normalized map.
#[derive(Debug, Clone)]
pub struct ParsedHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub leftover: Vec<u8>,
}

impl ParsedHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_upgrade(&self) -> bool {
        let connection_has_upgrade = self
            .header("connection")
            .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false);
        self.header("upgrade").is_some() && connection_has_upgrade
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }
}

/// httparse is hyper's own header-parsing dependency; using it directly on
/// the raw bytes off the public listener (rather than going through a
/// higher-level server) is what lets the raw upgrade bridge reconstruct a
/// byte-identical preamble, since nothing normalizes header casing/order
/// first.
pub async fn read_head(stream: &mut TcpStream) -> std::io::Result<ParsedHead> {
    const MAX_HEAD_BYTES: usize = 16 * 1024;
    let mut buf = Vec::with_capacity(1024);
    let mut scratch = [0u8; 1024];

    loop {
        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(offset)) => {
                let method = req.method.unwrap_or("GET").to_string();
                let path = req.path.unwrap_or("/").to_string();
                let version = match req.version {
                    Some(1) => "1.1".to_string(),
                    Some(0) => "1.0".to_string(),
                    _ => "1.1".to_string(),
                };
                let parsed_headers = req
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_string(),
                            String::from_utf8_lossy(h.value).to_string(),
                        )
                    })
                    .collect();
                return Ok(ParsedHead {
                    method,
                    path,
                    version,
                    headers: parsed_headers,
                    leftover: buf[offset..].to_vec(),
                });
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() >= MAX_HEAD_BYTES {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "request head too large",
                    ));
                }
                let n = stream.read(&mut scratch).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "peer closed before sending a complete request head",
                    ));
                }
                buf.extend_from_slice(&scratch[..n]);
            }
            Err(e) => {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
            }
        }
    }
}

/// Extracts the leftmost dot-separated label of `host` as the subdomain,
/// provided `host` ends with `.<apex>` (case-insensitive). A bare apex
/// host, or any host not under the apex, has no subdomain. The literal
/// spec text ("extract the leftmost dot-separated label") is silent on
/// how the apex domain itself factors in; resolved here the same way the
/// management API's own `url` construction implies (`<id>.<host>`).
pub fn extract_subdomain<'a>(host: &'a str, apex: &str) -> Option<&'a str> {
    let host = host.split(':').next().unwrap_or(host);
    let suffix = format!(".{apex}");
    if host.len() <= suffix.len() || !host.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
        return None;
    }
    let prefix = &host[..host.len() - suffix.len()];
    prefix.split('.').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_extracted_under_apex() {
        assert_eq!(extract_subdomain("abcd.example.com", "example.com"), Some("abcd"));
        assert_eq!(
            extract_subdomain("abcd.sub.example.com", "example.com"),
            Some("abcd")
        );
    }

    #[test]
    fn bare_apex_has_no_subdomain() {
        assert_eq!(extract_subdomain("example.com", "example.com"), None);
    }

    #[test]
    fn unrelated_host_has_no_subdomain() {
        assert_eq!(extract_subdomain("localhost", "example.com"), None);
        assert_eq!(extract_subdomain("other.org", "example.com"), None);
    }

    #[test]
    fn port_suffix_is_ignored() {
        assert_eq!(
            extract_subdomain("abcd.example.com:8080", "example.com"),
            Some("abcd")
        );
    }
}
