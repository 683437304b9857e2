use anyhow::{anyhow, Result};

/// Compact view of an HTTP reply. The body is retained for the anti-bot
/// template check; detection itself only reads status and the two headers.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub server: String,
    pub content_type: String,
    pub body: Vec<u8>,
    /// The URL the request was actually sent to, final redirect hop included.
    pub request_url: String,
}

impl Response {
    /// Body as text for marker checks; invalid UTF-8 is replaced, not dropped.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// A reply as read off the wire, before it is narrowed down to [`Response`].
/// Header names are stored lowercased.
#[derive(Debug)]
pub(crate) struct Parsed {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Parsed {
    pub(crate) fn parse(raw: &[u8]) -> Result<Parsed> {
        let split = find_subsequence(raw, b"\r\n\r\n")
            .ok_or_else(|| anyhow!("malformed HTTP response: no header terminator"))?;
        let head = String::from_utf8_lossy(&raw[..split]);
        let body_raw = &raw[split + 4..];

        let mut lines = head.split("\r\n");
        let status_line = lines
            .next()
            .ok_or_else(|| anyhow!("malformed HTTP response: empty head"))?;
        // "HTTP/1.1 200 OK"
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        if !version.starts_with("HTTP/") {
            return Err(anyhow!("not an HTTP response: {:?}", status_line));
        }
        let status: u16 = parts
            .next()
            .ok_or_else(|| anyhow!("malformed status line: {:?}", status_line))?
            .parse()
            .map_err(|_| anyhow!("malformed status code in {:?}", status_line))?;

        let mut headers = Vec::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        let parsed = Parsed {
            status,
            headers,
            body: Vec::new(),
        };
        let body = if parsed
            .header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
        {
            decode_chunked(body_raw)
        } else if let Some(len) = parsed
            .header("content-length")
            .and_then(|v| v.parse::<usize>().ok())
        {
            body_raw[..len.min(body_raw.len())].to_vec()
        } else {
            body_raw.to_vec()
        };

        Ok(Parsed { body, ..parsed })
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn into_response(self, request_url: String) -> Response {
        let server = self.header("server").unwrap_or("").to_string();
        let content_type = self.header("content-type").unwrap_or("").to_string();
        Response {
            status: self.status,
            server,
            content_type,
            body: self.body,
            request_url,
        }
    }
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_chunked(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = raw;
    loop {
        let Some(pos) = find_subsequence(rest, b"\r\n") else {
            break;
        };
        let size_line = String::from_utf8_lossy(&rest[..pos]);
        let size = size_line
            .trim()
            .split(';')
            .next()
            .and_then(|s| usize::from_str_radix(s, 16).ok())
            .unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = pos + 2;
        if rest.len() < start + size {
            out.extend_from_slice(&rest[start..]);
            break;
        }
        out.extend_from_slice(&rest[start..start + size]);
        let next = (start + size + 2).min(rest.len());
        rest = &rest[next..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_response() {
        let raw = b"HTTP/1.1 403 Forbidden\r\nServer: nginx\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}";
        let parsed = Parsed::parse(raw).unwrap();
        assert_eq!(parsed.status, 403);
        assert_eq!(parsed.header("Server"), Some("nginx"));
        let resp = parsed.into_response("http://a.test/x/".to_string());
        assert_eq!(resp.server, "nginx");
        assert_eq!(resp.content_type, "application/json");
        assert_eq!(resp.body, b"{}");
        assert_eq!(resp.request_url, "http://a.test/x/");
    }

    #[test]
    fn test_parse_missing_headers_yields_empty_strings() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\nhello";
        let resp = Parsed::parse(raw).unwrap().into_response(String::new());
        assert_eq!(resp.status, 200);
        assert_eq!(resp.server, "");
        assert_eq!(resp.content_type, "");
        assert_eq!(resp.body, b"hello");
    }

    #[test]
    fn test_parse_chunked_body() {
        let raw =
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let resp = Parsed::parse(raw).unwrap().into_response(String::new());
        assert_eq!(resp.body, b"hello world");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Parsed::parse(b"not http at all\r\n\r\n").is_err());
        assert!(Parsed::parse(b"HTTP/1.1 200 OK").is_err());
    }
}
