//! Raw-socket request executor
//!
//! Traversal tokens must reach the wire exactly as cataloged. General-purpose
//! clients normalize dot segments and rewrite backslashes before sending, so
//! the request line is assembled by hand here and written to a plain or
//! TLS-wrapped TCP stream.

use crate::core::options::Options;
use crate::http::response::{find_subsequence, Parsed, Response};
use anyhow::{anyhow, bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsConnector;
use url::Url;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/78.0";
const MAX_REDIRECTS: usize = 10;
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

enum RawStream {
    Plain(TcpStream),
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

impl RawStream {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            RawStream::Plain(s) => s.write_all(buf).await,
            RawStream::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            RawStream::Plain(s) => s.flush().await,
            RawStream::Tls(s) => s.flush().await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            RawStream::Plain(s) => s.read(buf).await,
            RawStream::Tls(s) => s.read(buf).await,
        }
    }
}

pub struct RawClient {
    method: String,
    user_agent: String,
    headers: Vec<(String, String)>,
    cookies: String,
    timeout: Duration,
    insecure: bool,
    proxy: Option<Url>,
    follow_redirects: AtomicBool,
    delay: AtomicBool,
}

impl RawClient {
    pub fn new(opts: &Options) -> Result<Self> {
        let proxy = if opts.proxy {
            if opts.proxy_url.is_empty() {
                bail!("--proxy requires --proxy-url");
            }
            Some(Url::parse(&opts.proxy_url).context("invalid proxy URL")?)
        } else {
            None
        };

        let method = if opts.method.is_empty() {
            "GET".to_string()
        } else {
            opts.method.clone()
        };

        Ok(Self {
            method,
            user_agent: opts.user_agent.clone(),
            headers: opts.headers.clone(),
            cookies: opts.cookies.clone(),
            timeout: opts.timeout,
            insecure: opts.insecure,
            proxy,
            follow_redirects: AtomicBool::new(opts.follow_redirects),
            delay: AtomicBool::new(false),
        })
    }

    /// Toggle redirect following at runtime. Baseline construction follows
    /// redirects for the root probe and first answers afterwards.
    pub fn set_redirects(&self, follow: bool) {
        self.follow_redirects.store(follow, Ordering::SeqCst);
    }

    /// Enable the 1 s post-request delay. Monotone: once set, stays set.
    pub fn add_delay(&self) {
        self.delay.store(true, Ordering::SeqCst);
    }

    pub fn delay_enabled(&self) -> bool {
        self.delay.load(Ordering::SeqCst)
    }

    /// Issue one request for `raw_path` on `base_url` (scheme://host[:port]).
    /// The path is spliced into the request line verbatim.
    pub async fn execute(&self, base_url: &str, raw_path: &str) -> Result<Response> {
        let mut base = base_url.to_string();
        let mut path = raw_path.to_string();
        let mut hops = 0;

        let response = loop {
            let reply = self.round_trip(&base, &path).await?;

            let is_redirect = matches!(reply.status, 301 | 302 | 303 | 307 | 308);
            if is_redirect && self.follow_redirects.load(Ordering::SeqCst) && hops < MAX_REDIRECTS {
                if let Some(location) = reply.header("location") {
                    let location = location.to_string();
                    hops += 1;
                    if let Some((next_base, next_path)) = resolve_location(&base, &path, &location)
                    {
                        base = next_base;
                        path = next_path;
                        continue;
                    }
                }
            }

            break reply.into_response(format!("{}{}", base, path));
        };

        if self.delay.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(response)
    }

    async fn round_trip(&self, base_url: &str, raw_path: &str) -> Result<Parsed> {
        let target = Url::parse(base_url)
            .with_context(|| format!("invalid base URL {:?}", base_url))?;
        let use_tls = target.scheme() == "https";
        let host = target
            .host_str()
            .ok_or_else(|| anyhow!("missing host in {:?}", base_url))?
            .to_string();
        let port = target
            .port_or_known_default()
            .unwrap_or(if use_tls { 443 } else { 80 });

        let exchange = async {
            let mut stream = match &self.proxy {
                Some(proxy) => self.open_via_proxy(proxy, &host, port, use_tls).await?,
                None => self.open_direct(&host, port, use_tls).await?,
            };

            // Plain targets go through an HTTP proxy in absolute form; TLS
            // targets were already tunneled with CONNECT above.
            let absolute = self.proxy.is_some() && !use_tls;
            let request = self.build_request(&host, port, use_tls, raw_path, absolute, base_url);

            stream.write_all(request.as_bytes()).await?;
            stream.flush().await?;

            let mut raw = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);
                if raw.len() > MAX_RESPONSE_BYTES {
                    break;
                }
            }
            Ok::<Vec<u8>, anyhow::Error>(raw)
        };

        let raw = timeout(self.timeout, exchange)
            .await
            .map_err(|_| anyhow!("request to {}{} timed out", base_url, raw_path))??;
        Parsed::parse(&raw)
    }

    async fn open_direct(&self, host: &str, port: u16, use_tls: bool) -> Result<RawStream> {
        let tcp = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to {}:{}", host, port))?;
        if use_tls {
            self.wrap_tls(tcp, host).await
        } else {
            Ok(RawStream::Plain(tcp))
        }
    }

    /// Plain targets are requested through the proxy directly; TLS targets
    /// get a CONNECT tunnel first and the handshake runs inside it.
    async fn open_via_proxy(
        &self,
        proxy: &Url,
        host: &str,
        port: u16,
        use_tls: bool,
    ) -> Result<RawStream> {
        let proxy_host = proxy
            .host_str()
            .ok_or_else(|| anyhow!("proxy URL has no host"))?;
        let proxy_port = proxy.port_or_known_default().unwrap_or(8080);
        let mut tcp = TcpStream::connect((proxy_host, proxy_port))
            .await
            .with_context(|| format!("failed to connect to proxy {}:{}", proxy_host, proxy_port))?;

        if !use_tls {
            return Ok(RawStream::Plain(tcp));
        }

        let connect = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
            host = host,
            port = port
        );
        tcp.write_all(connect.as_bytes()).await?;
        tcp.flush().await?;

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while find_subsequence(&head, b"\r\n\r\n").is_none() {
            let n = tcp.read(&mut byte).await?;
            if n == 0 {
                bail!("proxy closed the CONNECT tunnel early");
            }
            head.push(byte[0]);
            if head.len() > 8192 {
                bail!("oversized CONNECT response from proxy");
            }
        }
        let status_line = String::from_utf8_lossy(&head);
        if !status_line.contains(" 200") {
            bail!("proxy refused CONNECT to {}:{}", host, port);
        }

        self.wrap_tls(tcp, host).await
    }

    async fn wrap_tls(&self, tcp: TcpStream, sni: &str) -> Result<RawStream> {
        let mut builder = native_tls::TlsConnector::builder();
        if self.insecure {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let connector = TlsConnector::from(
            builder.build().context("failed to build TLS connector")?,
        );
        let tls = connector
            .connect(sni, tcp)
            .await
            .with_context(|| format!("TLS handshake failed for {}", sni))?;
        Ok(RawStream::Tls(Box::new(tls)))
    }

    fn build_request(
        &self,
        host: &str,
        port: u16,
        use_tls: bool,
        raw_path: &str,
        absolute_form: bool,
        base_url: &str,
    ) -> String {
        let target = if absolute_form {
            if raw_path.is_empty() {
                format!("{}/", base_url)
            } else {
                format!("{}{}", base_url, raw_path)
            }
        } else if raw_path.is_empty() {
            "/".to_string()
        } else {
            raw_path.to_string()
        };

        let standard = if use_tls { 443 } else { 80 };
        let host_header = if port == standard {
            host.to_string()
        } else {
            format!("{}:{}", host, port)
        };

        let mut req = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", self.method, target, host_header);
        let ua = if self.user_agent.is_empty() {
            DEFAULT_USER_AGENT
        } else {
            &self.user_agent
        };
        req.push_str(&format!("User-Agent: {}\r\n", ua));
        if !self.cookies.is_empty() {
            req.push_str(&format!("Cookie: {}\r\n", self.cookies));
        }
        for (name, value) in &self.headers {
            req.push_str(&format!("{}: {}\r\n", name, value));
        }
        req.push_str("Connection: close\r\n\r\n");
        req
    }
}

/// Resolve a Location header against the current base and path.
/// Returns the next (base_url, path) pair, or None when it cannot be used.
fn resolve_location(base: &str, path: &str, location: &str) -> Option<(String, String)> {
    if location.is_empty() {
        return None;
    }
    let absolute = if location.starts_with("//") {
        let scheme = base.split("://").next().unwrap_or("http");
        format!("{}:{}", scheme, location)
    } else {
        location.to_string()
    };
    if let Ok(url) = Url::parse(&absolute) {
        if let Some(host) = url.host_str() {
            let next_base = match url.port() {
                Some(p) => format!("{}://{}:{}", url.scheme(), host, p),
                None => format!("{}://{}", url.scheme(), host),
            };
            let mut next_path = url.path().to_string();
            if let Some(q) = url.query() {
                next_path = format!("{}?{}", next_path, q);
            }
            return Some((next_base, next_path));
        }
    }
    if location.starts_with('/') {
        return Some((base.to_string(), location.to_string()));
    }
    // Relative to the current path's directory
    let dir_end = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    Some((base.to_string(), format!("{}{}", &path[..dir_end], location)))
}
