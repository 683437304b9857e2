//! Runtime configuration
//!
//! Options is decoupled from the CLI so the engine stays testable: tests
//! build it directly, `main` goes through [`Options::from_cli`].

use crate::cli::args::Cli;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Options {
    pub hostname: String,
    /// 0 means the scheme default.
    pub port: u16,
    pub ssl: bool,
    pub method: String,
    pub follow_redirects: bool,
    pub timeout: Duration,
    pub wordlist: PathBuf,
    pub user_agent: String,
    pub threads: usize,
    pub insecure: bool,
    pub retry: u32,
    pub headers: Vec<(String, String)>,
    pub cookies: String,
    pub urls_file: bool,
    pub proxy: bool,
    pub proxy_url: String,
    pub output_dir: String,
}

impl Options {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.threads == 0 {
            bail!("--threads must be greater than zero");
        }
        if !cli.urlfile && cli.host.trim().is_empty() {
            bail!("a target hostname is required unless --urlfile is set");
        }

        let mut headers = Vec::new();
        for header in &cli.headers {
            match header.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.trim().to_string(), value.trim().to_string()))
                }
                None => bail!("malformed header {:?}, expected \"Name: value\"", header),
            }
        }

        Ok(Self {
            hostname: cli.host.trim().to_string(),
            port: cli.port,
            ssl: cli.ssl,
            method: cli.method.to_uppercase(),
            follow_redirects: cli.followredirects,
            timeout: Duration::from_secs(cli.timeout),
            wordlist: PathBuf::from(cli.wordlist),
            user_agent: cli.useragent.unwrap_or_default(),
            threads: cli.threads,
            insecure: cli.insecure,
            retry: cli.retry,
            headers,
            cookies: cli.cookie.unwrap_or_default(),
            urls_file: cli.urlfile,
            proxy: cli.proxy,
            proxy_url: cli.proxy_url.unwrap_or_default(),
            output_dir: cli.output,
        })
    }

    /// scheme://host[:port]; the port is kept only when non-standard for the
    /// scheme. Paths are never part of the base URL.
    pub fn base_url(&self) -> Result<String> {
        if self.hostname.is_empty() {
            bail!("hostname is empty");
        }
        let scheme = if self.ssl { "https" } else { "http" };
        let standard = if self.ssl { 443 } else { 80 };
        if self.port > 0 && self.port != standard {
            Ok(format!("{}://{}:{}", scheme, self.hostname, self.port))
        } else {
            Ok(format!("{}://{}", scheme, self.hostname))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options {
            hostname: "a.test".to_string(),
            port: 0,
            ssl: false,
            method: "GET".to_string(),
            follow_redirects: false,
            timeout: Duration::from_secs(10),
            wordlist: PathBuf::from("paths.txt"),
            user_agent: String::new(),
            threads: 1,
            insecure: false,
            retry: 0,
            headers: Vec::new(),
            cookies: String::new(),
            urls_file: false,
            proxy: false,
            proxy_url: String::new(),
            output_dir: "no.no".to_string(),
        }
    }

    #[test]
    fn test_base_url_defaults() {
        assert_eq!(options().base_url().unwrap(), "http://a.test");
    }

    #[test]
    fn test_base_url_keeps_only_nonstandard_ports() {
        let mut opts = options();
        opts.port = 80;
        assert_eq!(opts.base_url().unwrap(), "http://a.test");

        opts.port = 8080;
        assert_eq!(opts.base_url().unwrap(), "http://a.test:8080");

        opts.ssl = true;
        opts.port = 443;
        assert_eq!(opts.base_url().unwrap(), "https://a.test");
    }

    #[test]
    fn test_base_url_requires_hostname() {
        let mut opts = options();
        opts.hostname = String::new();
        assert!(opts.base_url().is_err());
    }
}
