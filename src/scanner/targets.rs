//! Streaming target source
//!
//! Targets are read line by line; the whole wordlist is never held in memory.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// scheme://host[:port]
    pub base_url: String,
    pub path: String,
}

enum Mode {
    /// Every line is a path on the configured host.
    PathList { base_url: String },
    /// Every line is an absolute URL; malformed lines are skipped silently.
    UrlsFile,
}

pub struct TargetSource {
    lines: Lines<BufReader<File>>,
    mode: Mode,
}

impl TargetSource {
    pub async fn path_list(wordlist: &Path, base_url: String) -> Result<Self> {
        Ok(Self {
            lines: open_lines(wordlist).await?,
            mode: Mode::PathList { base_url },
        })
    }

    pub async fn urls_file(wordlist: &Path) -> Result<Self> {
        Ok(Self {
            lines: open_lines(wordlist).await?,
            mode: Mode::UrlsFile,
        })
    }

    pub async fn next(&mut self) -> Result<Option<Target>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match &self.mode {
                Mode::PathList { base_url } => {
                    return Ok(Some(Target {
                        base_url: base_url.clone(),
                        path: line.to_string(),
                    }));
                }
                Mode::UrlsFile => {
                    let url = match Url::parse(line) {
                        Ok(u) => u,
                        Err(_) => continue,
                    };
                    let host = match url.host_str() {
                        Some(h) => h,
                        None => continue,
                    };
                    let base_url = match url.port() {
                        Some(p) => format!("{}://{}:{}", url.scheme(), host, p),
                        None => format!("{}://{}", url.scheme(), host),
                    };
                    let mut path = url.path().to_string();
                    if let Some(query) = url.query() {
                        path = format!("{}?{}", path, query);
                    }
                    return Ok(Some(Target { base_url, path }));
                }
            }
        }
        Ok(None)
    }
}

async fn open_lines(wordlist: &Path) -> Result<Lines<BufReader<File>>> {
    let file = File::open(wordlist)
        .await
        .with_context(|| format!("cannot open wordlist {}", wordlist.display()))?;
    Ok(BufReader::new(file).lines())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn wordlist(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_path_list_skips_blank_lines() {
        let file = wordlist("admin\n\n   \napi/v1\n");
        let mut source = TargetSource::path_list(file.path(), "http://a.test".to_string())
            .await
            .unwrap();
        let mut paths = Vec::new();
        while let Some(t) = source.next().await.unwrap() {
            assert_eq!(t.base_url, "http://a.test");
            paths.push(t.path);
        }
        assert_eq!(paths, vec!["admin", "api/v1"]);
    }

    #[tokio::test]
    async fn test_urls_file_splits_base_and_path() {
        let file = wordlist("https://a.test/x/\nnot a url\nhttp://b.test:8080/y?id=1\n");
        let mut source = TargetSource::urls_file(file.path()).await.unwrap();

        let first = source.next().await.unwrap().unwrap();
        assert_eq!(first.base_url, "https://a.test");
        assert_eq!(first.path, "/x/");

        let second = source.next().await.unwrap().unwrap();
        assert_eq!(second.base_url, "http://b.test:8080");
        assert_eq!(second.path, "/y?id=1");

        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_wordlist_yields_nothing() {
        let file = wordlist("");
        let mut source = TargetSource::urls_file(file.path()).await.unwrap();
        assert!(source.next().await.unwrap().is_none());
    }
}
