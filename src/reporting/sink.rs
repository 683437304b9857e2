//! Finding sinks
//!
//! A sink receives findings one at a time. Failures are reported but never
//! abort the scan.

use crate::reporting::model::Finding;
use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use url::Url;

/// Sentinel output directory meaning "print findings instead of writing files".
pub const STDOUT_SENTINEL: &str = "no.no";

pub trait Sink: Send {
    fn write(&mut self, finding: &Finding) -> Result<()>;
}

/// Compact one-line output for interactive runs.
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn write(&mut self, f: &Finding) -> Result<()> {
        println!(
            "[+] {} {} payload={:?} status={} notes={:?}",
            f.host, f.path, f.payload, f.status, f.notes
        );
        Ok(())
    }
}

/// One append-mode JSONL file per host inside the output directory.
pub struct JsonlSink {
    output_dir: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl Sink for JsonlSink {
    fn write(&mut self, f: &Finding) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("{}.jsonl", sanitize_host(&host_label(&f.host))));
        let mut fp = OpenOptions::new().create(true).append(true).open(path)?;
        serde_json::to_writer(&mut fp, f)?;
        fp.write_all(b"\n")?;
        Ok(())
    }
}

/// Pick a sink for the configured output directory.
pub fn for_output_dir(output_dir: &str) -> Box<dyn Sink> {
    if output_dir.is_empty() || output_dir == STDOUT_SENTINEL {
        Box::new(StdoutSink)
    } else {
        Box::new(JsonlSink::new(output_dir))
    }
}

/// File names use the authority part of the base URL, not the scheme.
fn host_label(host: &str) -> String {
    match Url::parse(host) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            _ => host.to_string(),
        },
        Err(_) => host.to_string(),
    }
}

pub fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}
