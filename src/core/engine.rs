//! Scan orchestrator
//!
//! Hosts run sequentially; within a host a pool of workers consumes paths
//! from a bounded channel. In URLs-file mode the stream is partitioned into
//! contiguous host runs so the source stays streaming while each host still
//! gets its own baselines, state and sink files.

use crate::core::options::Options;
use crate::core::state::ScanState;
use crate::http::client::RawClient;
use crate::reporting::sink::{self, Sink};
use crate::scanner::baseline::build_host_baselines;
use crate::scanner::probe::{run_worker, ProbeContext};
use crate::scanner::targets::TargetSource;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct Engine {
    opts: Arc<Options>,
    cancel: Arc<AtomicBool>,
    throttle_pause: Duration,
}

struct HostRun {
    paths_tx: mpsc::Sender<String>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<ScanState>,
    fed: usize,
}

impl Engine {
    pub fn new(opts: Options) -> Result<Self> {
        Ok(Self {
            opts: Arc::new(opts),
            cancel: Arc::new(AtomicBool::new(false)),
            throttle_pause: Duration::from_secs(60),
        })
    }

    /// Override the 60 s throttle pause (used by tests).
    pub fn throttle_pause(mut self, pause: Duration) -> Self {
        self.throttle_pause = pause;
        self
    }

    /// Run the scan to completion. Returns the process exit code: 0 for a
    /// clean run, 3 when a host was abandoned by a transport-error burst.
    pub async fn run(&self) -> Result<i32> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing in-flight requests");
                cancel.store(true, Ordering::SeqCst);
            }
        });

        let sink: Arc<StdMutex<Box<dyn Sink>>> =
            Arc::new(StdMutex::new(sink::for_output_dir(&self.opts.output_dir)));

        let mut any_abandoned = false;
        if self.opts.urls_file {
            self.run_urls_file(&sink, &mut any_abandoned).await?;
        } else {
            self.run_path_list(&sink, &mut any_abandoned).await?;
        }

        Ok(if any_abandoned { 3 } else { 0 })
    }

    async fn run_path_list(
        &self,
        sink: &Arc<StdMutex<Box<dyn Sink>>>,
        any_abandoned: &mut bool,
    ) -> Result<()> {
        let base_url = self.opts.base_url()?;
        let mut source = TargetSource::path_list(&self.opts.wordlist, base_url.clone()).await?;

        let Some(mut run) = self.start_host(&base_url, false, sink).await? else {
            return Ok(());
        };
        while let Some(target) = source.next().await? {
            if self.cancel.load(Ordering::SeqCst) || run.state.host_abandoned() {
                break;
            }
            if run.paths_tx.send(normalize_path(&target.path)).await.is_err() {
                break;
            }
            run.fed += 1;
        }
        self.finish_host(&base_url, run, any_abandoned).await;
        Ok(())
    }

    async fn run_urls_file(
        &self,
        sink: &Arc<StdMutex<Box<dyn Sink>>>,
        any_abandoned: &mut bool,
    ) -> Result<()> {
        let mut source = TargetSource::urls_file(&self.opts.wordlist).await?;
        // None in the run slot marks a host that was skipped; its remaining
        // contiguous lines are dropped without re-probing baselines.
        let mut current: Option<(String, Option<HostRun>)> = None;

        while let Some(target) = source.next().await? {
            if self.cancel.load(Ordering::SeqCst) {
                break;
            }

            let same_host = matches!(&current, Some((base, _)) if *base == target.base_url);
            if !same_host {
                if let Some((base, Some(run))) = current.take() {
                    self.finish_host(&base, run, any_abandoned).await;
                }
                let run = self.start_host(&target.base_url, true, sink).await?;
                current = Some((target.base_url.clone(), run));
            }

            if let Some((_, Some(run))) = &mut current {
                if run.state.host_abandoned() {
                    continue;
                }
                if run.paths_tx.send(normalize_path(&target.path)).await.is_ok() {
                    run.fed += 1;
                }
            }
        }

        if let Some((base, Some(run))) = current.take() {
            self.finish_host(&base, run, any_abandoned).await;
        }
        Ok(())
    }

    /// Build the host-wide baselines and spin up the worker pool.
    /// Returns None when the host has to be skipped.
    async fn start_host(
        &self,
        base_url: &str,
        per_path_dummies: bool,
        sink: &Arc<StdMutex<Box<dyn Sink>>>,
    ) -> Result<Option<HostRun>> {
        if self.cancel.load(Ordering::SeqCst) {
            return Ok(None);
        }
        tracing::info!("running scan for {}", base_url);

        let client = Arc::new(RawClient::new(&self.opts)?);
        let host = match build_host_baselines(&client, base_url, &self.cancel).await {
            Ok(host) => host,
            Err(err) => {
                tracing::warn!("skipping {}: {}", base_url, err);
                return Ok(None);
            }
        };
        if host.payloads.is_empty() {
            tracing::warn!(
                "{} does not allow traversal in any way, skipping host",
                base_url
            );
            return Ok(None);
        }

        let state = Arc::new(ScanState::with_pause(host.root.status, self.throttle_pause));
        let ctx = Arc::new(ProbeContext {
            client,
            state: state.clone(),
            sink: sink.clone(),
            base_url: base_url.to_string(),
            host: Arc::new(host),
            per_path_dummies,
            retry: self.opts.retry,
            cancel: self.cancel.clone(),
        });

        let (paths_tx, paths_rx) = mpsc::channel::<String>(self.opts.threads);
        let paths_rx = Arc::new(Mutex::new(paths_rx));
        let workers = (0..self.opts.threads)
            .map(|_| tokio::spawn(run_worker(ctx.clone(), paths_rx.clone())))
            .collect();

        Ok(Some(HostRun {
            paths_tx,
            workers,
            state,
            fed: 0,
        }))
    }

    async fn finish_host(&self, base_url: &str, run: HostRun, any_abandoned: &mut bool) {
        let HostRun {
            paths_tx,
            workers,
            state,
            fed,
        } = run;
        drop(paths_tx);
        for worker in workers {
            let _ = worker.await;
        }
        if state.host_abandoned() {
            *any_abandoned = true;
            tracing::warn!("{} was abandoned after repeated transport errors", base_url);
        } else {
            tracing::info!("finished {} ({} paths)", base_url, fed);
        }
    }
}

/// Probed paths always start and end with `/`. Queries and fragments are
/// stripped first: only the path segment is mutated by traversal probing.
fn normalize_path(path: &str) -> String {
    let mut path = path.to_string();
    if let Some(i) = path.find('?') {
        path.truncate(i);
    }
    if let Some(i) = path.find('#') {
        path.truncate(i);
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}
