//! Per-worker probe loop
//!
//! Each worker pulls normalized paths from the shared channel, gathers the
//! path baselines, then walks the filtered payloads in catalog order with a
//! retry budget per candidate. Every candidate response is run past the ban
//! feedback before detection.

use crate::core::state::{BanAction, RootVerdict, ScanState, MAX_CONSECUTIVE_ERRORS};
use crate::http::client::RawClient;
use crate::payload::catalog;
use crate::reporting::model::{Finding, Signals};
use crate::reporting::sink::Sink;
use crate::scanner::baseline::{
    build_path_baselines, one_step_back, HostBaselines, SENTINEL_SEGMENT,
};
use crate::scanner::detect;
use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

pub struct ProbeContext {
    pub client: Arc<RawClient>,
    pub state: Arc<ScanState>,
    pub sink: Arc<StdMutex<Box<dyn Sink>>>,
    pub base_url: String,
    pub host: Arc<HostBaselines>,
    /// Re-issue dummies per path (URLs-file mode) instead of reusing the
    /// host-wide set.
    pub per_path_dummies: bool,
    pub retry: u32,
    pub cancel: Arc<AtomicBool>,
}

pub async fn run_worker(ctx: Arc<ProbeContext>, paths: Arc<Mutex<mpsc::Receiver<String>>>) {
    loop {
        if ctx.cancel.load(Ordering::SeqCst) || ctx.state.host_abandoned() {
            return;
        }
        let path = {
            let mut rx = paths.lock().await;
            rx.recv().await
        };
        let Some(path) = path else {
            return;
        };
        if let Err(err) = probe_path(&ctx, &path).await {
            tracing::info!("{}{} skipped: {}", ctx.base_url, path, err);
        }
    }
}

async fn probe_path(ctx: &ProbeContext, path: &str) -> Result<()> {
    let baselines =
        build_path_baselines(&ctx.client, &ctx.base_url, path, &ctx.host.root, &ctx.cancel).await?;
    let parent_dummy_base = format!("{}{}/", one_step_back(path), SENTINEL_SEGMENT);

    let tokens: Vec<&str> = ctx.host.payloads.iter().map(|p| p.token.as_str()).collect();
    let candidates = catalog::build_traversal(path, &tokens);
    let dummy_paths = catalog::build_traversal(&parent_dummy_base, &tokens);

    'payloads: for ((filtered, candidate_path), dummy_path) in ctx
        .host
        .payloads
        .iter()
        .zip(&candidates)
        .zip(&dummy_paths)
    {
        if ctx.cancel.load(Ordering::SeqCst) || ctx.state.host_abandoned() {
            return Ok(());
        }

        // Each path has its own parent context in URLs-file mode, so the
        // dummy must be probed there instead of reused host-wide.
        let dummy = if ctx.per_path_dummies {
            match ctx.client.execute(&ctx.base_url, dummy_path).await {
                Ok(resp) => resp,
                Err(err) => {
                    tracing::debug!("{}{} does not respond: {}", ctx.base_url, dummy_path, err);
                    continue;
                }
            }
        } else {
            filtered.dummy.clone()
        };

        for attempt in 0..=ctx.retry {
            match ctx.client.execute(&ctx.base_url, candidate_path).await {
                Ok(candidate) => {
                    ctx.state.reset_errors().await;
                    handle_ban_action(ctx, &candidate).await;

                    let verdict = detect::compare(&candidate, &baselines, &dummy);
                    if verdict.positive() {
                        emit_finding(ctx, path, &filtered.token, &candidate, &verdict);
                    }
                    continue 'payloads;
                }
                Err(err) => {
                    if attempt < ctx.retry {
                        continue;
                    }
                    tracing::warn!(
                        "{}{} did not respond: {}",
                        ctx.base_url,
                        candidate_path,
                        err
                    );
                    let errors = ctx.state.record_error().await;
                    if errors >= MAX_CONSECUTIVE_ERRORS {
                        tracing::warn!(
                            "{} responded with {} errors in a row, abandoning host",
                            ctx.base_url,
                            errors
                        );
                        ctx.state.abandon_host();
                        return Ok(());
                    }
                    let backoff = { rand::thread_rng().gen_range(2..=5) };
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    continue 'payloads;
                }
            }
        }
    }
    Ok(())
}

/// Carry out whatever the ban feedback asked for. Pauses happen here, in the
/// worker that tripped the threshold, so the rest of the pool keeps running.
async fn handle_ban_action(ctx: &ProbeContext, candidate: &crate::http::response::Response) {
    match ctx.state.observe_response(candidate).await {
        BanAction::None => {}
        BanAction::TemplatePause => {
            tracing::warn!(
                "{} served a known anti-bot template; pausing {:?}, then continuing with delayed requests",
                ctx.base_url,
                ctx.state.pause()
            );
            ctx.client.add_delay();
            tokio::time::sleep(ctx.state.pause()).await;
        }
        BanAction::RootRecheck => {
            let root_now = match ctx.client.execute(&ctx.base_url, "").await {
                Ok(resp) => resp,
                Err(_) => return,
            };
            match ctx.state.confirm_root_drift(root_now.status).await {
                RootVerdict::Unchanged => {}
                RootVerdict::PauseAndDelay => {
                    tracing::warn!(
                        "{} started rejecting us; pausing {:?}, then continuing with delayed requests",
                        ctx.base_url,
                        ctx.state.pause()
                    );
                    ctx.client.add_delay();
                    tokio::time::sleep(ctx.state.pause()).await;
                }
                RootVerdict::Fatal => {
                    tracing::error!(
                        "delaying requests did not help, {} keeps rejecting us; stopping",
                        ctx.base_url
                    );
                    std::process::exit(3);
                }
            }
        }
    }
}

fn emit_finding(
    ctx: &ProbeContext,
    path: &str,
    token: &str,
    candidate: &crate::http::response::Response,
    verdict: &detect::Verdict,
) {
    let finding = Finding {
        module: "scpt".to_string(),
        ts: Utc::now(),
        host: ctx.base_url.clone(),
        path: path.to_string(),
        payload: token.to_string(),
        url: candidate.request_url.clone(),
        signals: Signals {
            status: verdict.status,
            server: verdict.server,
            content_type: verdict.content_type,
        },
        notes: verdict.notes(),
        status: candidate.status,
        server: candidate.server.clone(),
        content_type: candidate.content_type.clone(),
    };

    let mut sink = match ctx.sink.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(err) = sink.write(&finding) {
        tracing::warn!("failed to record finding for {}{}: {}", ctx.base_url, path, err);
    }
}
