//! Baseline construction
//!
//! Before a path is probed, four kinds of reference responses are gathered so
//! that generic behaviors cancel out of the comparison: the host root, the
//! path's parent, a never-existing sibling with each traversal token applied
//! (dummy), and a plain never-existing child (nonexistent).

use crate::http::client::RawClient;
use crate::http::response::Response;
use crate::payload::catalog;
use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Sentinel path segment that no real site serves.
pub const SENTINEL_SEGMENT: &str = "gachimuchicheburek";

/// Parent directory of `path` with the trailing slash kept.
/// `/` is its own parent; a segment without any slash falls back to `/`.
pub fn one_step_back(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(i) => trimmed[..=i].to_string(),
        None => "/".to_string(),
    }
}

/// A traversal token that survived the per-host 403 filter, carried together
/// with the dummy response it was filtered against.
#[derive(Debug, Clone)]
pub struct FilteredPayload {
    pub token: String,
    pub dummy: Response,
}

/// Host-wide reference material, gathered once before any probing.
#[derive(Debug, Clone)]
pub struct HostBaselines {
    pub root: Response,
    pub payloads: Vec<FilteredPayload>,
}

/// Build the host root response and the filtered payload set.
///
/// The root probe follows redirects so a front-page bounce still yields the
/// app's steady state; everything afterwards keeps first responses. A payload
/// whose dummy probe comes back 403 is dropped unless the root itself is 403:
/// the fronting layer blocks the token, so probing with it carries no signal.
pub async fn build_host_baselines(
    client: &RawClient,
    base_url: &str,
    cancel: &AtomicBool,
) -> Result<HostBaselines> {
    client.set_redirects(true);
    let root = client
        .execute(base_url, "")
        .await
        .with_context(|| format!("cannot make initial request to {}", base_url))?;
    client.set_redirects(false);

    let dummy_base = format!("/{}/", SENTINEL_SEGMENT);
    let dummy_paths = catalog::build_traversal(&dummy_base, catalog::tokens());
    let mut payloads = Vec::new();
    for (token, path) in catalog::tokens().iter().zip(&dummy_paths) {
        if cancel.load(Ordering::SeqCst) {
            bail!("scan cancelled");
        }
        let dummy = client
            .execute(base_url, path)
            .await
            .with_context(|| format!("dummy probe {}{} failed", base_url, path))?;
        if dummy.status == 403 && root.status != 403 {
            tracing::info!(
                "{} does not allow {:?} in the URL, skipping this payload",
                base_url,
                token
            );
            continue;
        }
        payloads.push(FilteredPayload {
            token: token.to_string(),
            dummy,
        });
    }

    Ok(HostBaselines { root, payloads })
}

/// Per-path reference responses.
#[derive(Debug, Clone)]
pub struct PathBaselines {
    pub one_step_back: Response,
    pub nonexistent: Response,
}

/// Probe the parent and the nonexistent child of `path`. When the parent is
/// the root (or empty), the cached root response stands in for it.
pub async fn build_path_baselines(
    client: &RawClient,
    base_url: &str,
    path: &str,
    root: &Response,
    cancel: &AtomicBool,
) -> Result<PathBaselines> {
    let parent = one_step_back(path);
    let one_step_back = if parent == "/" || parent.trim().is_empty() {
        root.clone()
    } else {
        client
            .execute(base_url, &parent)
            .await
            .with_context(|| format!("{}{} does not respond", base_url, parent))?
    };

    if cancel.load(Ordering::SeqCst) {
        bail!("scan cancelled");
    }

    let nonexistent_path = format!("{}{}/", path, SENTINEL_SEGMENT);
    let nonexistent = client
        .execute(base_url, &nonexistent_path)
        .await
        .with_context(|| format!("{}{} does not respond", base_url, nonexistent_path))?;

    Ok(PathBaselines {
        one_step_back,
        nonexistent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_step_back_strips_final_segment() {
        assert_eq!(one_step_back("/a/b/"), "/a/");
        assert_eq!(one_step_back("/a/b"), "/a/");
        assert_eq!(one_step_back("/a/"), "/");
    }

    #[test]
    fn test_one_step_back_stable_at_root() {
        assert_eq!(one_step_back("/"), "/");
        assert_eq!(one_step_back(&one_step_back("/a/b/")), "/");
        assert_eq!(one_step_back(&one_step_back("/")), "/");
    }

    #[test]
    fn test_one_step_back_without_leading_slash() {
        assert_eq!(one_step_back("a"), "/");
    }
}
