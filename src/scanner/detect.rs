//! Differential detector
//!
//! A candidate is positive only when it looks unlike every reference point:
//! the parent (same app), the dummy (generic traversal handling for an
//! unknown resource) and the nonexistent child (plain not-found behavior).
//! Header comparison is byte-exact, no trimming or case folding.

use crate::http::response::Response;
use crate::scanner::baseline::PathBaselines;

pub const NOTE_STATUS: &str = "Status code differs";
pub const NOTE_SERVER: &str = "Server header differs";
pub const NOTE_CONTENT_TYPE: &str = "Content-Type header differs";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub status: bool,
    pub server: bool,
    pub content_type: bool,
}

impl Verdict {
    pub fn positive(&self) -> bool {
        self.status || self.server || self.content_type
    }

    pub fn notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.status {
            notes.push(NOTE_STATUS.to_string());
        }
        if self.server {
            notes.push(NOTE_SERVER.to_string());
        }
        if self.content_type {
            notes.push(NOTE_CONTENT_TYPE.to_string());
        }
        notes
    }
}

pub fn compare(candidate: &Response, baselines: &PathBaselines, dummy: &Response) -> Verdict {
    let refs = [&baselines.one_step_back, dummy, &baselines.nonexistent];
    Verdict {
        status: refs.iter().all(|r| candidate.status != r.status),
        server: refs.iter().all(|r| candidate.server != r.server),
        content_type: refs.iter().all(|r| candidate.content_type != r.content_type),
    }
}
