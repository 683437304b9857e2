use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which of the three differential signals fired for a candidate.
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    pub status: bool,
    pub server: bool,
    pub content_type: bool,
}

/// A single detection event. Immutable once written to the sink.
#[derive(Debug, Serialize, Clone)]
pub struct Finding {
    pub module: String,
    pub ts: DateTime<Utc>,
    pub host: String,
    pub path: String,
    /// The traversal token, not the full candidate URL.
    pub payload: String,
    /// The URL the executor actually requested.
    pub url: String,
    pub signals: Signals,
    pub notes: Vec<String>,
    pub status: u16,
    pub server: String,
    pub content_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_serializes_with_wire_field_names() {
        let finding = Finding {
            module: "scpt".to_string(),
            ts: Utc::now(),
            host: "http://a.test".to_string(),
            path: "/x/".to_string(),
            payload: "../".to_string(),
            url: "http://a.test/x/../".to_string(),
            signals: Signals {
                status: true,
                server: false,
                content_type: true,
            },
            notes: vec!["Status code differs".to_string()],
            status: 403,
            server: "nginx".to_string(),
            content_type: "application/json".to_string(),
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["module"], "scpt");
        assert_eq!(json["signals"]["content_type"], true);
        assert_eq!(json["signals"]["server"], false);
        assert!(json["ts"].as_str().unwrap().contains('T'));
        assert_eq!(json["content_type"], "application/json");
    }
}
