//! End-to-end scans against a local fixture server.
//!
//! The fixture speaks just enough HTTP/1.1 and records every request target
//! exactly as it arrived, which is what the raw-path assertions need: no
//! framework gets a chance to normalize traversal sequences on either side.

use backstep::core::engine::Engine;
use backstep::core::options::Options;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
struct Reply {
    status: u16,
    server: &'static str,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn new(status: u16, content_type: &'static str) -> Self {
        Self {
            status,
            server: "FixtureServ",
            content_type,
            body: "<html>fixture</html>".to_string(),
        }
    }
}

type Handler = dyn Fn(&str) -> Reply + Send + Sync;

struct Fixture {
    port: u16,
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn targets(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn spawn_fixture<F>(handler: F) -> Fixture
where
    F: Fn(&str) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let log = requests.clone();
    let handler: Arc<Handler> = Arc::new(handler);
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(serve_one(socket, log.clone(), handler.clone()));
        }
    });

    Fixture {
        port: addr.port(),
        base_url: format!("http://127.0.0.1:{}", addr.port()),
        requests,
    }
}

async fn serve_one(mut socket: TcpStream, log: Arc<Mutex<Vec<String>>>, handler: Arc<Handler>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if buf.len() > 65536 {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let request_line = head.lines().next().unwrap_or("");
    let target = request_line.split(' ').nth(1).unwrap_or("").to_string();
    log.lock().unwrap().push(target.clone());

    let reply = handler(&target);
    let response = format!(
        "HTTP/1.1 {} Fixture\r\nServer: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reply.server,
        reply.content_type,
        reply.body.len(),
        reply.body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn write_wordlist(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn options(port: u16, wordlist: &Path, output_dir: &str) -> Options {
    Options {
        hostname: "127.0.0.1".to_string(),
        port,
        ssl: false,
        method: "GET".to_string(),
        follow_redirects: false,
        timeout: Duration::from_secs(5),
        wordlist: wordlist.to_path_buf(),
        user_agent: String::new(),
        threads: 2,
        insecure: false,
        retry: 0,
        headers: Vec::new(),
        cookies: String::new(),
        urls_file: false,
        proxy: false,
        proxy_url: String::new(),
        output_dir: output_dir.to_string(),
    }
}

fn read_findings(dir: &Path, host_label: &str) -> Vec<serde_json::Value> {
    let path = dir.join(format!("{}.jsonl", host_label));
    if !path.exists() {
        return Vec::new();
    }
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_clean_host_produces_no_findings_and_raw_paths_reach_the_wire() {
    // Every path answers identically, so every signal is suppressed.
    let fixture = spawn_fixture(|_| Reply::new(200, "text/html")).await;

    let wordlist = write_wordlist("a/b\n");
    let outdir = tempfile::tempdir().unwrap();
    let opts = options(fixture.port, wordlist.path(), outdir.path().to_str().unwrap());

    let code = Engine::new(opts).unwrap().run().await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(std::fs::read_dir(outdir.path()).unwrap().count(), 0);

    // Traversal tokens must arrive verbatim, no client-side canonicalization.
    let targets = fixture.targets();
    for expected in [
        "/a/b/..%2f",
        "/a/b/../",
        "/a/b/..%5c",
        "/a/b/..;/",
        "/a/b/%2e%2e%2f",
        "/a/b/.%2e/",
        "/a/b/..\\",
        "/a/b/..%2f..%2f",
    ] {
        assert!(
            targets.iter().any(|t| t == expected),
            "missing verbatim request {:?} in {:?}",
            expected,
            targets
        );
    }
}

#[tokio::test]
async fn test_scpt_hit_emits_one_finding_with_status_and_content_type_signals() {
    // The origin routes /api/v1/user/../ to a distinct admin handler while
    // parent, dummy and nonexistent references all look alike.
    let fixture = spawn_fixture(|target| {
        if target == "/api/v1/user/../" {
            let mut reply = Reply::new(403, "application/json");
            reply.body = "{\"error\":\"forbidden\"}".to_string();
            reply
        } else {
            Reply::new(200, "text/html")
        }
    })
    .await;

    let wordlist = write_wordlist("api/v1/user\n");
    let outdir = tempfile::tempdir().unwrap();
    let opts = options(fixture.port, wordlist.path(), outdir.path().to_str().unwrap());

    let code = Engine::new(opts).unwrap().run().await.unwrap();
    assert_eq!(code, 0);

    let findings = read_findings(outdir.path(), &format!("127.0.0.1_{}", fixture.port));
    assert_eq!(findings.len(), 1);
    let finding = &findings[0];
    assert_eq!(finding["module"], "scpt");
    assert_eq!(finding["path"], "/api/v1/user/");
    assert_eq!(finding["payload"], "../");
    assert_eq!(finding["signals"]["status"], true);
    assert_eq!(finding["signals"]["content_type"], true);
    assert_eq!(finding["signals"]["server"], false);
    assert_eq!(finding["status"], 403);
    assert_eq!(finding["server"], "FixtureServ");
    assert_eq!(finding["content_type"], "application/json");
    assert!(finding["url"].as_str().unwrap().ends_with("/api/v1/user/../"));
    let notes: Vec<&str> = finding["notes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n.as_str().unwrap())
        .collect();
    assert_eq!(notes, vec!["Status code differs", "Content-Type header differs"]);
}

#[tokio::test]
async fn test_waf_blocked_payload_is_filtered_host_wide() {
    // The fronting layer 403s any URL containing the encoded token. The
    // filter must drop it after the dummy probes; no candidate request may
    // carry it.
    let fixture = spawn_fixture(|target| {
        if target.contains("..%2f") {
            Reply::new(403, "text/html")
        } else {
            Reply::new(200, "text/html")
        }
    })
    .await;

    let wordlist = write_wordlist("foo\n");
    let outdir = tempfile::tempdir().unwrap();
    let opts = options(fixture.port, wordlist.path(), outdir.path().to_str().unwrap());

    let code = Engine::new(opts).unwrap().run().await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(std::fs::read_dir(outdir.path()).unwrap().count(), 0);

    let targets = fixture.targets();
    // The blocked token only ever appears in baseline dummy probes.
    for target in targets.iter().filter(|t| t.contains("..%2f")) {
        assert!(
            target.contains("gachimuchicheburek"),
            "candidate request {:?} used a filtered payload",
            target
        );
    }
    // Surviving payloads still probed the path.
    assert!(targets.iter().any(|t| t == "/foo/../"));
    assert!(targets.iter().any(|t| t == "/foo/..;/"));
    assert!(!targets.iter().any(|t| t == "/foo/..%2f"));
    assert!(!targets.iter().any(|t| t == "/foo/..%2f..%2f"));
}

#[tokio::test]
async fn test_urls_file_mode_scans_each_host_with_its_own_baselines() {
    let fixture_a = spawn_fixture(|target| {
        if target == "/x/../" {
            Reply::new(500, "text/plain")
        } else {
            Reply::new(200, "text/html")
        }
    })
    .await;
    let fixture_b = spawn_fixture(|target| {
        if target == "/y/../" {
            Reply::new(500, "text/plain")
        } else {
            Reply::new(200, "text/html")
        }
    })
    .await;

    let wordlist = write_wordlist(&format!(
        "{}/x/\n{}/y/\n",
        fixture_a.base_url, fixture_b.base_url
    ));
    let outdir = tempfile::tempdir().unwrap();
    let mut opts = options(0, wordlist.path(), outdir.path().to_str().unwrap());
    opts.urls_file = true;

    let code = Engine::new(opts).unwrap().run().await.unwrap();
    assert_eq!(code, 0);

    let findings_a = read_findings(outdir.path(), &format!("127.0.0.1_{}", fixture_a.port));
    let findings_b = read_findings(outdir.path(), &format!("127.0.0.1_{}", fixture_b.port));
    assert_eq!(findings_a.len(), 1);
    assert_eq!(findings_b.len(), 1);
    assert_eq!(findings_a[0]["path"], "/x/");
    assert_eq!(findings_b[0]["path"], "/y/");
    assert_eq!(findings_a[0]["payload"], "../");
    assert_eq!(findings_b[0]["payload"], "../");

    // Each host built its own baselines.
    assert!(fixture_a.targets().iter().any(|t| t == "/"));
    assert!(fixture_b.targets().iter().any(|t| t == "/"));
}

#[tokio::test]
async fn test_empty_wordlist_finishes_clean() {
    let fixture = spawn_fixture(|_| Reply::new(200, "text/html")).await;

    let wordlist = write_wordlist("");
    let outdir = tempfile::tempdir().unwrap();
    let opts = options(fixture.port, wordlist.path(), outdir.path().to_str().unwrap());

    let code = Engine::new(opts).unwrap().run().await.unwrap();
    assert_eq!(code, 0);
    assert_eq!(std::fs::read_dir(outdir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_anti_bot_template_pauses_and_the_scan_continues() {
    // Every traversal probe hits the Qrator interstitial. The fifth one
    // trips the template check; the scan pauses briefly, slows down, and
    // still works through the remaining payloads.
    let fixture = spawn_fixture(|target| {
        let tokens = [
            "..%2f", "../", "..%5c", "..;/", "%2e%2e%2f", ".%2e/", "..\\",
        ];
        if tokens.iter().any(|t| target.contains(t)) {
            let mut reply = Reply::new(503, "text/html");
            reply.body = "<html>Guru meditation: 8642</html>".to_string();
            reply
        } else {
            Reply::new(200, "text/html")
        }
    })
    .await;

    let wordlist = write_wordlist("foo\n");
    let outdir = tempfile::tempdir().unwrap();
    let opts = options(fixture.port, wordlist.path(), outdir.path().to_str().unwrap());

    let code = Engine::new(opts)
        .unwrap()
        .throttle_pause(Duration::from_millis(20))
        .run()
        .await
        .unwrap();
    assert_eq!(code, 0);

    // The interstitial matches the dummy baseline, so nothing is a finding.
    assert_eq!(std::fs::read_dir(outdir.path()).unwrap().count(), 0);

    // The scan kept going after the pause: every payload was still probed.
    let targets = fixture.targets();
    for expected in [
        "/foo/..%2f",
        "/foo/../",
        "/foo/..%5c",
        "/foo/..;/",
        "/foo/%2e%2e%2f",
        "/foo/.%2e/",
        "/foo/..\\",
        "/foo/..%2f..%2f",
    ] {
        assert!(
            targets.iter().any(|t| t == expected),
            "scan stopped before probing {:?}",
            expected
        );
    }
}

#[tokio::test]
async fn test_identical_runs_find_the_same_results() {
    let handler = |target: &str| {
        if target == "/app/../" {
            Reply::new(302, "application/octet-stream")
        } else {
            Reply::new(200, "text/html")
        }
    };
    let fixture = spawn_fixture(handler).await;

    let wordlist = write_wordlist("app\n");
    let outdir_one = tempfile::tempdir().unwrap();
    let outdir_two = tempfile::tempdir().unwrap();
    let label = format!("127.0.0.1_{}", fixture.port);

    let opts = options(fixture.port, wordlist.path(), outdir_one.path().to_str().unwrap());
    Engine::new(opts).unwrap().run().await.unwrap();
    let opts = options(fixture.port, wordlist.path(), outdir_two.path().to_str().unwrap());
    Engine::new(opts).unwrap().run().await.unwrap();

    let strip_ts = |mut v: serde_json::Value| {
        v.as_object_mut().unwrap().remove("ts");
        v
    };
    let one: Vec<_> = read_findings(outdir_one.path(), &label)
        .into_iter()
        .map(strip_ts)
        .collect();
    let two: Vec<_> = read_findings(outdir_two.path(), &label)
        .into_iter()
        .map(strip_ts)
        .collect();
    assert_eq!(one.len(), 1);
    assert_eq!(one, two);
}
