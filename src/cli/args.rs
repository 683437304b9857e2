use clap::Parser;

/// backstep – secondary context path traversal scanner
#[derive(Parser, Debug)]
#[command(
    name = "backstep",
    version = "0.1.0",
    about = "Differential detection of path traversal routed differently by proxy and origin",
    long_about = None,
    after_help = "EXAMPLES:\n  backstep example.com paths.txt --ssl --scpt -t 15\n  backstep unused urls.txt --urlfile --scpt --output findings\n  backstep example.com paths.txt --scpt --proxy --proxy-url http://127.0.0.1:8080"
)]
pub struct Cli {
    /// Target hostname (ignored with --urlfile)
    pub host: String,

    /// Wordlist of paths, or a file of absolute URLs with --urlfile
    pub wordlist: String,

    // ═══════════════════════════════════════════════════════════════════
    // TARGET
    // ═══════════════════════════════════════════════════════════════════

    /// Target port (0 = scheme default)
    #[arg(long, default_value_t = 0, help_heading = "TARGET")]
    pub port: u16,

    /// Use HTTPS
    #[arg(long, help_heading = "TARGET")]
    pub ssl: bool,

    /// Treat the wordlist as a file of absolute URLs, one per line
    #[arg(long, help_heading = "TARGET")]
    pub urlfile: bool,

    // ═══════════════════════════════════════════════════════════════════
    // REQUESTS
    // ═══════════════════════════════════════════════════════════════════

    /// Follow redirects instead of keeping the first response
    #[arg(long, help_heading = "REQUESTS")]
    pub followredirects: bool,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 10, help_heading = "REQUESTS")]
    pub timeout: u64,

    /// HTTP method
    #[arg(long, default_value = "GET", help_heading = "REQUESTS")]
    pub method: String,

    /// Skip TLS certificate verification
    #[arg(long, help_heading = "REQUESTS")]
    pub insecure: bool,

    /// User-Agent header
    #[arg(long, help_heading = "REQUESTS")]
    pub useragent: Option<String>,

    /// Cookie string for authenticated scanning
    #[arg(long, help_heading = "REQUESTS")]
    pub cookie: Option<String>,

    /// Extra header "Name: value" (can be used multiple times)
    #[arg(long = "header", short = 'H', help_heading = "REQUESTS")]
    pub headers: Vec<String>,

    /// Route requests through an HTTP proxy
    #[arg(long, help_heading = "REQUESTS")]
    pub proxy: bool,

    /// Proxy URL (e.g. http://127.0.0.1:8080)
    #[arg(long = "proxy-url", help_heading = "REQUESTS")]
    pub proxy_url: Option<String>,

    // ═══════════════════════════════════════════════════════════════════
    // PERFORMANCE
    // ═══════════════════════════════════════════════════════════════════

    /// Number of concurrent workers per host (recommended: 15)
    #[arg(short = 't', long, default_value_t = 1, help_heading = "PERFORMANCE")]
    pub threads: usize,

    /// Retries per candidate request
    #[arg(long, default_value_t = 2, help_heading = "PERFORMANCE")]
    pub retry: u32,

    // ═══════════════════════════════════════════════════════════════════
    // MODULES
    // ═══════════════════════════════════════════════════════════════════

    /// Enable the secondary context path traversal module
    #[arg(long, help_heading = "MODULES")]
    pub scpt: bool,

    // ═══════════════════════════════════════════════════════════════════
    // OUTPUT
    // ═══════════════════════════════════════════════════════════════════

    /// Directory for per-host JSONL findings ("no.no" = stdout only)
    #[arg(long, default_value = "no.no", help_heading = "OUTPUT")]
    pub output: String,

    /// Skip the banner display
    #[arg(long, help_heading = "OUTPUT")]
    pub no_banner: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, help_heading = "OUTPUT")]
    pub quiet: bool,

    /// Verbose output (debug level)
    #[arg(short, long, help_heading = "OUTPUT")]
    pub verbose: bool,
}
