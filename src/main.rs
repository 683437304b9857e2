use backstep::cli::args::Cli;
use backstep::core::engine::Engine;
use backstep::core::options::Options;
use clap::Parser;
use tracing_subscriber::EnvFilter;

const BANNER: &str = r#"
 ╔══════════════════════════════════════════════════╗
 ║                                                  ║
 ║   ██▄ ▄▀▄ ▄▀▀ █▄▀ ▄▀▀ ▀█▀ ██▀ █▀▄                ║
 ║   █▄█ █▀█ ▀▄▄ █ █ ▄██  █  █▄▄ █▀                 ║
 ║                                                  ║
 ║   Secondary Context Path Traversal Scanner       ║
 ║   Version : 0.1.0                                ║
 ║   License : Apache-2.0                           ║
 ║                                                  ║
 ╚══════════════════════════════════════════════════╝
"#;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.no_banner && !cli.quiet {
        println!("\x1b[36m{}\x1b[0m", BANNER); // Cyan color
    }

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if !cli.scpt {
        tracing::warn!("no module enabled; pass --scpt to scan");
        return;
    }

    let opts = match Options::from_cli(cli) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let engine = match Engine::new(opts) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    match engine.run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!("scan failed: {}", err);
            std::process::exit(1);
        }
    }
}
