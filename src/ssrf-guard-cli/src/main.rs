//! ssrf-guard - check URLs against an SSRF policy from the command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::json;
use ssrf_guard::{GuardConfig, PolicyEngine, Verdict, load_list_file};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// SSRF Guard
#[derive(Parser)]
#[command(name = "ssrf-guard")]
#[command(about = "Decide whether URLs are safe to fetch from a server")]
#[command(version)]
struct Args {
    /// Log level
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate one or more URLs or hosts.
    Check(CheckArgs),

    /// Parse a list file and report what it contains.
    LintList {
        /// List file (one host, IP or CIDR per line)
        file: PathBuf,
    },
}

#[derive(ClapArgs)]
struct CheckArgs {
    /// Policy file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print only scheme://host[:port]
    #[arg(long)]
    no_path: bool,

    /// Print one JSON object per input
    #[arg(long)]
    json: bool,

    /// URLs or hosts to check
    #[arg(required = true)]
    inputs: Vec<String>,
}

/// Exit status when every input is allowed.
const EXIT_ALLOWED: u8 = 0;
/// Exit status when at least one input is denied.
const EXIT_DENIED: u8 = 1;
/// Exit status for configuration and usage errors.
const EXIT_CONFIG: u8 = 2;

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_logs);

    let result = match args.command {
        Command::Check(check) => run_check(check).await,
        Command::LintList { file } => lint_list(&file),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn load_config(path: Option<&Path>, no_path: bool) -> anyhow::Result<GuardConfig> {
    let mut config = match path {
        Some(path) => GuardConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GuardConfig::default(),
    };
    if no_path {
        config.return_with_path = false;
    }
    Ok(config)
}

async fn run_check(args: CheckArgs) -> anyhow::Result<u8> {
    let config = load_config(args.config.as_deref(), args.no_path)?;
    let engine = PolicyEngine::new(config).context("invalid policy")?;
    debug!(inputs = args.inputs.len(), "Checking inputs");

    let mut code = EXIT_ALLOWED;
    for input in &args.inputs {
        let verdict = engine.evaluate(input).await;
        if verdict.is_denied() {
            code = EXIT_DENIED;
        }
        println!("{}", render(input, &verdict, args.json));
    }
    Ok(code)
}

fn render(input: &str, verdict: &Verdict, as_json: bool) -> String {
    if as_json {
        return json!({ "input": input, "verdict": verdict }).to_string();
    }

    match verdict {
        Verdict::Allowed(url) => format!("ALLOW {url}"),
        Verdict::Denied(violations) => {
            let reasons: Vec<String> = violations
                .iter()
                .map(|v| match &v.detail {
                    Some(detail) => format!("{}: {}", v.code, detail),
                    None => v.code.to_string(),
                })
                .collect();
            format!("DENY {} ({})", reasons.join(", "), input)
        }
    }
}

fn lint_list(path: &Path) -> anyhow::Result<u8> {
    let rules = load_list_file(path)?;
    let (hosts, ips, cidrs) = rules.counts();
    println!(
        "{}: {} hosts, {} ips, {} cidrs",
        path.display(),
        hosts,
        ips,
        cidrs
    );
    Ok(EXIT_ALLOWED)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ssrf_guard::{Violation, ViolationCode};

    use super::*;

    #[test]
    fn test_parse_check_args() {
        let args = Args::try_parse_from([
            "ssrf-guard",
            "--log-level",
            "debug",
            "check",
            "--no-path",
            "--json",
            "http://example.com",
            "0x7f000001",
        ])
        .unwrap();

        assert_eq!(args.log_level, "debug");
        match args.command {
            Command::Check(check) => {
                assert!(check.no_path);
                assert!(check.json);
                assert!(check.config.is_none());
                assert_eq!(check.inputs, vec!["http://example.com", "0x7f000001"]);
            }
            Command::LintList { .. } => panic!("expected check"),
        }
    }

    #[test]
    fn test_check_requires_input() {
        assert!(Args::try_parse_from(["ssrf-guard", "check"]).is_err());
    }

    #[test]
    fn test_render_text() {
        let allowed = Verdict::Allowed("http://example.com/".to_string());
        assert_eq!(
            render("example.com", &allowed, false),
            "ALLOW http://example.com/"
        );

        let denied = Verdict::Denied(vec![Violation::with_detail(
            ViolationCode::PrivateOrReservedIp,
            "127.0.0.1",
        )]);
        assert_eq!(
            render("0x7f000001", &denied, false),
            "DENY PrivateOrReservedIP: 127.0.0.1 (0x7f000001)"
        );
    }

    #[test]
    fn test_render_json() {
        let denied = Verdict::Denied(vec![Violation::new(ViolationCode::SchemaError)]);
        let line: serde_json::Value =
            serde_json::from_str(&render("ftp://1.1.1.1", &denied, true)).unwrap();
        assert_eq!(
            line,
            json!({ "input": "ftp://1.1.1.1", "verdict": [{ "code": "SchemaError" }] })
        );
    }

    #[test]
    fn test_load_config_no_path_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "deny_hosts = [\"evil.com\"]\n").unwrap();

        let config = load_config(Some(&path), true).unwrap();
        assert!(!config.return_with_path);

        assert!(load_config(Some(&dir.path().join("missing.toml")), false).is_err());
    }

    #[test]
    fn test_lint_list() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "evil.com\n10.0.0.0/8\n").unwrap();
        assert_eq!(lint_list(&good).unwrap(), EXIT_ALLOWED);

        let bad = dir.path().join("bad.txt");
        std::fs::write(&bad, "10.0.0.0/40\n").unwrap();
        assert!(lint_list(&bad).is_err());
    }
}
