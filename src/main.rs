use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use runbox::{Config, Evaluator, FileAssets, RunEvent, TestCase};

fn print_help() {
    println!(
        "\
runbox v{}

Sandboxed code execution dispatcher. Runs a source file against a
test suite (or raw stdin) through the configured execution backend
and prints lifecycle events as JSON lines.

USAGE:
    runbox [OPTIONS] <SOURCE_FILE>

ARGUMENTS:
    SOURCE_FILE      Path to the submission's source code

OPTIONS:
    -c, --config <PATH>    TOML configuration file [default: built-in defaults]
    -t, --tests <PATH>     JSON array of test cases to grade against
    -a, --assets <PATH>    JSON object of question-level file assets
    -i, --stdin <TEXT>     Raw stdin for a single ungraded run
    -h, --help             Print this help message and exit
    -V, --version          Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG         Log level filter for tracing
                     (e.g. debug, runbox=debug,warn)
    PISTON_URL       Execution backend URL, typically interpolated
                     into the [backend] endpoint

EXAMPLES:
    runbox solution.py --tests tests.json
    runbox --config runbox.toml --stdin '42' solution.py
    RUST_LOG=debug runbox solution.py -t tests.json",
        env!("CARGO_PKG_VERSION"),
    );
}

struct CliArgs {
    source_file: String,
    config_path: Option<String>,
    tests_path: Option<String>,
    assets_path: Option<String>,
    stdin: Option<String>,
}

fn parse_args() -> Result<CliArgs> {
    let mut source_file = None;
    let mut config_path = None;
    let mut tests_path = None;
    let mut assets_path = None;
    let mut stdin = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("runbox v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--config" | "-c" => config_path = args.next(),
            "--tests" | "-t" => tests_path = args.next(),
            "--assets" | "-a" => assets_path = args.next(),
            "--stdin" | "-i" => stdin = args.next(),
            other if other.starts_with('-') => {
                anyhow::bail!("unknown option: {other} (try --help)")
            }
            other => source_file = Some(other.to_string()),
        }
    }

    let source_file = source_file.context("missing SOURCE_FILE argument (try --help)")?;
    Ok(CliArgs {
        source_file,
        config_path,
        tests_path,
        assets_path,
        stdin,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("runbox=info")),
        )
        .init();

    let args = parse_args()?;

    let config = match &args.config_path {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(path)?
        }
        None => Config::default(),
    };
    info!("Execution mode: {}", config.backend.mode_description());

    let source_code = std::fs::read_to_string(&args.source_file)
        .with_context(|| format!("reading {}", args.source_file))?;

    let evaluator = Evaluator::from_config(&config);

    let mut stream = match &args.tests_path {
        Some(path) => {
            let tests_json =
                std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let test_cases: Vec<TestCase> =
                serde_json::from_str(&tests_json).context("parsing test cases")?;

            let global_assets: FileAssets = match &args.assets_path {
                Some(path) => {
                    let assets_json = std::fs::read_to_string(path)
                        .with_context(|| format!("reading {path}"))?;
                    serde_json::from_str(&assets_json).context("parsing file assets")?
                }
                None => FileAssets::new(),
            };

            evaluator.evaluate(source_code, test_cases, global_assets)
        }
        None => evaluator.run_single(source_code, args.stdin.unwrap_or_default()),
    };

    // One JSON object per event; the terminal event decides the exit code.
    let mut all_passed = false;
    while let Some(event) = stream.next_event().await {
        println!("{}", serde_json::to_string(&event)?);
        if let RunEvent::Completed {
            all_passed: passed, ..
        } = &event
        {
            all_passed = *passed;
        }
    }

    if !all_passed {
        std::process::exit(1);
    }
    Ok(())
}
