//! jsrt-host
//!
//! Runs one script, drains its timers, and exits with the script's final value
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use jsrt_host::{Error, HostBuilder, SourceUnit, TracingObserver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Minimal JavaScript host
#[derive(Parser, Debug)]
#[command(name = "jsrt-host")]
#[command(about = "Runs a script with host.echo, host.runScript and setTimeout", long_about = None)]
struct Args {
    /// Limit the engine heap, in bytes
    #[arg(long)]
    max_heap_size: Option<usize>,

    /// Log script compiles and host function entry/exit
    #[arg(long)]
    trace: bool,

    /// Raise log verbosity; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Script to run
    script: PathBuf,

    /// Exposed to the script as host.arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn init_logging(args: &Args) {
    let default = match (args.verbose, args.trace) {
        (0, false) => "jsrt_host=warn",
        (0, true) | (1, _) => "jsrt_host=info",
        (2, _) => "jsrt_host=debug",
        _ => "jsrt_host=trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(args: Args) -> Result<i32, Error> {
    let mut builder = HostBuilder::new().with_arguments(args.args);
    if let Some(bytes) = args.max_heap_size {
        builder = builder.with_max_heap_size(bytes);
    }
    if args.trace {
        builder = builder.with_observer(Rc::new(TracingObserver));
    }

    let mut host = builder.build()?;
    let unit = SourceUnit::load(&args.script)?;
    let value = host.execute(&unit)?;
    let code = host.exit_code(&value)?;
    drop(value);

    host.dispose()?;
    Ok(code)
}

/// Process exit code for the outcome of a run
///
/// Failures print one diagnostic line and give 1
fn exit_status(result: Result<i32, Error>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!("{}", e.as_highlighted());
            eprintln!("jsrt-host: {e}");
            1
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(&args);
    std::process::exit(exit_status(run(args)));
}

#[cfg(test)]
mod test_cli {
    use super::*;
    use std::io::Write;

    fn run_script(source: &str, extra: &[&str]) -> i32 {
        let mut file = tempfile::NamedTempFile::new().expect("Could not create temp file");
        write!(file, "{source}").expect("Could not write script");

        let path = file.path().display().to_string();
        let mut argv = vec!["jsrt-host", path.as_str()];
        argv.extend_from_slice(extra);
        exit_status(run(Args::parse_from(argv)))
    }

    #[test]
    fn test_exit_code_is_final_value() {
        assert_eq!(run_script("3 + 4", &[]), 7);
        assert_eq!(run_script("setTimeout(() => {}, 1); 7.9", &[]), 7);
        assert_eq!(run_script("host.arguments.length", &["a", "-b"]), 2);
    }

    #[test]
    fn test_failures_exit_with_one() {
        assert_eq!(run_script("let x = );", &[]), 1);
        assert_eq!(run_script("throw new Error('boom')", &[]), 1);
        assert_eq!(run_script("setTimeout(() => { throw 1; }, 1); 0", &[]), 1);
        assert_eq!(exit_status(run(Args::parse_from(["jsrt-host", "definitely/not/here.js"]))), 1);
    }
}
