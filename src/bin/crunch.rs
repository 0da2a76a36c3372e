use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crunch::{CrunchError, Engine, OpenOptions};

/// Run SQL statements against an embedded database and print rows as JSON
/// lines.
#[derive(Parser, Debug)]
#[command(name = "crunch", version)]
struct Args {
    /// Database file; an in-memory database when omitted.
    #[arg(long)]
    db: Option<String>,
    #[arg(long)]
    read_only: bool,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,
    /// Statements to run, in order.
    #[arg(required = true)]
    sql: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("crunch: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), CrunchError> {
    let options = OpenOptions::builder().read_only(args.read_only);
    let options = match &args.db {
        Some(path) => options.path(path.as_str()),
        None => options,
    }
    .finish()?;

    let engine = Engine::initialize()?;
    let conn = engine.open(&options)?;
    tracing::info!(version = %engine.version(), uri = conn.uri(), "database open");

    let mut out = io::stdout().lock();
    for sql in &args.sql {
        for row in conn.query(sql)? {
            serde_json::to_writer(&mut out, &row?).map_err(io::Error::from)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    drop(out);
    conn.close()
}
