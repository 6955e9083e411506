mod logging;

use anyhow::Context;
use clap::Parser;
use rowbridge_core::{Bridge, BridgeConfig, BridgeError, ScanOptions, ScanOverrides};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "rowbridge",
    version,
    about = "Run SQL through a dynamically loaded driver",
    disable_help_subcommand = true
)]
struct Cli {
    /// Read settings and scan options from a TOML file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Driver class exported by the driver library
    #[arg(short = 'd', long = "driver", value_name = "CLASS")]
    driver: Option<String>,

    /// Driver libraries, joined by the platform path separator
    #[arg(short = 'p', long = "driver-path", value_name = "PATHS")]
    driver_path: Option<String>,

    #[arg(short = 'u', long, value_name = "URL")]
    url: Option<String>,

    #[arg(long, value_name = "USER")]
    user: Option<String>,

    #[arg(long, env = "ROWBRIDGE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(short = 'q', long, value_name = "SQL", conflicts_with = "table")]
    query: Option<String>,

    /// Scan a whole table instead of running a query
    #[arg(long, value_name = "NAME")]
    table: Option<String>,

    /// Statement timeout in seconds; 0 uses the configured default
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Text printed for NULL columns
    #[arg(long, value_name = "TEXT")]
    null_marker: Option<String>,

    /// Print the EXPLAIN form of the query instead of running it
    #[arg(long)]
    explain: bool,
}

impl Cli {
    fn overrides(&self) -> ScanOverrides {
        fn push(list: &mut Vec<(String, String)>, name: &str, value: Option<&str>) {
            if let Some(value) = value {
                list.push((name.to_string(), value.to_string()));
            }
        }

        let mut out = ScanOverrides::default();
        push(&mut out.server, "drivername", self.driver.as_deref());
        push(&mut out.server, "driverpath", self.driver_path.as_deref());
        push(&mut out.server, "url", self.url.as_deref());
        push(&mut out.user_mapping, "username", self.user.as_deref());
        push(&mut out.user_mapping, "password", self.password.as_deref());
        push(&mut out.table, "query", self.query.as_deref());
        push(&mut out.table, "table", self.table.as_deref());
        let timeout = self.timeout.map(|t| t.to_string());
        push(&mut out.table, "querytimeout", timeout.as_deref());
        out
    }
}

fn load(cli: &Cli) -> Result<(BridgeConfig, ScanOptions), BridgeError> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load_from_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(marker) = &cli.null_marker {
        config = config.set_null_marker(marker.clone());
    }
    let scan = config.scan_options(&cli.overrides())?;
    Ok((config, scan))
}

fn render_row(row: &[Option<String>], null_marker: &str) -> String {
    row.iter()
        .map(|v| v.as_deref().unwrap_or(null_marker))
        .collect::<Vec<_>>()
        .join("\t")
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let (config, scan) = match load(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("rowbridge: {}", e.message());
            if let Some(details) = e.details() {
                eprintln!("{details}");
            }
            return Ok(ExitCode::from(2));
        }
    };
    debug!(?scan, "scan options");

    if cli.explain {
        println!("{}", scan.explain_query());
        return Ok(ExitCode::SUCCESS);
    }

    let null_marker = config.null_marker.clone();
    let bridge = Bridge::new(config);
    let mut session = bridge.session();
    let reply = session.initialize_request(&scan.to_request());
    if let Some(diagnostic) = reply.diagnostic {
        match session.last_error() {
            Some(failure) => eprintln!("rowbridge: {failure}"),
            None => eprintln!("rowbridge: {diagnostic}"),
        }
        return Ok(ExitCode::from(1));
    }

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    while let Some(row) = session.next_row() {
        let written = writeln!(out, "{}", render_row(&row, &null_marker));
        if let Err(e) = written {
            // reader went away; stop the query instead of draining it
            let _ = session.cancel();
            return Err(e).context("failed to write row");
        }
    }
    out.flush().context("failed to flush output")?;

    let mut code = ExitCode::SUCCESS;
    if let Some(failure) = session.last_error() {
        eprintln!("rowbridge: {failure}");
        code = ExitCode::from(1);
    }
    if let Some(diagnostic) = session.close() {
        eprintln!("rowbridge: {diagnostic}");
        code = ExitCode::from(1);
    }
    Ok(code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_stderr_logging();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("rowbridge: {e:#}");
            ExitCode::from(1)
        }
    }
}
