//! ems-sync entry point: CLI wiring around a config-driven scripted run.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use tracing_subscriber::EnvFilter;

use ems_sync::config::RunConfig;
use ems_sync::io::export::write_table;
use ems_sync::runner::run_scripted;
use ems_sync::sim::results::Table;

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    fail_at: Option<u64>,
    table: Option<String>,
    table_out: Option<PathBuf>,
    #[cfg(feature = "api")]
    serve: bool,
    #[cfg(feature = "api")]
    port: u16,
}

fn print_help() {
    eprintln!("ems-sync - building simulator synchronization engine");
    eprintln!();
    eprintln!("Usage: ems-sync [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load run configuration from a TOML file");
    eprintln!(
        "  --preset <name>          Use a built-in preset ({})",
        RunConfig::PRESETS.join(", ")
    );
    eprintln!("  --seed <u64>             Override the scripted simulator seed");
    eprintln!("  --fail-at <u64>          Make the scripted simulator fail at this step");
    eprintln!("  --table <name>           Select one table or custom view");
    eprintln!("  --table-out <path>       Write tables as CSV (file with --table, else directory)");
    #[cfg(feature = "api")]
    {
        eprintln!("  --serve                  Start REST API server after the run");
        eprintln!("  --port <u16>             API server port (default: 3000)");
    }
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the single_zone preset is used.");
    eprintln!("Log verbosity follows RUST_LOG (default: info).");
}

fn next_value<'a>(args: &'a [String], i: usize, flag: &str, what: &str) -> &'a str {
    match args.get(i) {
        Some(v) => v,
        None => {
            eprintln!("error: {flag} requires {what}");
            process::exit(1);
        }
    }
}

fn parse_u64(value: &str, flag: &str) -> u64 {
    value.parse::<u64>().unwrap_or_else(|_| {
        eprintln!("error: {flag} value \"{value}\" is not a valid u64");
        process::exit(1);
    })
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        preset: None,
        seed_override: None,
        fail_at: None,
        table: None,
        table_out: None,
        #[cfg(feature = "api")]
        serve: false,
        #[cfg(feature = "api")]
        port: 3000,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                i += 1;
                cli.config_path = Some(next_value(&args, i, "--config", "a path argument").to_string());
            }
            "--preset" => {
                i += 1;
                cli.preset = Some(next_value(&args, i, "--preset", "a name argument").to_string());
            }
            "--seed" => {
                i += 1;
                let v = next_value(&args, i, "--seed", "a u64 argument");
                cli.seed_override = Some(parse_u64(v, "--seed"));
            }
            "--fail-at" => {
                i += 1;
                let v = next_value(&args, i, "--fail-at", "a u64 argument");
                cli.fail_at = Some(parse_u64(v, "--fail-at"));
            }
            "--table" => {
                i += 1;
                cli.table = Some(next_value(&args, i, "--table", "a table name").to_string());
            }
            "--table-out" => {
                i += 1;
                cli.table_out = Some(PathBuf::from(next_value(
                    &args,
                    i,
                    "--table-out",
                    "a path argument",
                )));
            }
            #[cfg(feature = "api")]
            "--serve" => {
                cli.serve = true;
            }
            #[cfg(feature = "api")]
            "--port" => {
                i += 1;
                let v = next_value(&args, i, "--port", "a u16 argument");
                if let Ok(p) = v.parse::<u16>() {
                    cli.port = p;
                } else {
                    eprintln!("error: --port value \"{v}\" is not a valid u16");
                    process::exit(1);
                }
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    if cli.config_path.is_some() && cli.preset.is_some() {
        eprintln!("error: --config and --preset are mutually exclusive");
        process::exit(1);
    }

    cli
}

/// Writes one table to stdout under a `# <name>` header line.
fn print_table(out: &mut impl Write, table: &Table, delimiter: u8) -> ems_sync::Result<()> {
    writeln!(out, "# {}", table.name())?;
    write_table(table, &mut *out, delimiter)?;
    writeln!(out)?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cli = parse_args();
    init_tracing();

    // --config takes priority, then --preset, then single_zone
    let loaded = if let Some(ref path) = cli.config_path {
        RunConfig::from_toml_file(Path::new(path))
    } else if let Some(ref name) = cli.preset {
        RunConfig::from_preset(name)
    } else {
        RunConfig::single_zone()
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    if let Some(seed) = cli.seed_override {
        config.simulator.seed = seed;
    }
    if let Some(step) = cli.fail_at {
        config.simulator.fail_at_step = Some(step);
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let outcome = run_scripted(&config).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        process::exit(1);
    });

    println!("{}\n", outcome.engine.summary());

    if !outcome.status.success() {
        eprintln!(
            "error: simulator exited with status {}, no tables collected",
            outcome.status.0
        );
        process::exit(1);
    }

    let tables = outcome
        .engine
        .export(cli.table.as_deref(), cli.table_out.as_deref())
        .unwrap_or_else(|e| {
            eprintln!("error: {e}");
            process::exit(1);
        });

    if let Some(ref path) = cli.table_out {
        eprintln!("{} table(s) written to {}", tables.len(), path.display());
    } else {
        let delimiter = config.delimiter_byte().unwrap_or(b',');
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for table in &tables {
            if let Err(e) = print_table(&mut out, table, delimiter) {
                eprintln!("error: failed to write table {}: {e}", table.name());
                process::exit(1);
            }
        }
    }

    #[cfg(feature = "api")]
    if cli.serve {
        use std::net::SocketAddr;
        use std::sync::Arc;

        let results = outcome.engine.materialize().unwrap_or_else(|e| {
            eprintln!("error: {e}");
            process::exit(1);
        });
        let state = Arc::new(ems_sync::api::AppState {
            summary: outcome.engine.summary(),
            results,
        });
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
        let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
            eprintln!("error: failed to create tokio runtime: {e}");
            process::exit(1);
        });
        rt.block_on(ems_sync::api::serve(state, addr));
    }
}
