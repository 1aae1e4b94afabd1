// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod runtime;

use anyhow::{Context, Result, anyhow};
use config::Config;
use dynaform_app::FormSession;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `dynaform --print-example-config` to generate a v1 template",
            options.config_path.display()
        )
    })?;

    let log_target = match config.log_file() {
        Some(path) => LogTarget::File(path),
        None if options.check_only => LogTarget::Stderr,
        None => LogTarget::Off,
    };
    init_tracing(&log_target)?;

    let form_id = config.form_id(options.form.as_deref())?;
    let mut client = runtime::build_client(&config).with_context(|| {
        format!(
            "invalid [server] or [session] config in {}; fix base_url/timeout/token_env values",
            options.config_path.display()
        )
    })?;
    tracing::info!(form = %form_id, base_url = client.base_url(), "starting");

    if options.check_only {
        let report = runtime::check(&mut client, &form_id)?;
        tracing::info!(
            fields = report.fields,
            records = report.total_records,
            "check passed"
        );
        println!("{report}");
        return Ok(());
    }

    let mut session = FormSession::open(&mut client, &form_id).with_context(|| {
        format!(
            "open form {form_id:?} at {} -- check [server].base_url and the form id",
            client.base_url()
        )
    })?;
    dynaform_tui::run_app(&mut session, &mut client)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    Off,
    Stderr,
    File(PathBuf),
}

fn env_bool(name: &str) -> bool {
    env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Logs never go to the terminal while the TUI owns it.
fn init_tracing(target: &LogTarget) -> Result<()> {
    let (writer, ansi) = match target {
        LogTarget::Off => return Ok(()),
        LogTarget::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogTarget::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = if env_bool("DYNAFORM_LOG_JSON") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init()
    };
    result.map_err(|error| anyhow!("initialize logging: {error}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    form: Option<String>,
    print_config_path: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        form: None,
        print_config_path: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--form" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--form requires a form id"))?;
                options.form = Some(value.as_ref().to_owned());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("dynaform");
    println!("  --config <path>          Use a specific config path");
    println!("  --form <id>              Open this form instead of [form].id");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a v1 config template");
    println!("  --check                  Validate config and load the first page");
    println!("  --help                   Show this help");
}
