//! `clap`-derived CLI surface. `serve` is the in-process
//! harness: it loads config, initializes tracing, builds the façade, and
//! drives a line-oriented command loop over stdin — useful for manually
//! exercising the core and for integration tests, but it is not the
//! plugin RPC transport itself (that stays out of scope).

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use mvm_core::Config;
use mvm_runtime::Facade;

use crate::display;
use crate::logging::{self, LogFormat};

#[derive(Parser)]
#[command(
    name = "fleetingd",
    version,
    about = "Disposable-VM pool manager for an external autoscaling runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load config, initialize tracing, and drive the façade command loop
    /// over stdin until `shutdown` or EOF.
    Serve {
        /// Path to the TOML configuration file.
        config: PathBuf,
    },
    /// Validate a configuration file and exit without starting anything.
    CheckConfig {
        /// Path to the TOML configuration file.
        config: PathBuf,
    },
    /// Print shell completion scripts to stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Exposes the `clap::Command` graph for external consumers (man page and
/// shell-completion generation in `xtask`) without re-parsing `std::env::args`.
pub fn command() -> clap::Command {
    Cli::command()
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => serve(config),
        Commands::CheckConfig { config } => check_config(config),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}

fn check_config(path: PathBuf) -> Result<()> {
    let cfg = Config::load(&path)?;
    println!("config ok: egress={} subnet={}", cfg.egress_interface, cfg.vm_subnet);
    Ok(())
}

fn serve(config_path: PathBuf) -> Result<()> {
    let cfg = Config::load(&config_path)?;
    logging::init(LogFormat::parse(&cfg.log_format));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(async_serve(cfg))
}

async fn async_serve(cfg: Config) -> Result<()> {
    let facade = Facade::new(cfg).context("constructing provider façade")?;

    match facade.init() {
        Ok(identity) => display::identity(&identity),
        Err(e) => {
            display::error(&e.to_string());
            return Err(e.into());
        }
    }

    tracing::info!("fleetingd serve loop ready; reading commands from stdin");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    print_prompt();
    while let Some(line) = lines.next() {
        let line = line.context("reading stdin")?;
        let line = line.trim();
        if line.is_empty() {
            print_prompt();
            continue;
        }

        match dispatch(&facade, line).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => display::error(&e.to_string()),
        }
        print_prompt();
    }

    Ok(())
}

fn print_prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

/// Parses and executes one command line. Returns `Ok(true)` when the loop
/// should stop (after a successful `shutdown` or `quit`).
async fn dispatch(facade: &Facade, line: &str) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match verb {
        "increase" => {
            let n: u32 = args
                .first()
                .context("usage: increase <n>")?
                .parse()
                .context("n must be a non-negative integer")?;
            let (booted, err, filter_warning) = facade.increase(n).await;
            display::increase_result(
                booted,
                n,
                err.as_ref().map(|e| e.to_string()).as_deref(),
                filter_warning.as_ref().map(|e| e.to_string()).as_deref(),
            );
        }
        "decrease" => {
            if args.is_empty() {
                anyhow::bail!("usage: decrease <name> [<name>...]");
            }
            let names: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            let destroyed = facade.decrease(&names).await;
            display::decrease_result(&destroyed, &names);
        }
        "update" => {
            let results = facade.update().await;
            display::heartbeats(&results);
        }
        "status" => {
            let names = facade.list_names().await;
            display::instance_names(&names);
        }
        "connect-info" => {
            let name = args.first().context("usage: connect-info <name>")?;
            let info = facade.connect_info(name).await?;
            display::connect_info(name, &info);
        }
        "shutdown" => {
            let destroyed = facade.shutdown().await;
            println!("shutdown complete, destroyed: {}", destroyed.join(", "));
            return Ok(true);
        }
        "quit" | "exit" => return Ok(true),
        "help" => print_help(),
        other => anyhow::bail!("unknown command {other:?}; try 'help'"),
    }
    Ok(false)
}

fn print_help() {
    println!(
        "commands: increase <n> | decrease <name>... | update | status | \
         connect-info <name> | shutdown | quit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            egress_interface: "eth0".to_string(),
            vm_disk_directory: std::env::temp_dir().join("fleetingd-cli-test"),
            vm_subnet: "10.0.0.".to_string(),
            vm_num_cpu_cores: 2,
            vm_memory_mb: 512,
            vm_disk_size_gb: 4,
            vm_prebuild_cloudinit_extra_cmds: vec![],
            vm_enable_virtio_console: false,
            log_format: "pretty".to_string(),
            kernel_url: "https://example.invalid/vmlinux".to_string(),
            disk_image_url: "https://example.invalid/disk.qcow2".to_string(),
            checksum_url: "https://example.invalid/SHA256SUMS".to_string(),
        }
    }

    #[tokio::test]
    async fn status_on_empty_inventory_does_not_stop_the_loop() {
        let facade = Facade::new(sample_config()).unwrap();
        let stop = dispatch(&facade, "status").await.unwrap();
        assert!(!stop);
    }

    #[tokio::test]
    async fn unknown_command_is_an_error_but_does_not_stop_the_loop() {
        let facade = Facade::new(sample_config()).unwrap();
        assert!(dispatch(&facade, "bogus").await.is_err());
    }

    #[tokio::test]
    async fn quit_stops_the_loop() {
        let facade = Facade::new(sample_config()).unwrap();
        let stop = dispatch(&facade, "quit").await.unwrap();
        assert!(stop);
    }

    #[tokio::test]
    async fn shutdown_on_empty_inventory_stops_the_loop_and_destroys_nothing() {
        let facade = Facade::new(sample_config()).unwrap();
        let stop = dispatch(&facade, "shutdown").await.unwrap();
        assert!(stop);
    }

    #[test]
    fn command_graph_includes_serve_subcommand() {
        let cmd = command();
        assert!(cmd.get_subcommands().any(|s| s.get_name() == "serve"));
    }
}
