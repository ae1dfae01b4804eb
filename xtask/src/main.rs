//! Developer task runner (the `cargo xtask` convention). Generates the
//! `fleetingd` man page and shell completion scripts into `dist/` without
//! requiring either to be wired into the release build.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "xtask", about = "Developer tasks for the fleetingd workspace")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the `fleetingd(1)` man page to `dist/man/fleetingd.1`.
    Man {
        #[arg(long, default_value = "dist/man")]
        out_dir: PathBuf,
    },
    /// Render shell completion scripts for every supported shell to
    /// `dist/completions/`.
    Completions {
        #[arg(long, default_value = "dist/completions")]
        out_dir: PathBuf,
    },
    /// Run `man` then `completions` into their default locations.
    Dist,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Man { out_dir } => render_man(&out_dir),
        Command::Completions { out_dir } => render_completions(&out_dir),
        Command::Dist => {
            render_man(Path::new("dist/man"))?;
            render_completions(Path::new("dist/completions"))
        }
    }
}

fn render_man(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let cmd = mvm_cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    let path = out_dir.join("fleetingd.1");
    fs::write(&path, buffer).with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn render_completions(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    for shell in clap_complete::Shell::value_variants() {
        let mut cmd = mvm_cli::command();
        let name = cmd.get_name().to_string();
        let ext = shell
            .to_possible_value()
            .expect("Shell has no hidden/skipped variants")
            .get_name()
            .to_string();
        let path = out_dir.join(format!("fleetingd.{ext}"));
        let mut file = fs::File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        clap_complete::generate(*shell, &mut cmd, name, &mut file);
        println!("wrote {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_man_writes_a_file() {
        let dir = tempfile::tempdir().unwrap();
        render_man(dir.path()).unwrap();
        assert!(dir.path().join("fleetingd.1").exists());
    }

    #[test]
    fn render_completions_writes_one_file_per_shell() {
        let dir = tempfile::tempdir().unwrap();
        render_completions(dir.path()).unwrap();
        assert!(dir.path().join("fleetingd.bash").exists());
        assert!(dir.path().join("fleetingd.zsh").exists());
    }
}
