//! Plain colored table rendering for the `serve` harness loop — no
//! external tabling crate, since the surface here is three or four
//! fixed-width columns at most.

use colored::Colorize;
use mvm_core::instance::{ConnectInfo, HeartbeatStatus, ProviderIdentity};

pub fn identity(identity: &ProviderIdentity) {
    println!(
        "{} {}  {} {}",
        "provider".bold(),
        identity.name,
        "max_size".bold(),
        identity.max_size
    );
}

pub fn instance_names(names: &[String]) {
    if names.is_empty() {
        println!("{}", "(no instances)".dimmed());
        return;
    }
    for name in names {
        println!("{name}");
    }
}

pub fn heartbeats(results: &[(String, HeartbeatStatus)]) {
    if results.is_empty() {
        println!("{}", "(no instances)".dimmed());
        return;
    }
    for (name, status) in results {
        let colored_status = match status {
            HeartbeatStatus::Running => "running".green(),
            HeartbeatStatus::Creating => "creating".yellow(),
        };
        println!("{name:<12} {colored_status}");
    }
}

pub fn connect_info(name: &str, info: &ConnectInfo) {
    println!("{} {}", "instance".bold(), name);
    println!("  guest_ip   {}", info.guest_ip);
    println!("  ssh_port   {}", info.ssh_port);
    println!("  username   {}", info.username);
    println!("  keepalive  {}s", info.keepalive_secs);
    println!("  timeout    {}s", info.timeout_secs);
    println!("  private key:\n{}", info.private_key_pem.trim_end());
}

pub fn increase_result(booted: u32, requested: u32, error: Option<&str>, filter_warning: Option<&str>) {
    if let Some(err) = error {
        println!(
            "{} booted {}/{} before failing: {}",
            "increase".bold(),
            booted,
            requested,
            err.red()
        );
    } else {
        println!("{} booted {}/{}", "increase".bold(), booted, requested);
    }
    if let Some(warning) = filter_warning {
        println!("  {} {}", "warning:".yellow(), warning);
    }
}

pub fn decrease_result(destroyed: &[String], requested: &[String]) {
    println!(
        "{} destroyed {}/{}: {}",
        "decrease".bold(),
        destroyed.len(),
        requested.len(),
        destroyed.join(", ")
    );
}

pub fn error(message: &str) {
    eprintln!("{} {message}", "error".red().bold());
}
