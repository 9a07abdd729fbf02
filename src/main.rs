//! Pathwatch CLI - dual-path network monitor.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::signal;
use tokio::sync::broadcast;

use pathwatch::cli::*;
use pathwatch::config::{init_logging, Config, LoggingConfig};
use pathwatch::error::Result;
use pathwatch::path::{PathEvent, DEFAULT_ACQUIRE_TIMEOUT};
use pathwatch::probe::{EndpointStats, ProbeEvent};
use pathwatch::status::StatusSnapshot;
use pathwatch::types::{ConnectionStatus, Endpoint};
use pathwatch::util;
use pathwatch::{Monitor, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_config = LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format.as_str().into(),
        color: !cli.no_color,
    };
    init_logging(&log_config)?;

    // Load config if specified
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(2);
        }
    };

    // Dispatch command
    match cli.command {
        Commands::Run(args) => run_monitor(args, config).await,
        Commands::Check(args) => {
            let code = match run_check(args, config).await {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("{} {}", "✗".red(), e);
                    2
                }
            };
            std::process::exit(code);
        }
        Commands::Interfaces(args) => run_interfaces(args),
        Commands::Config(args) => run_config(args, config),
        Commands::Completions(args) => run_completions(args),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    if let Some(path) = path {
        Config::load(path)
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())
    } else {
        tracing::debug!("no config file found, using defaults");
        Ok(Config::default())
    }
}

fn apply_overrides(
    config: &mut Config,
    ssid: Option<String>,
    link_interface: Option<String>,
    wan_interface: Option<String>,
) {
    if let Some(ssid) = ssid {
        config.local_link.ssid = ssid;
    }
    if let Some(interface) = link_interface {
        config.local_link.interface = Some(interface);
    }
    if let Some(interface) = wan_interface {
        config.wide_area.interface = Some(interface);
    }
}

/// Hold both paths and probe until Ctrl+C
async fn run_monitor(args: RunArgs, mut config: Config) -> Result<()> {
    apply_overrides(&mut config, args.ssid, args.link_interface, args.wan_interface);
    if let Some(ms) = args.interval_ms {
        config.probing.interval = Duration::from_millis(ms);
    }
    config.validate()?;

    if !args.json {
        println!(
            "{}",
            "╔══════════════════════════════════════════╗".bright_cyan()
        );
        println!(
            "{}",
            "║     PATHWATCH MONITOR                    ║".bright_cyan()
        );
        println!(
            "{}",
            format!("║     Version {}                        ║", VERSION).bright_cyan()
        );
        println!(
            "{}",
            "╚══════════════════════════════════════════╝".bright_cyan()
        );
        println!();

        if !args.no_local_link {
            if let Some(ref interface) = config.local_link.interface {
                println!(
                    "  {} local link: interface {}",
                    "→".cyan(),
                    interface.bright_white()
                );
            } else if config.local_link.ssid.is_empty() {
                println!("  {} local link: no ssid configured", "⚠".yellow());
            } else {
                println!(
                    "  {} local link: ssid {}",
                    "→".cyan(),
                    config.local_link.ssid.bright_white()
                );
            }
        }
        if !args.no_wide_area {
            match config.wide_area.interface {
                Some(ref interface) => println!(
                    "  {} wide area: interface {}",
                    "→".cyan(),
                    interface.bright_white()
                ),
                None => println!("  {} wide area: default route", "→".cyan()),
            }
        }
        println!(
            "  {} controller: {}",
            "→".cyan(),
            config.controller.url.dimmed()
        );
        println!(
            "  {} devices: {} / {}",
            "→".cyan(),
            config.devices.a.display_label(),
            config.devices.b.display_label()
        );
        println!();
    }

    let monitor = Monitor::new(config);

    // Subscribe before requesting so no grant or denial is missed.
    let mut path_events = monitor.path_events();
    let mut probe_events = monitor.probe_events();

    let want_local = !args.no_local_link;
    let want_wide = !args.no_wide_area;

    if want_local {
        monitor.connect_local_link();
    }
    if want_wide {
        monitor.request_wide_area();
    }

    if want_local || want_wide {
        let spinner = (!args.json).then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.cyan} {msg}")
                    .unwrap(),
            );
            spinner.set_message("Acquiring paths...");
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });

        let (local, wide) =
            await_settlement(&mut path_events, want_local, want_wide, DEFAULT_ACQUIRE_TIMEOUT)
                .await;

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
            if want_local {
                print_path_line("local link", local.as_ref());
            }
            if want_wide {
                print_path_line("wide area", wide.as_ref());
            }
            println!();
        }
    }

    monitor.start_probing();

    // Setup shutdown handler
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    if args.watch {
        println!(
            "{} Probing every {}. Press Ctrl+C to stop.",
            "●".green(),
            util::format_duration(monitor.config().probing.interval)
        );
        println!();
        watch_loop(&monitor, &mut probe_events, &mut shutdown_rx).await;
    } else {
        if !args.json {
            println!(
                "{} Probing every {}. Press Ctrl+C to stop.",
                "●".green(),
                util::format_duration(monitor.config().probing.interval)
            );
        }
        change_loop(
            &monitor,
            &mut path_events,
            &mut probe_events,
            &mut shutdown_rx,
            args.json,
        )
        .await;
    }

    if !args.json {
        println!();
        println!("{} Releasing paths...", "→".yellow());
    }
    monitor.shutdown();
    if !args.json {
        println!("{} Stopped.", "●".yellow());
    }

    Ok(())
}

/// Redraw the status table after every completed probe round.
async fn watch_loop(
    monitor: &Monitor,
    probe_events: &mut broadcast::Receiver<ProbeEvent>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let term = Term::stdout();
    let mut drawn = 0usize;

    loop {
        tokio::select! {
            event = probe_events.recv() => match event {
                Ok(ProbeEvent::TickCompleted { .. }) => {
                    if drawn > 0 {
                        let _ = term.clear_last_lines(drawn);
                    }
                    drawn = draw_status_table(&monitor.status(), &monitor.stats());
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_rx.recv() => break,
        }
    }
}

/// Print one line (or one JSON object) per status cell change.
async fn change_loop(
    monitor: &Monitor,
    path_events: &mut broadcast::Receiver<PathEvent>,
    probe_events: &mut broadcast::Receiver<ProbeEvent>,
    shutdown_rx: &mut broadcast::Receiver<()>,
    json: bool,
) {
    let mut last = monitor.status();

    loop {
        tokio::select! {
            event = path_events.recv() => {
                if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                    break;
                }
            }
            event = probe_events.recv() => {
                if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                    break;
                }
            }
            _ = shutdown_rx.recv() => break,
        }

        let now = monitor.status();
        for (endpoint, status) in now.cells() {
            if last.get(endpoint) == status {
                continue;
            }
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "endpoint": endpoint.to_string(),
                        "status": status,
                    })
                );
            } else {
                println!(
                    "  {} {:<12} {}",
                    status_icon(status),
                    endpoint.to_string(),
                    format_status(status)
                );
            }
        }
        last = now;
    }
}

/// Wait until each requested path reports a grant or a denial.
///
/// Returns `(local, wide)`; `None` means the path was not requested or did
/// not settle before the timeout.
async fn await_settlement(
    events: &mut broadcast::Receiver<PathEvent>,
    want_local: bool,
    want_wide: bool,
    timeout: Duration,
) -> (Option<PathEvent>, Option<PathEvent>) {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut local = None;
    let mut wide = None;

    while (want_local && local.is_none()) || (want_wide && wide.is_none()) {
        let event = tokio::select! {
            event = events.recv() => event,
            () = tokio::time::sleep_until(deadline) => break,
        };
        match event {
            Ok(event) => {
                if matches!(event, PathEvent::Granted { .. } | PathEvent::Denied { .. }) {
                    if event.kind().is_local() {
                        local = Some(event);
                    } else {
                        wide = Some(event);
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    (local, wide)
}

fn print_path_line(name: &str, event: Option<&PathEvent>) {
    match event {
        Some(PathEvent::Granted { handle }) => {
            println!(
                "  {} {} on {}",
                "✓".green(),
                name,
                handle.interface.bright_white()
            );
        }
        Some(PathEvent::Denied { reason, .. }) => {
            println!("  {} {}: {}", "✗".red(), name, reason.red());
        }
        _ => {
            println!("  {} {}: still acquiring", "◐".yellow(), name);
        }
    }
}

/// Acquire both paths, run one probe round, report, exit.
///
/// Exit codes: 0 all endpoints connected, 1 some endpoint down, 2 on
/// config or setup errors.
async fn run_check(args: CheckArgs, mut config: Config) -> Result<i32> {
    apply_overrides(&mut config, args.ssid, args.link_interface, args.wan_interface);
    config.validate()?;

    let monitor = Monitor::new(config);
    let mut path_events = monitor.path_events();
    let mut probe_events = monitor.probe_events();

    monitor.connect_local_link();
    monitor.request_wide_area();

    let timeout = Duration::from_secs(args.timeout);
    let _ = await_settlement(&mut path_events, true, true, timeout).await;

    // The first tick fires immediately, so one round is one TickCompleted.
    monitor.start_probing();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        tokio::select! {
            event = probe_events.recv() => match event {
                Ok(ProbeEvent::TickCompleted { .. }) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            () = tokio::time::sleep_until(deadline) => break,
        }
    }
    monitor.stop_probing();

    let snapshot = monitor.status();
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&monitor.report()).unwrap_or_default()
        );
    } else {
        draw_status_table(&snapshot, &monitor.stats());
    }

    let code = if snapshot.all_connected() { 0 } else { 1 };
    monitor.shutdown();
    Ok(code)
}

/// Draw the four-row status table with per-endpoint probe aggregates.
/// Returns the number of lines printed so a watch loop can clear them
/// before the next draw.
fn draw_status_table(snapshot: &StatusSnapshot, stats: &[(Endpoint, EndpointStats)]) -> usize {
    println!("{}", "─".repeat(50).dimmed());
    for (endpoint, status) in snapshot.cells() {
        let aggregates = stats
            .iter()
            .find(|(e, _)| *e == endpoint)
            .map(|(_, entry)| {
                format!(
                    "ewma {}ms, {:.0}% ok",
                    entry.latency_ms,
                    entry.availability_pct()
                )
                .dimmed()
                .to_string()
            })
            .unwrap_or_default();
        println!(
            "  {} {:<12} {:<24} {}",
            status_icon(status),
            endpoint.to_string(),
            format_status(status),
            aggregates
        );
    }
    println!("{}", "─".repeat(50).dimmed());
    6
}

fn status_icon(status: &ConnectionStatus) -> colored::ColoredString {
    match status {
        ConnectionStatus::Connected { .. } => "●".green(),
        ConnectionStatus::Connecting => "◐".yellow(),
        ConnectionStatus::Disconnected { .. } => "○".red(),
        ConnectionStatus::Unknown => "○".dimmed(),
    }
}

fn format_status(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Unknown => "unknown".dimmed().to_string(),
        ConnectionStatus::Connecting => "connecting".yellow().to_string(),
        ConnectionStatus::Connected {
            latency_ms: Some(ms),
        } => format!("{} {}", "connected".green(), format!("({ms}ms)").dimmed()),
        ConnectionStatus::Connected { latency_ms: None } => "connected".green().to_string(),
        ConnectionStatus::Disconnected {
            reason: Some(reason),
        } => format!("{} {}", "down".red(), format!("({reason})").dimmed()),
        ConnectionStatus::Disconnected { reason: None } => "down".red().to_string(),
    }
}

/// List network interfaces
fn run_interfaces(args: InterfacesArgs) -> Result<()> {
    let interfaces = if args.all {
        util::get_network_interfaces()
    } else {
        util::get_usable_interfaces()
    };

    if args.json {
        let entries: Vec<_> = interfaces
            .iter()
            .map(|iface| {
                serde_json::json!({
                    "name": iface.name,
                    "address": iface.address.to_string(),
                    "type": format!("{:?}", iface.interface_type),
                    "up": iface.is_up,
                    "running": iface.is_running,
                    "wireless": iface.is_wireless,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
        return Ok(());
    }

    println!("{}", "Network Interfaces:".bright_white().bold());
    if interfaces.is_empty() {
        println!("  {} No usable network interfaces found", "⚠".yellow());
        return Ok(());
    }

    for iface in &interfaces {
        let status = if iface.is_running {
            "running".green()
        } else if iface.is_up {
            "up".yellow()
        } else {
            "down".dimmed()
        };
        let type_str = format!("{:?}", iface.interface_type).dimmed();

        println!(
            "  {} {} ({}) - {} [{}]",
            if iface.is_up {
                "●".green()
            } else {
                "○".dimmed()
            },
            iface.name.bright_white(),
            iface.address,
            type_str,
            status
        );
    }

    Ok(())
}

/// Show the effective configuration
fn run_config(args: ConfigArgs, config: Config) -> Result<()> {
    if args.path {
        println!("{}", Config::default_path().display());
        return Ok(());
    }

    if args.init {
        let path = args.output.unwrap_or_else(Config::default_path);
        if path.exists() {
            return Err(pathwatch::Error::Config(format!(
                "refusing to overwrite {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, pathwatch::config::EXAMPLE_TOML)?;
        println!(
            "{} Example configuration written to {}",
            "✓".green(),
            path.display()
        );
        return Ok(());
    }

    println!("{}", toml::to_string_pretty(&config).unwrap_or_default());

    Ok(())
}

/// Generate shell completions
fn run_completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::generate;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    let shell = match args.shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
    };

    generate(shell, &mut cmd, name, &mut std::io::stdout());

    Ok(())
}
