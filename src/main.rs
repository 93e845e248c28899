//! dppconsole - command-line console for Amptek digital pulse processors.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dpp_mca as app;

use app::config::{AppConfig, ConfigLoadResult, Interface};
use app::dpp::session::DppSession;
use app::dpp::RequestKind;

/// Command-line console for Amptek digital pulse processors.
#[derive(Parser)]
#[command(name = "dppconsole")]
struct Cli {
    /// Use dppconsole.toml from current directory (dev mode)
    #[arg(long)]
    dev: bool,

    /// Override the device IP address from the config file
    #[arg(long)]
    address: Option<IpAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Broadcast a NetFinder request and report the device identity
    Find,
    /// Request and print the device status block
    Status,
    /// Read back and print the full hardware configuration
    Config {
        /// Also read back the SCA windows
        #[arg(long)]
        sca: bool,
        /// Write the readback to a configuration file instead of stdout
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Request and print the diagnostic block
    Diagnostics,
    /// Push a configuration file to the hardware
    Load {
        /// Configuration file (falls back to acquisition.config_file)
        file: Option<PathBuf>,
    },
    /// Enable the MCA
    Enable,
    /// Disable the MCA
    Disable,
    /// Clear the spectrum and counters
    Clear,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Determine config path based on mode
    let config_path = if cli.dev {
        tracing::info!("Dev mode: loading config from current directory");
        PathBuf::from("dppconsole.toml")
    } else {
        AppConfig::default_path()
    };

    let mut config = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => {
            tracing::info!("Config loaded from {:?}", config_path);
            config
        }
        ConfigLoadResult::Missing => {
            tracing::info!("No config file at {:?}, using defaults", config_path);
            AppConfig::default()
        }
        ConfigLoadResult::Invalid(e) => {
            anyhow::bail!("Config at {:?} is invalid: {e}", config_path);
        }
    };
    if let Some(address) = cli.address {
        config.connection.address = address.to_string();
    }

    run_command(&cli.command, &config)
}

fn run_command(command: &Command, config: &AppConfig) -> anyhow::Result<()> {
    if let Command::Find = command {
        return find_device(config);
    }

    let mut session = connect(config)?;
    session.send_coarse_fine_gain = config.acquisition.send_coarse_fine_gain;

    let outcome = match command {
        Command::Find => unreachable!("handled above"),
        Command::Status => show_status(&mut session),
        Command::Config { sca, save } => show_config(&mut session, *sca, save.as_deref()),
        Command::Diagnostics => show_diagnostics(&mut session),
        Command::Load { file } => load_file(&mut session, config, file.as_deref()),
        Command::Enable => session.enable_mca().map_err(Into::into),
        Command::Disable => session.disable_mca().map_err(Into::into),
        Command::Clear => session.clear_spectrum().map_err(Into::into),
    };
    session.close().ok();
    outcome
}

fn device_address(config: &AppConfig) -> anyhow::Result<IpAddr> {
    config
        .connection
        .address
        .parse()
        .with_context(|| format!("bad device address '{}'", config.connection.address))
}

fn connect(config: &AppConfig) -> anyhow::Result<DppSession> {
    let mut session = match config.connection.interface {
        Interface::Udp => DppSession::connect_udp(device_address(config)?)?,
        Interface::Usb => DppSession::connect_usb(config.connection.usb_index)?,
        Interface::Serial => DppSession::connect_serial(),
    };
    session.set_receive_timeout(Duration::from_millis(config.connection.timeout_ms));
    // Establish the device variant before any variant-sensitive request
    session.request_status().context("initial status request failed")?;
    Ok(session)
}

fn find_device(config: &AppConfig) -> anyhow::Result<()> {
    let reply = app::dpp::session::discover(device_address(config)?)?;
    println!("Alert level: {}", reply.alert_level);
    for line in &reply.identity {
        println!("{line}");
    }
    Ok(())
}

fn show_status(session: &mut DppSession) -> anyhow::Result<()> {
    let snapshot = session.request_status()?;
    println!("{}", snapshot.render_full_status());
    Ok(())
}

fn show_config(
    session: &mut DppSession,
    sca: bool,
    save: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    if save.is_some() {
        session.readback_format.save_cfg = true;
    } else {
        session.readback_format.display_cfg = true;
    }
    session.readback_format.display_sca = sca;
    let config = session.request_full_configuration()?;

    match save {
        Some(path) => {
            // One command per line: the section loader truncates each
            // line at its first `;`
            let mut out = format!(
                "{}\n{}\n",
                app::dpp::commands::CONFIG_SECTION,
                one_command_per_line(&config)
            );
            if let Some(sca_config) = &session.sca_config {
                out.push_str(&format!(
                    "{}\n{}\n",
                    app::dpp::commands::SCA_SECTION,
                    one_command_per_line(sca_config)
                ));
            }
            std::fs::write(path, out)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("Configuration saved to {}", path.display());
        }
        None => {
            println!("{config}");
            if sca {
                if let Some(sca_config) = &session.sca_config {
                    println!("{sca_config}");
                }
            }
        }
    }
    session.clear_config_read_format_flags();
    Ok(())
}

fn one_command_per_line(command_string: &str) -> String {
    command_string
        .split_inclusive(';')
        .collect::<Vec<_>>()
        .join("\n")
}

fn show_diagnostics(session: &mut DppSession) -> anyhow::Result<()> {
    let snapshot = session.request_diagnostics()?;
    println!("{}", snapshot.render());
    Ok(())
}

fn load_file(
    session: &mut DppSession,
    config: &AppConfig,
    file: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let path = file
        .or(config.acquisition.config_file.as_deref())
        .context("no configuration file given and none set in acquisition.config_file")?;
    session
        .send_configuration_file(path)
        .with_context(|| format!("failed to send {}", path.display()))?;
    // Re-arm acquisition so the new settings take effect cleanly
    session.execute(RequestKind::ClearSpectrum)?;
    tracing::info!("Configuration from {} applied", path.display());
    Ok(())
}
