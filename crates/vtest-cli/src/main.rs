mod smoke;

use clap::{Parser, Subcommand};
use tracing::info;

use vtest_core::config::{default_config_path, VtestConfig};
use vtest_transport::{Renderer, VtestRenderer};

#[derive(Parser)]
#[command(name = "vtest")]
#[command(about = "vtest - probe a venus rendering server over its unix socket")]
#[command(version)]
struct Cli {
    /// Server socket path (overrides config and VTEST_SOCKET_NAME)
    #[arg(short, long, global = true)]
    socket: Option<String>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, run the handshake and print what the host reports
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Exercise syncs and a mappable blob against a running host
    Smoke {
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    vtest_common::init_logging();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let mut config = VtestConfig::load_or_default(&config_path).with_env_overrides();
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    match cli.command {
        Commands::Info { json } => {
            info!("querying renderer at {}", config.socket_path);

            let renderer = VtestRenderer::connect(&config)
                .map_err(|e| anyhow::anyhow!("{}: {}", config.socket_path, e))?;
            let info = renderer.info();

            if json {
                let report = serde_json::json!({
                    "socket": config.socket_path,
                    "protocol_version": renderer.protocol_version(),
                    "info": info,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Connected to vtest server at {}", config.socket_path);
                println!();
                println!("  Protocol version:   {}", renderer.protocol_version());
                println!(
                    "  PCI id:             {:04x}:{:04x}",
                    info.pci_vendor_id, info.pci_device_id
                );
                println!("  Sync queues:        {}", info.max_sync_queue_count);
                println!("  Timeline syncs:     {}", info.has_timeline_sync);
                println!("  Dma-buf import:     {}", info.has_dmabuf_import);
                println!("  External syncs:     {}", info.has_external_sync);
                println!();
                println!("  Venus capset:");
                println!("    Wire format:      {}", info.wire_format_version);
                println!("    vk.xml:           {}", fmt_vk_version(info.vk_xml_version));
                println!(
                    "    Cmd serialization: {}",
                    info.vk_ext_command_serialization_spec_version
                );
                println!(
                    "    Venus protocol:   {}",
                    info.vk_mesa_venus_protocol_spec_version
                );
            }
        }

        Commands::Smoke { json } => {
            smoke::run_smoke(&config, json)?;
        }
    }

    Ok(())
}

fn fmt_vk_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        version >> 22,
        (version >> 12) & 0x3ff,
        version & 0xfff
    )
}
