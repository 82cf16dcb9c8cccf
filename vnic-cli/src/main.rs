use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tabled::{Table, Tabled};

use vnicd::MacAddr;
use vnicd::config::DEFAULT_CONTROL_SOCKET;
use vnicd::control::{Command, ControlCommand, ControlReply, Request, Response, request};
use vnicd::status::{InterfaceStats, StatusRow, render_table};

#[derive(Parser)]
#[command(name = "vnicctl")]
#[command(about = "Control switch-port virtual interfaces", long_about = None)]
struct Cli {
    /// Control socket of the vnicd daemon
    #[arg(short, long, default_value = DEFAULT_CONTROL_SOCKET)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a virtual interface for a switch port
    Add {
        /// Physical interface the switch is attached to
        physical: String,

        /// Name prefix; the port number is appended
        prefix: String,

        /// Switch port
        port: u16,
    },

    /// Delete a virtual interface
    Delete {
        /// Name prefix used when the interface was added
        prefix: String,

        /// Switch port
        port: u16,
    },

    /// List virtual interfaces
    Status {
        /// Plain text layout instead of a table
        #[arg(long)]
        plain: bool,
    },

    /// Show per-interface counters
    Stats,

    /// Bring a virtual interface up
    Open {
        /// Interface name
        name: String,
    },

    /// Bring a virtual interface down
    Stop {
        /// Interface name
        name: String,
    },

    /// Change the hardware address of a virtual interface (must be down)
    SetMac {
        /// Interface name
        name: String,

        /// New address, e.g. 02:00:00:00:00:01
        mac: MacAddr,
    },
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PORT")]
    port: u16,
    #[tabled(rename = "PHYSICAL")]
    physical: String,
}

impl From<StatusRow> for StatusTableRow {
    fn from(row: StatusRow) -> Self {
        Self {
            name: row.virtual_interface_name,
            port: row.port,
            physical: row.physical_interface_name,
        }
    }
}

#[derive(Tabled)]
struct StatsTableRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "RX PKTS")]
    rx_packets: u64,
    #[tabled(rename = "RX BYTES")]
    rx_bytes: u64,
    #[tabled(rename = "RX ERR")]
    rx_errors: u64,
    #[tabled(rename = "TX PKTS")]
    tx_packets: u64,
    #[tabled(rename = "TX BYTES")]
    tx_bytes: u64,
    #[tabled(rename = "TX ERR")]
    tx_errors: u64,
}

impl From<InterfaceStats> for StatsTableRow {
    fn from(stats: InterfaceStats) -> Self {
        Self {
            name: stats.name,
            state: if stats.up { "up" } else { "down" }.to_string(),
            mac: stats.mac.to_string(),
            rx_packets: stats.counters.rx_packets,
            rx_bytes: stats.counters.rx_bytes,
            rx_errors: stats.counters.rx_errors,
            tx_packets: stats.counters.tx_packets,
            tx_bytes: stats.counters.tx_bytes,
            tx_errors: stats.counters.tx_errors,
        }
    }
}

fn print_reply(reply: ControlReply, success: &str) {
    if reply.ok {
        println!("{success}");
        return;
    }
    let code = reply
        .code
        .map(|c| serde_json::to_string(&c).unwrap_or_default())
        .unwrap_or_default();
    eprintln!(
        "Error: {} {}",
        reply.message.unwrap_or_else(|| "request failed".to_string()),
        code.trim_matches('"')
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (req, success) = match cli.command {
        Commands::Add {
            physical,
            prefix,
            port,
        } => (
            Request::Command(ControlCommand {
                cmd: Command::Add,
                physical_interface_name: physical,
                virtual_interface_name_prefix: prefix.clone(),
                port,
            }),
            format!("Created {prefix}{port}"),
        ),
        Commands::Delete { prefix, port } => (
            Request::Command(ControlCommand {
                cmd: Command::Delete,
                physical_interface_name: String::new(),
                virtual_interface_name_prefix: prefix.clone(),
                port,
            }),
            format!("Deleted {prefix}{port}"),
        ),
        Commands::Status { plain } => {
            let Response::Status { rows } = send(&cli.socket, &Request::Status).await? else {
                return Err("unexpected response to status request".into());
            };
            if plain {
                print!("{}", render_table(&rows));
            } else if rows.is_empty() {
                println!("No virtual interfaces");
            } else {
                let rows: Vec<StatusTableRow> = rows.into_iter().map(Into::into).collect();
                println!("{}", Table::new(rows));
            }
            return Ok(());
        }
        Commands::Stats => {
            let Response::Stats { interfaces, drops } = send(&cli.socket, &Request::Stats).await?
            else {
                return Err("unexpected response to stats request".into());
            };
            if !interfaces.is_empty() {
                let rows: Vec<StatsTableRow> = interfaces.into_iter().map(Into::into).collect();
                println!("{}", Table::new(rows));
            }
            println!(
                "Dropped: {} malformed, {} unknown port, {} wrong uplink",
                drops.malformed, drops.not_found, drops.mismatch
            );
            return Ok(());
        }
        Commands::Open { name } => (
            Request::Open { name: name.clone() },
            format!("{name} is up"),
        ),
        Commands::Stop { name } => (
            Request::Stop { name: name.clone() },
            format!("{name} is down"),
        ),
        Commands::SetMac { name, mac } => (
            Request::SetMac {
                name: name.clone(),
                mac,
            },
            format!("{name} now uses {mac}"),
        ),
    };

    match send(&cli.socket, &req).await? {
        Response::Reply(reply) => print_reply(reply, &success),
        _ => return Err("unexpected response".into()),
    }
    Ok(())
}

async fn send(socket: &Path, req: &Request) -> Result<Response, Box<dyn std::error::Error>> {
    request(socket, req)
        .await
        .map_err(|e| format!("{}: {e}", socket.display()).into())
}
