//! Operator CLI for the culvert catalog.
//!
//! The only write path to the catalog: registers clients, rotates their
//! keys and edits port mappings. The server picks changes up on the next
//! `RELOAD` through its control socket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::RngCore;

use culvert_catalog::{Catalog, ClientStatus};

#[derive(Parser, Debug)]
#[command(name = "culvert-cli")]
#[command(about = "Manage the culvert catalog of clients and port mappings")]
struct Cli {
    /// Path to the catalog database
    #[arg(long, default_value = "culvert.db", env = "DB_PATH")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage clients
    #[command(subcommand)]
    Client(ClientCommand),

    /// Manage port mappings
    #[command(subcommand)]
    Port(PortCommand),
}

#[derive(Subcommand, Debug)]
enum ClientCommand {
    /// List all clients
    List,

    /// Register a new client and print its generated key
    Add {
        client_id: String,
        /// Human-readable name
        name: String,
    },

    /// Remove a client and all of its port mappings
    Remove { client_id: String },

    /// Block a client from connecting
    Block { client_id: String },

    /// Allow a blocked client to connect again
    Unblock { client_id: String },

    /// Show one client and its ports
    Info { client_id: String },

    /// Generate and print a fresh random key
    RotateKey { client_id: String },

    /// Set a specific key
    SetKey { client_id: String, key: String },
}

#[derive(Subcommand, Debug)]
enum PortCommand {
    /// List port mappings, optionally for one client
    List { client_id: Option<String> },

    /// Add a port mapping (target host defaults to 127.0.0.1)
    Add {
        client_id: String,
        exposed_port: u16,
        target_port: u16,
        target_host: Option<String>,
    },

    /// Remove a port mapping by id
    Remove { port_id: i64 },

    /// Enable a port mapping by id
    Enable { port_id: i64 },

    /// Disable a port mapping by id
    Disable { port_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let catalog = Catalog::open(&cli.db)
        .await
        .with_context(|| format!("Failed to open catalog at {}", cli.db.display()))?;

    match cli.command {
        Commands::Client(command) => run_client_command(&catalog, command).await,
        Commands::Port(command) => run_port_command(&catalog, command).await,
    }
}

async fn run_client_command(catalog: &Catalog, command: ClientCommand) -> Result<()> {
    match command {
        ClientCommand::List => {
            let clients = catalog.list_clients().await?;
            println!(
                "{:<36} {:<20} {:<8} {:<5} {:<19} {:<19}",
                "CLIENT_ID", "NAME", "STATUS", "PORTS", "CREATED", "LAST_SEEN"
            );
            println!("{}", "-".repeat(110));
            for client in clients {
                println!(
                    "{:<36} {:<20} {:<8} {:<5} {:<19} {:<19}",
                    client.client_id,
                    truncate(&client.client_name, 20),
                    client.status,
                    client.port_count,
                    client.created_at,
                    client.last_seen_at.as_deref().unwrap_or("-"),
                );
            }
        }
        ClientCommand::Add { client_id, name } => {
            let key = generate_key();
            catalog.create_client(&client_id, &name, &key).await?;

            println!("Client added successfully!");
            println!();
            println!("=== Client Configuration ===");
            println!("CLIENT_ID={}", client_id);
            println!("AUTH_TOKEN={}", key);
            println!();
            println!("Save the AUTH_TOKEN now! It cannot be recovered.");
        }
        ClientCommand::Remove { client_id } => {
            if !catalog.delete_client(&client_id).await? {
                anyhow::bail!("Client not found");
            }
            println!("Client and all associated ports removed.");
        }
        ClientCommand::Block { client_id } => {
            if !catalog
                .set_client_status(&client_id, ClientStatus::Blocked)
                .await?
            {
                anyhow::bail!("Client not found");
            }
            println!("Client {} is now blocked", client_id);
        }
        ClientCommand::Unblock { client_id } => {
            if !catalog
                .set_client_status(&client_id, ClientStatus::Active)
                .await?
            {
                anyhow::bail!("Client not found");
            }
            println!("Client {} is now active", client_id);
        }
        ClientCommand::Info { client_id } => {
            let client = catalog
                .client(&client_id)
                .await?
                .context("Client not found")?;

            println!("Client ID:   {}", client.client_id);
            println!("Name:        {}", client.client_name);
            println!("Status:      {}", client.status);
            println!("Created:     {}", client.created_at);
            println!(
                "Last Seen:   {}",
                client.last_seen_at.as_deref().unwrap_or("Never")
            );
            println!();
            println!("Ports:");
            print_ports(catalog, Some(&client_id)).await?;
        }
        ClientCommand::RotateKey { client_id } => {
            let key = generate_key();
            if !catalog.set_client_key(&client_id, &key).await? {
                anyhow::bail!("Client not found");
            }
            println!("Key regenerated!");
            println!();
            println!("AUTH_TOKEN={}", key);
            println!();
            println!("Update the client configuration with the new key.");
        }
        ClientCommand::SetKey { client_id, key } => {
            if !catalog.set_client_key(&client_id, &key).await? {
                anyhow::bail!("Client not found");
            }
            println!("Key updated!");
            println!("AUTH_TOKEN={}", key);
        }
    }

    Ok(())
}

async fn run_port_command(catalog: &Catalog, command: PortCommand) -> Result<()> {
    match command {
        PortCommand::List { client_id } => {
            print_ports(catalog, client_id.as_deref()).await?;
        }
        PortCommand::Add {
            client_id,
            exposed_port,
            target_port,
            target_host,
        } => {
            catalog
                .add_port(&client_id, exposed_port, target_host.as_deref(), target_port)
                .await?;
            println!(
                "Port added: server:{} -> {}:{}",
                exposed_port,
                target_host.as_deref().unwrap_or("127.0.0.1"),
                target_port
            );
        }
        PortCommand::Remove { port_id } => {
            if !catalog.remove_port(port_id).await? {
                anyhow::bail!("Port not found");
            }
            println!("Port removed.");
        }
        PortCommand::Enable { port_id } => {
            if !catalog.set_port_enabled(port_id, true).await? {
                anyhow::bail!("Port not found");
            }
            println!("Port enabled");
        }
        PortCommand::Disable { port_id } => {
            if !catalog.set_port_enabled(port_id, false).await? {
                anyhow::bail!("Port not found");
            }
            println!("Port disabled");
        }
    }

    Ok(())
}

async fn print_ports(catalog: &Catalog, client_id: Option<&str>) -> Result<()> {
    let ports = catalog.list_ports(client_id).await?;

    println!(
        "{:<5} {:<36} {:<12} {:<25} {:<8}",
        "ID", "CLIENT_ID", "SERVER_PORT", "TARGET", "ENABLED"
    );
    println!("{}", "-".repeat(90));
    for port in ports {
        println!(
            "{:<5} {:<36} {:<12} {:<25} {:<8}",
            port.id,
            port.client_id,
            port.exposed_port,
            port.target(),
            if port.enabled { "yes" } else { "no" },
        );
    }

    Ok(())
}

fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn truncate(value: &str, max: usize) -> String {
    if value.len() > max {
        format!("{}...", &value[..max - 3])
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key_is_64_hex_chars() {
        let key = generate_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_keys_are_unique() {
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("a very long client name", 10), "a very ...");
    }
}
