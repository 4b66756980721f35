use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dhcp6pool::{BindingPool, Config, Error, NullBindingStore, PoolSet, Result};

#[derive(Parser)]
#[command(name = "dhcp6pool")]
#[command(author, version, about = "DHCPv6 address and prefix pool inspector", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "pools.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print every pool with its size.
    Check,
    ShowConfig,
    /// Allocate from every pool until exhausted or `count` bindings are made.
    Simulate {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => {
            let pools = PoolSet::from_config(&config, Arc::new(NullBindingStore))?;

            println!(
                "{:<48} {:<8} {:<10} {:<10} {:<40}",
                "Range", "Kind", "Preferred", "Valid", "Capacity"
            );
            println!("{}", "-".repeat(118));
            for pool in pools.address_pools() {
                println!(
                    "{:<48} {:<8} {:<10} {:<10} {:<40}",
                    pool.to_string(),
                    "address",
                    pool.preferred_lifetime(),
                    pool.valid_lifetime(),
                    pool.stats().await.capacity
                );
            }
            for pool in pools.prefix_pools() {
                println!(
                    "{:<48} {:<8} {:<10} {:<10} {:<40}",
                    pool.to_string(),
                    format!("/{}", pool.prefix_length()),
                    pool.preferred_lifetime(),
                    pool.valid_lifetime(),
                    pool.stats().await.capacity
                );
            }

            pools.shutdown().await;
            Ok(())
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Simulate { count } => {
            let pools = PoolSet::from_config(&config, Arc::new(NullBindingStore))?;

            for pool in pools.address_pools() {
                info!("Simulating {} allocation(s) from {}", count, pool);
                for _ in 0..count {
                    match pool.allocate().await {
                        Ok(addr) => {
                            pool.schedule_expiration(addr, u64::from(pool.valid_lifetime()))
                                .await?;
                            println!("{:<40} {}", addr, pool);
                        }
                        Err(Error::PoolExhausted) => {
                            warn!("Pool {} exhausted", pool);
                            break;
                        }
                        Err(error) => return Err(error),
                    }
                }
                let stats = pool.stats().await;
                println!("{}: {} used, {} free", pool, stats.used(), stats.free);
            }

            for pool in pools.prefix_pools() {
                info!("Simulating {} delegation(s) from {}", count, pool);
                for _ in 0..count {
                    match pool.allocate().await {
                        Ok(prefix) => {
                            pool.schedule_expiration(prefix, u64::from(pool.valid_lifetime()))
                                .await?;
                            println!("{:<40} {}", prefix.to_string(), pool);
                        }
                        Err(Error::PoolExhausted) => {
                            warn!("Pool {} exhausted", pool);
                            break;
                        }
                        Err(error) => return Err(error),
                    }
                }
                let stats = pool.stats().await;
                println!("{}: {} used, {} free", pool, stats.used(), stats.free);
            }

            pools.shutdown().await;
            Ok(())
        }
    }
}
