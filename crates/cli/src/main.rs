//! Daily Fresh CLI - Database migrations and seeding.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! df-cli migrate
//!
//! # Insert a SKU for local testing
//! df-cli seed sku --name "Strawberries 500g" --goods-id 1 --unit box --price 12.50 --stock 40
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `seed sku` - Insert a SKU

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

use commands::seed::NewSku;

#[derive(Parser)]
#[command(name = "df-cli")]
#[command(author, version, about = "Daily Fresh CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Seed the database with test data
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Insert one SKU
    Sku {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Goods (SPU) the SKU belongs to
        #[arg(short, long)]
        goods_id: i32,

        /// Sales unit, e.g. `kg` or `box`
        #[arg(short, long, default_value = "unit")]
        unit: String,

        /// Unit price, e.g. `12.50`
        #[arg(short, long)]
        price: String,

        /// Initial stock
        #[arg(short, long, default_value_t = 0)]
        stock: u32,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Seed { target } => match target {
            SeedTarget::Sku {
                name,
                goods_id,
                unit,
                price,
                stock,
            } => {
                commands::seed::sku(&NewSku {
                    name,
                    goods_id,
                    unit,
                    price,
                    stock,
                })
                .await?;
            }
        },
    }
    Ok(())
}
