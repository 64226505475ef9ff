//! mysite CLI - Database migrations, user management and demo commands.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! mysite-cli migrate
//!
//! # Create a user and grant a permission
//! mysite-cli user create -u steef -p 'correct horse' --staff
//! mysite-cli user grant -u steef -P shop.add_product
//!
//! # Demo commands
//! mysite-cli create-order
//! mysite-cli agg
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `user` / `group` - Manage users, groups and permissions
//! - `agg`, `bulk-actions`, `create-order`, `selecting-fields` - Demo queries

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mysite-cli")]
#[command(author, version, about = "mysite CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage groups
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Print product count and total per order
    Agg,
    /// Discount every smartphone
    BulkActions,
    /// Get or create the demo order
    CreateOrder,
    /// Print all usernames
    SelectingFields,
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a new user
    Create {
        /// Username
        #[arg(short, long)]
        username: String,

        /// Password (at least 8 characters, not all digits)
        #[arg(short, long)]
        password: String,

        /// Mark the user as staff
        #[arg(long)]
        staff: bool,

        /// Mark the user as superuser
        #[arg(long)]
        superuser: bool,
    },
    /// Grant a permission to a user
    Grant {
        #[arg(short, long)]
        username: String,

        /// Permission codename, e.g. `shop.add_product`
        #[arg(short = 'P', long)]
        permission: String,
    },
    /// Add a user to a group
    AddGroup {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        group: String,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// Grant a permission to a group
    Grant {
        #[arg(short, long)]
        group: String,

        /// Permission codename, e.g. `shop.change_product`
        #[arg(short = 'P', long)]
        permission: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if matches!(cli.command, Commands::Migrate) {
        commands::migrate::run().await?;
        return Ok(());
    }

    let (_pool, repos) = commands::connect().await?;
    let mut out = std::io::stdout();

    match cli.command {
        Commands::Migrate => {}
        Commands::User { action } => match action {
            UserAction::Create {
                username,
                password,
                staff,
                superuser,
            } => {
                commands::user::create(&repos, &mut out, &username, &password, staff, superuser)
                    .await?;
            }
            UserAction::Grant {
                username,
                permission,
            } => commands::user::grant(&repos, &mut out, &username, &permission).await?,
            UserAction::AddGroup { username, group } => {
                commands::user::add_to_group(&repos, &mut out, &username, &group).await?;
            }
        },
        Commands::Group { action } => match action {
            GroupAction::Grant { group, permission } => {
                commands::user::grant_group(&repos, &mut out, &group, &permission).await?;
            }
        },
        Commands::Agg => commands::demo::agg(&repos, &mut out).await?,
        Commands::BulkActions => commands::demo::bulk_actions(&repos, &mut out).await?,
        Commands::CreateOrder => commands::demo::create_order(&repos, &mut out).await?,
        Commands::SelectingFields => commands::demo::selecting_fields(&repos, &mut out).await?,
    }
    Ok(())
}
