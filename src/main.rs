//! Material Strategy CLI
//!
//! Operator front-end over the strategy services. Every command prints JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Seed membership
//! material-strategy assign 1001 7
//!
//! # Configure group 7 (bootstraps it on first use)
//! material-strategy group update 7 --params 0,1,2 --options 1,0,2 --client acme
//!
//! # Cascade only to materials that never diverged
//! material-strategy group update 7 --params 0,1,2 --options 2,2,2 --client acme --only-matching
//!
//! # Override and reset a single material
//! material-strategy material update 1001 --params 0,1,2 --options 9,9,9 --client acme
//! material-strategy reset item 1001
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use material_strategy::services::events::spawn_logging_listener;
use material_strategy::{
    Config, Services, SqliteMembership, StorageError, StrategyDb, UpdateGroupParamsInput,
    UpdateMaterialParamsInput,
};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "material-strategy")]
#[command(about = "Strategy parameters for material groups")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "MATERIAL_STRATEGY_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "MATERIAL_STRATEGY_DIR")]
    storage_dir: Option<PathBuf>,

    /// Database file name inside the storage directory
    #[arg(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Place a material in a group
    Assign { material: i64, group: i64 },
    /// Group default operations
    #[command(subcommand)]
    Group(GroupCommand),
    /// Single material operations
    #[command(subcommand)]
    Material(MaterialCommand),
    /// Copy group defaults back onto materials
    #[command(subcommand)]
    Reset(ResetCommand),
    /// Database statistics
    Stats,
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    Get {
        group: i64,
    },
    Update {
        group: i64,
        #[command(flatten)]
        values: ValueArgs,
        /// Only cascade to materials still equal to the previous default
        #[arg(long)]
        only_matching: bool,
    },
    /// Show each member's state relative to the group default
    Status {
        group: i64,
    },
}

#[derive(Subcommand, Debug)]
enum MaterialCommand {
    Get {
        material: i64,
    },
    Update {
        material: i64,
        #[command(flatten)]
        values: ValueArgs,
    },
}

#[derive(Subcommand, Debug)]
enum ResetCommand {
    Group { group: i64 },
    Item { material: i64 },
}

#[derive(Args, Debug)]
struct ValueArgs {
    /// Parameter codes, comma separated
    #[arg(long = "params", value_delimiter = ',', required = true)]
    parameter_codes: Vec<i64>,

    /// Option codes aligned with --params
    #[arg(long = "options", value_delimiter = ',', required = true)]
    option_codes: Vec<i64>,

    #[arg(long)]
    client: String,

    /// RFC 3339 timestamp; defaults to now
    #[arg(long)]
    effective_date: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("material_strategy=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(database) = cli.database {
        config.database_file = database;
    }

    let db = Arc::new(StrategyDb::open(&config)?);
    let membership = Arc::new(SqliteMembership::new(db.clone()));
    let services = Services::with_events(
        db,
        membership.clone(),
        Arc::new(material_strategy::services::EventBus::with_capacity(config.event_capacity)),
    );
    let listener = spawn_logging_listener(services.events.clone());

    let result = run(&services, &membership, cli.command);

    // Dropping the last bus handle closes the listener once it has drained
    drop(services);
    listener.await?;

    match result {
        Ok(json) => {
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(kind = ?e.kind(), "{}", e);
            let body = serde_json::json!({ "error": e.to_string(), "kind": e.kind() });
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run(services: &Services, membership: &SqliteMembership, command: Command) -> Result<String, StorageError> {
    match command {
        Command::Assign { material, group } => {
            membership.assign(material, group)?;
            info!(material, group, "Material assigned");
            render(&serde_json::json!({ "material_code": material, "group_code": group }))
        }
        Command::Group(GroupCommand::Get { group }) => render(&services.strategy.get_group_default(group)?),
        Command::Group(GroupCommand::Update { group, values, only_matching }) => {
            let input = UpdateGroupParamsInput {
                parameter_codes: values.parameter_codes,
                option_codes: values.option_codes,
                client: values.client,
                effective_date: values.effective_date.unwrap_or_else(Utc::now),
                only_matching_group_params: only_matching,
            };
            render(&services.cascade.update_group_params(group, input)?)
        }
        Command::Group(GroupCommand::Status { group }) => render(&services.strategy.group_status(group)?),
        Command::Material(MaterialCommand::Get { material }) => {
            render(&services.strategy.get_material_strategy(material)?)
        }
        Command::Material(MaterialCommand::Update { material, values }) => {
            let input = UpdateMaterialParamsInput {
                parameter_codes: values.parameter_codes,
                option_codes: values.option_codes,
                client: values.client,
                effective_date: values.effective_date.unwrap_or_else(Utc::now),
            };
            render(&services.cascade.update_material_params(material, input)?)
        }
        Command::Reset(ResetCommand::Group { group }) => render(&services.reset.reset_group_items(group)?),
        Command::Reset(ResetCommand::Item { material }) => render(&services.reset.reset_item(material)?),
        Command::Stats => render(&services.strategy.stats()?),
    }
}

fn render<T: Serialize>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string_pretty(value)?)
}
