//! Civil Registry maintenance CLI
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and a default config
//! civil-registry init
//!
//! # Row counts
//! civil-registry stats
//!
//! # Audit history of one record
//! civil-registry history household 3f6c...
//!
//! # Check the audit hash chain
//! civil-registry verify-audit
//!
//! # Income tier of a monthly household income in pesos
//! civil-registry classify-income 45000.50
//!
//! # Refresh age-dependent sector flags
//! civil-registry --jurisdiction 042114014 reclassify --on 2025-01-01
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use civil_registry::db::AuditEntity;
use civil_registry::engine::income;
use civil_registry::services::events::spawn_logging_listener;
use civil_registry::{ActorContext, Config, RegistryDb, Services};

#[derive(Parser, Debug)]
#[command(name = "civil-registry")]
#[command(about = "Maintenance tool for the civil registry database")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CIVIL_REGISTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "CIVIL_REGISTRY_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Jurisdiction (barangay code) of the operator
    #[arg(long, env = "CIVIL_REGISTRY_JURISDICTION")]
    jurisdiction: Option<String>,

    /// Operator user ID stamped on maintenance mutations; the registry's
    /// own system actor when absent
    #[arg(long, env = "CIVIL_REGISTRY_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema and write a default config
    Init,
    /// Print row counts
    Stats,
    /// Print the audit history of one record
    History {
        /// resident, household or household_membership
        entity: String,
        id: String,
    },
    /// Recompute the audit hash chain
    VerifyAudit,
    /// Print the income tier of a monthly income in pesos
    ClassifyIncome {
        amount: String,
    },
    /// Re-evaluate age-dependent sector flags in a jurisdiction
    Reclassify {
        /// Any level of the geographic chain; defaults to the operator's jurisdiction
        #[arg(long)]
        scope: Option<String>,
        /// Evaluation date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        on: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("civil_registry=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("reading config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(jurisdiction) = args.jurisdiction {
        config.default_jurisdiction = Some(jurisdiction);
    }
    config.validate()?;

    match args.command {
        Command::ClassifyIncome { amount } => {
            let centavos = income::parse_pesos(&amount)?;
            let tier = income::classify(Some(centavos));
            println!("{} ({}) -> {}", income::format_pesos(centavos), tier, tier.label());
        }
        Command::Init => {
            open(&config)?;
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!(path = %config_path.display(), "Created default config");
            }
            println!("Registry ready at {}", config.database_path().display());
        }
        Command::Stats => {
            let stats = open(&config)?.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::History { entity, id } => {
            let entity: AuditEntity = entity.parse()?;
            let entries = with_services(&config, |services| Ok(services.audit.history(entity, &id)?)).await?;
            if entries.is_empty() {
                bail!("no audit entries for {} {}", entity, id);
            }
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::VerifyAudit => {
            let report = with_services(&config, |services| Ok(services.audit.verify_chain()?)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_intact() {
                bail!("audit chain is broken");
            }
        }
        Command::Reclassify { scope, on } => {
            let Some(jurisdiction) = config.default_jurisdiction.clone() else {
                bail!("an operator jurisdiction is required (--jurisdiction or default_jurisdiction)");
            };
            let actor = match args.user {
                Some(user) => ActorContext::new(user, jurisdiction),
                None => ActorContext::system(jurisdiction),
            };
            let scope = scope.unwrap_or_else(|| actor.jurisdiction().to_string());
            let on = on.unwrap_or_else(|| chrono::Utc::now().date_naive());

            let summary = with_services(&config, |services| {
                Ok(services.residents.reclassify_jurisdiction(&actor, &scope, on)?)
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn open(config: &Config) -> anyhow::Result<Arc<RegistryDb>> {
    info!(
        storage_dir = %config.storage_dir.display(),
        database = %config.database_path().display(),
        "Opening civil registry"
    );
    let db = RegistryDb::open(config)
        .with_context(|| format!("opening {}", config.database_path().display()))?;
    Ok(Arc::new(db))
}

/// Run `f` against the services with the event log listener attached,
/// then wait for the listener to drain the bus
async fn with_services<T>(
    config: &Config,
    f: impl FnOnce(&Services) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let services = Services::new(open(config)?, config);
    let listener = spawn_logging_listener(services.events.clone());

    let result = f(&services);

    // Dropping the last sender closes the bus and ends the listener
    drop(services);
    if let Err(e) = listener.await {
        tracing::warn!(error = %e, "Event listener task failed");
    }
    result
}
