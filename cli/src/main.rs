mod commands;
mod config;
mod groq;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;

use crate::commands::{
    OnboardArgs, ProfileUpdate, cmd_coach, cmd_history, cmd_log, cmd_onboard, cmd_profile_refresh,
    cmd_profile_set, cmd_profile_show, cmd_scan, cmd_search_ai, cmd_summary, cmd_sync_push,
    cmd_sync_watch, cmd_theme, cmd_units, cmd_water,
};
use crate::config::Config;
use nourish_core::models::NewFoodEntry;
use nourish_core::storage::LocalStorage;
use nourish_core::store::{SharedStore, Store};

#[derive(Parser)]
#[command(
    name = "nourish",
    version,
    about = "A local-first diet tracker with an AI nutrition coach",
    long_about = "\n\n  nourish\n  eat with intent.\n"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create your profile and daily targets
    Onboard {
        /// Full name
        #[arg(long)]
        name: Option<String>,
        /// Gender
        #[arg(long)]
        gender: Option<String>,
        /// Goal: lose, maintain, gain
        #[arg(long)]
        goal: Option<String>,
        /// Workout frequency (e.g. "3-4 times a week")
        #[arg(long)]
        activity: Option<String>,
        /// Preferred cuisine
        #[arg(long)]
        cuisine: Option<String>,
        /// Birth date (YYYY-MM-DD)
        #[arg(long)]
        birth_date: Option<String>,
        /// Height (cm, or inches with imperial units)
        #[arg(long)]
        height: Option<f64>,
        /// Weight (kg, or lb with imperial units)
        #[arg(long)]
        weight: Option<f64>,
        /// Skip the AI plan and use the default targets
        #[arg(long)]
        no_ai: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// View or edit your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Log a food entry for today
    Log {
        /// Food name
        name: String,
        /// Calories (kcal)
        #[arg(short, long)]
        calories: f64,
        /// Protein (g)
        #[arg(short, long, default_value = "0")]
        protein: f64,
        /// Carbohydrates (g)
        #[arg(long, default_value = "0")]
        carbs: f64,
        /// Fat (g)
        #[arg(short, long, default_value = "0")]
        fat: f64,
        /// Serving description (e.g. "1 bowl", "200g")
        #[arg(short, long, default_value = "1 serving")]
        serving: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log water for today (defaults to one 250 ml glass)
    Water {
        /// Millilitres to add
        ml: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show progress for a day (defaults to today)
    Summary {
        /// Date to show (YYYY-MM-DD or today/yesterday)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent days from the synced history
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or set the theme (dark, light)
    Theme {
        value: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or set the unit system (metric, imperial)
    Units {
        value: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the AI coach a question
    Coach {
        /// Your question
        prompt: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Estimate the nutrition of a food photo
    Scan {
        /// Path to a JPEG image
        image: std::path::PathBuf,
        /// Log the recognised food for today
        #[arg(long)]
        log: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look up nutrition for a food with the AI model
    SearchAi {
        /// Food to look up
        query: String,
        /// Log result number N for today
        #[arg(long, value_name = "N")]
        log: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync with the remote document store
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Start the document store server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
        /// Allow clients to sign in without an identity token
        #[arg(long)]
        allow_anonymous: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show your profile and targets
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update profile fields
    Set {
        /// Full name
        #[arg(long)]
        name: Option<String>,
        /// Goal: lose, maintain, gain
        #[arg(long)]
        goal: Option<String>,
        /// Workout frequency
        #[arg(long)]
        activity: Option<String>,
        /// Preferred cuisine
        #[arg(long)]
        cuisine: Option<String>,
        /// Height (cm, or inches with imperial units)
        #[arg(long)]
        height: Option<f64>,
        /// Weight (kg, or lb with imperial units)
        #[arg(long)]
        weight: Option<f64>,
        /// Daily calorie target (kcal)
        #[arg(long)]
        calories: Option<f64>,
        /// Daily protein target (g)
        #[arg(long)]
        protein: Option<f64>,
        /// Daily carbohydrate target (g)
        #[arg(long)]
        carbs: Option<f64>,
        /// Daily fat target (g)
        #[arg(long)]
        fat: Option<f64>,
        /// Daily water target (litres)
        #[arg(long)]
        water: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Regenerate targets and plans with the AI model
    RefreshPlan {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Stay attached and print changes arriving from the remote store
    Watch {
        /// Output as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Upload the local state now
    Push {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn open_store(config: &Config) -> Result<SharedStore> {
    Ok(Store::load(LocalStorage::open(&config.storage_path)?).into_shared())
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Onboard {
            name,
            gender,
            goal,
            activity,
            cuisine,
            birth_date,
            height,
            weight,
            no_ai,
            json,
        } => {
            let args = OnboardArgs {
                name,
                gender,
                goal,
                activity,
                cuisine,
                birth_date,
                height,
                weight,
                no_ai,
                json,
            };
            cmd_onboard(&config, &open_store(&config)?, args).await
        }
        Commands::Profile { command } => {
            let store = open_store(&config)?;
            match command {
                ProfileCommands::Show { json } => cmd_profile_show(&store, json),
                ProfileCommands::Set {
                    name,
                    goal,
                    activity,
                    cuisine,
                    height,
                    weight,
                    calories,
                    protein,
                    carbs,
                    fat,
                    water,
                    json,
                } => {
                    let update = ProfileUpdate {
                        name,
                        goal,
                        activity,
                        cuisine,
                        height,
                        weight,
                        calories,
                        protein,
                        carbs,
                        fat,
                        water,
                    };
                    cmd_profile_set(&config, &store, update, json).await
                }
                ProfileCommands::RefreshPlan { json } => {
                    cmd_profile_refresh(&config, &store, json).await
                }
            }
        }
        Commands::Log {
            name,
            calories,
            protein,
            carbs,
            fat,
            serving,
            json,
        } => {
            let entry = NewFoodEntry {
                name,
                calories,
                protein,
                carbs,
                fat,
                serving_size: serving,
            };
            cmd_log(&config, &open_store(&config)?, entry, json).await
        }
        Commands::Water { ml, json } => cmd_water(&config, &open_store(&config)?, ml, json).await,
        Commands::Summary { date, json } => {
            cmd_summary(&config, &open_store(&config)?, date, json).await
        }
        Commands::History { json } => cmd_history(&config, &open_store(&config)?, json).await,
        Commands::Theme { value, json } => {
            cmd_theme(&config, &open_store(&config)?, value, json).await
        }
        Commands::Units { value, json } => {
            cmd_units(&config, &open_store(&config)?, value, json).await
        }
        Commands::Coach { prompt, json } => cmd_coach(&config, &prompt, json).await,
        Commands::Scan { image, log, json } => {
            cmd_scan(&config, &open_store(&config)?, &image, log, json).await
        }
        Commands::SearchAi { query, log, json } => {
            cmd_search_ai(&config, &open_store(&config)?, &query, log, json).await
        }
        Commands::Sync { command } => {
            let store = open_store(&config)?;
            match command {
                SyncCommands::Watch { json } => cmd_sync_watch(&config, &store, json).await,
                SyncCommands::Push { json } => cmd_sync_push(&config, &store, json).await,
            }
        }
        Commands::Serve {
            port,
            bind,
            no_auth,
            allow_anonymous,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?.0)
            };
            let db = server::DocumentStore::open(&config.server_db_path)?;
            let options = server::ServerOptions {
                api_key,
                allow_anonymous,
            };
            server::start_server(db, port, &bind, options).await
        }
    }
}
