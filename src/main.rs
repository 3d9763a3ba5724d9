use std::io::BufRead;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Arg, Command};
use login_sources::store::{MemoryStore, SqlSourceStore};
use login_sources::{Authenticator, Config, LocalSources, Registry, SourceStore};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("login-sources")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect and test external login sources")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.yml"),
        )
        .arg(
            Arg::new("generate-config")
                .short('g')
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .conflicts_with("config"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .help("Enable verbose logging")
                .action(clap::ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .help("Suppress all output except errors")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
        .subcommand(Command::new("list").about("List every configured login source"))
        .subcommand(
            Command::new("verify")
                .about("Check credentials against a login source (password read from stdin)")
                .arg(Arg::new("source").long("source").value_name("ID").required(true))
                .arg(Arg::new("login").long("login").value_name("LOGIN").required(true)),
        )
        .get_matches();

    if let Some(config_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(config_path)?;
        return Ok(());
    }

    let config_path = matches
        .get_one::<String>("config")
        .ok_or_else(|| anyhow!("missing --config"))?;

    let config = if std::path::Path::new(config_path).exists() {
        Config::load_from_file(config_path)?
    } else {
        Config::default()
    };

    setup_logging(&config, &matches)?;

    let local = match LocalSources::load(&config.sources.dir, &config.sources.suffix) {
        Ok(local) => Arc::new(local),
        Err(e) => {
            error!("Failed to load authentication sources: {}", e);
            std::process::exit(1);
        }
    };
    info!("Loaded {} file-backed login sources", local.len());

    let users = Arc::new(MemoryStore::new());
    let store: Arc<dyn SourceStore> = match &config.database {
        Some(db) => {
            let store = SqlSourceStore::connect(&db.db_type, &db.url, db.max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => Arc::clone(&users) as Arc<dyn SourceStore>,
    };

    let registry = Registry::new(store, users.clone(), local)
        .with_mirror_default_config(config.sources.mirror_default_config);

    match matches.subcommand() {
        Some(("verify", sub)) => {
            let id: i64 = sub
                .get_one::<String>("source")
                .ok_or_else(|| anyhow!("missing --source"))?
                .parse()
                .map_err(|_| anyhow!("--source must be a numeric id"))?;
            let login = sub
                .get_one::<String>("login")
                .ok_or_else(|| anyhow!("missing --login"))?;

            let mut password = String::new();
            std::io::stdin().lock().read_line(&mut password)?;
            let password = password.trim_end_matches(['\r', '\n']);

            let source = registry.get_by_id(id).await?;
            let authenticator = Authenticator::new(users);
            match authenticator.authenticate(&source, login, password, false).await {
                Ok(_) => println!("OK: '{}' verified by '{}'", login, source.name),
                Err(e) => {
                    error!("Verification failed: {}", e);
                    println!("FAILED: {}", e.user_message());
                    std::process::exit(2);
                }
            }
        }
        _ => {
            for source in registry.list().await? {
                println!(
                    "{:>5}  {:<20} {:<20} active={:<5} default={:<5} {}",
                    source.id,
                    source.name,
                    source.type_name(),
                    source.is_activated,
                    source.is_default,
                    if source.origin.is_file() { "file" } else { "database" }
                );
            }
        }
    }

    Ok(())
}

fn generate_default_config(path: &str) -> Result<()> {
    let config = Config::default();
    config.save_to_file(path)?;

    println!("Generated default configuration file: {}", path);
    println!("Edit this file to point at your auth.d directory and database.");

    Ok(())
}

fn setup_logging(config: &Config, matches: &clap::ArgMatches) -> Result<()> {
    let log_level = if matches.get_flag("quiet") {
        Level::ERROR
    } else {
        match matches.get_count("verbose") {
            0 => match config.logging.level.as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "info" => Level::INFO,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::INFO,
            },
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
