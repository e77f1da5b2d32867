//! Homeguard CLI - control plane administration
//!
//! Usage:
//!   homeguard hash-password <password>
//!   homeguard add-user --config <file> <name> <password>
//!   homeguard list-users --config <file>
//!   homeguard sessions --db <path> [--purge-expired]
//!
//! The session store is locked by a running server; stop it before using
//! `sessions`.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use homeguard_core::{AppConfig, ConfigError, FileConfigModifier};
use homeguard_web::auth::password::validate_password;
use homeguard_web::auth::session::scan_records;
use homeguard_web::auth::{
    Password, SessionBackend, SessionToken, SledBackend, User, UserStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "homeguard")]
#[command(about = "Homeguard control plane administration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored form of a password
    HashPassword {
        /// Plaintext password
        password: String,
    },
    /// Add a web user to the configuration file
    AddUser {
        /// Configuration file, created if missing
        #[arg(long)]
        config: PathBuf,
        /// Login name
        name: String,
        /// Plaintext password
        password: String,
    },
    /// List web users from the configuration file
    ListUsers {
        #[arg(long)]
        config: PathBuf,
    },
    /// Inspect the session store
    Sessions {
        /// Session store directory
        #[arg(long)]
        db: PathBuf,
        /// Remove expired and malformed entries
        #[arg(long)]
        purge_expired: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::HashPassword { password } => {
            validate_password(&password)?;
            println!("{}", Password::hash(&password)?.as_hash());
        }
        Commands::AddUser {
            config,
            name,
            password,
        } => {
            validate_password(&password)?;
            add_user(&config, &name, Password::hash(&password)?, &password)?;
            println!("Added user {name} to {}", config.display());
        }
        Commands::ListUsers { config } => {
            let config = AppConfig::from_file(&config)?;
            if config.users.is_empty() {
                println!("No users configured");
            }
            for user in &config.users {
                println!("{}\t{}", user.name, hash_scheme(&user.password));
            }
        }
        Commands::Sessions { db, purge_expired } => {
            let report = inspect_sessions(&db, Utc::now(), purge_expired)?;
            for line in &report.lines {
                println!("{line}");
            }
            println!(
                "{} live, {} stale{}",
                report.live,
                report.stale,
                if purge_expired { " (purged)" } else { "" }
            );
        }
    }

    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig, ConfigError> {
    if path.exists() {
        AppConfig::from_file(path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Append a user and write the configuration back
fn add_user(
    config_path: &Path,
    name: &str,
    password: Password,
    plaintext: &str,
) -> anyhow::Result<()> {
    validate_password(plaintext)?;
    if name.trim().is_empty() {
        bail!("user name must not be empty");
    }

    let config = load_or_default(config_path)?;
    let modifier = Arc::new(FileConfigModifier::new(config_path, config.clone()));
    let store = UserStore::from_config(&config.users, modifier)
        .with_context(|| format!("loading users from {}", config_path.display()))?;

    store.create(User::new(name, password)?)?;
    Ok(())
}

fn hash_scheme(hash: &str) -> &'static str {
    if hash.starts_with("$argon2") {
        "argon2"
    } else if ["$2a$", "$2b$", "$2y$"].iter().any(|p| hash.starts_with(p)) {
        "bcrypt"
    } else {
        "unknown"
    }
}

#[derive(Debug, Default)]
struct SessionReport {
    lines: Vec<String>,
    live: usize,
    stale: usize,
}

fn inspect_sessions(
    db: &Path,
    now: DateTime<Utc>,
    purge: bool,
) -> anyhow::Result<SessionReport> {
    if !db.exists() {
        bail!("no session store at {}", db.display());
    }
    let backend = SledBackend::open(db)
        .with_context(|| format!("opening {} (is the server running?)", db.display()))?;

    let mut report = SessionReport::default();
    for entry in scan_records(&backend)? {
        let stale = entry.is_stale(now);
        let token = SessionToken::from_slice(&entry.key)
            .map_or_else(|| "<malformed key>".to_string(), |t| format!("{t:?}"));
        let line = match &entry.record {
            Ok(record) => format!(
                "{token}\t{}\t{}{}",
                record.login,
                record.expires_at.to_rfc3339(),
                if stale { "\texpired" } else { "" }
            ),
            Err(e) => format!("{token}\t<{e}>"),
        };
        report.lines.push(line);

        if stale {
            report.stale += 1;
            if purge {
                backend.remove(&entry.key)?;
            }
        } else {
            report.live += 1;
        }
    }

    if purge && report.stale > 0 {
        backend.flush()?;
    }

    Ok(report)
}
