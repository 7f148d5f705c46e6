//! quill-migrate CLI
//!
//! Command-line tool for generating and applying schema migrations.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use quill_migrate::config::CONFIG_FILE_NAME;
use quill_migrate::prelude::{
    connect, render_chain_sql, AutodetectorOptions, Config, Dialect, MigrationChain,
    MigrationRunner, MigrationWriter, RunReport, SchemaSnapshot, TransactionMode,
};

/// Schema migrations for SQLite, MySQL/MariaDB and PostgreSQL.
#[derive(Parser)]
#[command(name = "quill-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file [default: quill.toml].
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL, overriding the configured database.
    #[arg(short, long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Migrations directory, overriding the configured one.
    #[arg(short, long)]
    migrations_dir: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new migration from model changes.
    MakeMigrations {
        /// Model snapshot file.
        #[arg(long)]
        models: Option<PathBuf>,

        /// Migration label.
        #[arg(short, long)]
        name: Option<String>,

        /// Treat a table as renamed (OLD=NEW).
        #[arg(long, value_parser = parse_table_rename)]
        rename_table: Vec<(String, String)>,

        /// Treat a column as renamed (TABLE.OLD=NEW, TABLE is the new table name).
        #[arg(long, value_parser = parse_column_rename)]
        rename_column: Vec<(String, String, String)>,

        /// Print the migration without writing it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply outstanding migrations.
    Migrate {
        /// Stop after this migration.
        #[arg(long)]
        apply_until: Option<String>,

        /// Apply every outstanding migration in one transaction.
        #[arg(long)]
        single_transaction: bool,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status.
    ShowMigrations,

    /// Print the SQL of every migration without a database.
    SqlMigrate {
        /// Target dialect (sqlite, mysql, mariadb, postgres).
        #[arg(long)]
        dialect: Option<Dialect>,
    },
}

fn parse_table_rename(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((old, new)) if !old.is_empty() && !new.is_empty() => {
            Ok((old.to_string(), new.to_string()))
        }
        _ => Err(format!("expected OLD=NEW, got '{value}'")),
    }
}

fn parse_column_rename(value: &str) -> Result<(String, String, String), String> {
    let parsed = value.split_once('.').and_then(|(table, rest)| {
        let (old, new) = rest.split_once('=')?;
        (!table.is_empty() && !old.is_empty() && !new.is_empty())
            .then(|| (table.to_string(), old.to_string(), new.to_string()))
    });
    parsed.ok_or_else(|| format!("expected TABLE.OLD=NEW, got '{value}'"))
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Couldn't load configuration from {}", path.display()))?,
        None => Config::load_or_default(Path::new(CONFIG_FILE_NAME))?,
    };
    if let Some(dir) = &cli.migrations_dir {
        config.migration_dir.clone_from(dir);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&cli)?;

    match cli.command {
        Commands::MakeMigrations {
            models,
            name,
            rename_table,
            rename_column,
            dry_run,
        } => {
            let models_file = models.unwrap_or_else(|| config.models_file.clone());
            let json = std::fs::read_to_string(&models_file).with_context(|| {
                format!("Couldn't read model snapshot {}", models_file.display())
            })?;
            let current = SchemaSnapshot::from_json(&json, &config.snapshot_options())
                .with_context(|| format!("Invalid model snapshot {}", models_file.display()))?;

            let mut renames = AutodetectorOptions::new();
            for (old, new) in rename_table {
                renames = renames.rename_table(old, new);
            }
            for (table, old, new) in rename_column {
                renames = renames.rename_column(table, old, new);
            }

            let mut writer = MigrationWriter::new(&config.migration_dir)
                .renames(renames)
                .dry_run(dry_run);
            if let Some(name) = name {
                writer = writer.label(name);
            }

            match writer.make_migration(&current)? {
                None => info!("No changes - nothing to do."),
                Some(created) if created.written => {
                    info!("Created migration: {}", created.path.display());
                }
                Some(created) => {
                    println!("Would create migration: {}", created.path.display());
                    println!("\n{}", created.record.to_toml()?);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Migrate {
            apply_until,
            single_transaction,
            dry_run,
        } => {
            let chain = MigrationChain::load(&config.migration_dir)?;
            let url = config.database_url(cli.database_url.as_deref())?;
            let dialect = Dialect::from_url(&url)?;

            let mut options = config.run_options();
            options.apply_until = apply_until;
            options.dry_run = dry_run;
            if single_transaction {
                options.transaction_mode = TransactionMode::Single;
            }

            if dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
            }

            let mut conn = connect(&url).await?;
            let mut runner = MigrationRunner::new(dialect.generator(config.dialect_options()))
                .with_options(options);

            match runner.run(&mut conn, &chain).await? {
                RunReport::UpToDate => {
                    info!("No migrations to apply.");
                    Ok(ExitCode::from(2))
                }
                RunReport::Applied(ids) => {
                    info!("Applied {} migration(s).", ids.len());
                    Ok(ExitCode::SUCCESS)
                }
                RunReport::DryRun(rendered) => {
                    for migration in &rendered {
                        println!("-- {}", migration.id);
                        for sql in &migration.statements {
                            println!("{sql};");
                        }
                        println!();
                    }
                    Ok(ExitCode::SUCCESS)
                }
            }
        }

        Commands::ShowMigrations => {
            let chain = MigrationChain::load(&config.migration_dir)?;
            let url = config.database_url(cli.database_url.as_deref())?;
            let dialect = Dialect::from_url(&url)?;

            let mut conn = connect(&url).await?;
            let runner = MigrationRunner::new(dialect.generator(config.dialect_options()))
                .with_options(config.run_options());
            let entries = runner.status(&mut conn, &chain).await?;

            if entries.is_empty() {
                info!("No migrations found in {}.", config.migration_dir.display());
            } else {
                println!("\nMigrations:");
                println!("{:-<60}", "");
                for entry in &entries {
                    match entry.applied_at {
                        Some(applied_at) => println!(
                            " [X] {} ({})",
                            entry.id,
                            applied_at.format("%Y-%m-%d %H:%M:%S")
                        ),
                        None => println!(" [ ] {}", entry.id),
                    }
                }
                println!();
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::SqlMigrate { dialect } => {
            let dialect = match dialect {
                Some(dialect) => dialect,
                None => match (&cli.database_url, &config.database) {
                    (Some(url), _) => Dialect::from_url(url)?,
                    (None, Some(database)) => database.dialect()?,
                    (None, None) => anyhow::bail!("No dialect given; pass --dialect"),
                },
            };

            let chain = MigrationChain::load(&config.migration_dir)?;
            let generator = dialect.generator(config.dialect_options());
            for migration in render_chain_sql(generator.as_ref(), &chain)? {
                println!("-- {}", migration.id);
                for sql in &migration.statements {
                    println!("{sql};");
                }
                println!();
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
