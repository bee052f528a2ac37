use anyhow::{Context, Result};
use backup_manager::config::{self, expand_tilde, Config};
use backup_manager::managers::logging::{self, LoggingConfig};
use backup_manager::utils::{archive, cron, encryption};
use backup_manager::{BackupManager, BackupPolicy, Catalog, JobStatus};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "backup-manager")]
#[command(about = "Policy-driven backups to local disk, S3 and GCS", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level directive, overrides the configured one
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a backup policy and run it once
    Create {
        /// Source directory to back up
        #[arg(short, long)]
        source: String,

        /// Local path or s3://bucket/prefix or gcs://bucket/prefix
        #[arg(short, long)]
        destination: String,

        /// Cron schedule (5 fields)
        #[arg(long, default_value = "")]
        schedule: String,

        /// Number of backups to keep
        #[arg(short, long, default_value_t = 1)]
        retention: i64,

        /// Compress the backup as tar.gz
        #[arg(short, long, default_value_t = true, action = ArgAction::Set)]
        archive: bool,

        /// Encrypt the backup
        #[arg(short, long)]
        encrypt: bool,

        /// Encryption password
        #[arg(short, long)]
        password: Option<String>,

        /// Policy name (defaults to backup-<source dir>)
        #[arg(short, long)]
        name: Option<String>,

        /// Store the policy without running it
        #[arg(long)]
        no_run: bool,
    },

    /// Run a stored policy
    Run {
        /// Policy ID
        #[arg(short, long)]
        policy: String,
    },

    /// List stored policies
    Policies,

    /// Show the job history of a policy
    History {
        /// Policy ID
        #[arg(short, long)]
        policy: String,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Delete a policy and its job history (artifacts are kept)
    DeletePolicy {
        /// Policy ID
        #[arg(short, long)]
        policy: String,
    },

    /// Restore a completed backup into a directory
    Restore {
        /// Job ID of the backup to restore
        #[arg(short, long)]
        job: String,

        /// Target directory
        #[arg(short, long)]
        target: PathBuf,

        /// Decryption password (defaults to the policy's)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Apply retention to every policy and sweep stale working directories
    Cleanup,

    /// Show information about an archive
    ArchiveInfo {
        /// Archive file (.tar.gz or .tar)
        path: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that an archive can be read end to end
    ValidateArchive {
        /// Archive file (.tar.gz or .tar)
        path: PathBuf,
    },

    /// Check password strength, or generate a strong one
    CheckPassword {
        /// Password to check
        #[arg(required_unless_present = "generate")]
        password: Option<String>,

        /// Generate a password of this length instead
        #[arg(long, conflicts_with = "password")]
        generate: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't touch the catalog - use simple console logging
    match &cli.command {
        Commands::ArchiveInfo { path, json } => {
            logging::init_console_logging();
            return handle_archive_info(path, *json);
        }
        Commands::ValidateArchive { path } => {
            logging::init_console_logging();
            return handle_validate_archive(path);
        }
        Commands::CheckPassword { password, generate } => {
            logging::init_console_logging();
            return handle_check_password(password.as_deref(), *generate);
        }
        _ => {}
    }

    let config = config::load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    let mut logging_config = LoggingConfig::from_settings(&config.logging);
    if let Some(level) = &cli.log_level {
        logging_config = logging_config.with_level(level.clone());
    } else if cli.verbose {
        logging_config = logging_config.with_level("debug");
    }
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = logging::init_logging(&logging_config)?;

    let catalog = open_catalog(&config)?;
    let manager = BackupManager::new(config.clone(), catalog.clone());
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Create {
            source,
            destination,
            schedule,
            retention,
            archive,
            encrypt,
            password,
            name,
            no_run,
        } => {
            let mut policy = BackupPolicy::new(source, destination);
            policy.schedule = schedule;
            policy.retention_count = retention;
            policy.archive_enabled = archive;
            policy.encryption_enabled = encrypt;
            policy.encryption_password = password.unwrap_or_default();
            policy.name = name.unwrap_or_default();

            let mut job = manager.create_backup_job(&mut policy).await?;
            println!("✓ Policy created: {} ({})", policy.name, policy.id);
            if let Some(next) = cron::next_run(&policy.schedule) {
                println!("  Next scheduled run: {}", next.format("%Y-%m-%d %H:%M UTC"));
            }

            if no_run {
                return Ok(());
            }

            println!("Running backup job {}...", job.id);
            let result = manager.execute_backup(&mut job, &cancel).await?;
            print_result(&result);
        }

        Commands::Run { policy } => {
            println!("Running backup for policy: {}", policy);
            let (job, result) = manager.run_policy(&policy, &cancel).await?;
            println!("Job: {}", job.id);
            print_result(&result);
        }

        Commands::Policies => {
            let policies = catalog.get_all_policies().await?;
            if policies.is_empty() {
                println!("No policies configured.");
                return Ok(());
            }

            println!("=== Backup Policies ===\n");
            for policy in policies {
                println!("{} ({})", policy.name, policy.id);
                println!("  Source:      {}", policy.source_path);
                println!("  Destination: {}", policy.destination_path);
                if !policy.schedule.is_empty() {
                    println!("  Schedule:    {}", policy.schedule);
                }
                if policy.retention_count > 0 {
                    println!("  Retention:   {} backups", policy.retention_count);
                } else {
                    println!("  Retention:   unlimited");
                }
                println!(
                    "  Archive: {}  Encrypted: {}",
                    yes_no(policy.archive_enabled),
                    yes_no(policy.encryption_enabled)
                );
                println!();
            }
        }

        Commands::History { policy, limit } => {
            let jobs = catalog.get_backup_history(&policy, limit).await?;
            if jobs.is_empty() {
                println!("No backups found for policy {}", policy);
                return Ok(());
            }

            println!("=== History for policy: {} ===\n", policy);
            for job in jobs {
                let marker = match job.status {
                    JobStatus::Completed => "✓",
                    JobStatus::Failed | JobStatus::Cancelled => "✗",
                    _ => "•",
                };
                println!(
                    "{} {} {} {}",
                    marker,
                    job.created_at.format("%Y-%m-%d %H:%M:%S"),
                    job.status,
                    job.id
                );
                if job.status == JobStatus::Completed {
                    println!(
                        "    {} files, {} bytes -> {}",
                        job.files_processed, job.total_size, job.backup_path
                    );
                }
                if let Some(error) = &job.error {
                    println!("    Error: {}", error);
                }
            }
        }

        Commands::DeletePolicy { policy } => {
            catalog.delete_policy(&policy).await?;
            println!("✓ Policy {} deleted", policy);
        }

        Commands::Restore {
            job,
            target,
            password,
        } => {
            println!("Restoring backup {} to {}...", job, target.display());
            let entries = manager
                .restore_backup(&job, &target, password.as_deref(), &cancel)
                .await?;
            println!("✓ Restore completed: {} entries extracted", entries);
        }

        Commands::Cleanup => {
            let report = manager
                .retention()
                .run_maintenance(&config.retention, &config.pipeline.temp_root(), &cancel)
                .await;
            println!(
                "✓ Cleanup finished: {} removed, {} failed",
                report.deleted, report.failed
            );
        }

        // Handled before the configuration is loaded
        Commands::ArchiveInfo { .. }
        | Commands::ValidateArchive { .. }
        | Commands::CheckPassword { .. } => {}
    }

    Ok(())
}

fn open_catalog(config: &Config) -> Result<Catalog> {
    let path = expand_tilde(&config.database.path);
    Catalog::open(&path).with_context(|| format!("Failed to open catalog at {}", path.display()))
}

/// Token cancelled on the first Ctrl-C; the pipeline stops at its next check
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            signal_token.cancel();
        }
    });
    token
}

fn print_result(result: &backup_manager::BackupResult) {
    println!("✓ Backup completed successfully");
    println!("  Location:    {}", result.backup_path);
    println!("  Files:       {}", result.files_processed);
    println!("  Total size:  {} bytes", result.total_size);
    println!(
        "  Stored size: {} bytes (ratio {:.2})",
        result.compressed_size, result.compression_ratio
    );
    println!("  Encrypted:   {}", yes_no(result.encrypted));
    println!("  Checksum:    {}", result.checksum);
    println!("  Duration:    {:.1}s", result.duration.as_secs_f64());
}

fn handle_archive_info(path: &std::path::Path, json: bool) -> Result<()> {
    let info = archive::get_archive_info(path)
        .with_context(|| format!("Failed to read archive {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Archive: {}", info.path.display());
    println!("  Compressed:   {}", yes_no(info.compressed));
    println!("  Size:         {} bytes", info.size);
    println!("  Uncompressed: {} bytes", info.uncompressed_size);
    println!("  Files:        {}", info.file_count);
    println!("  Directories:  {}", info.directory_count);
    println!("  Ratio:        {:.2}", info.compression_ratio);
    Ok(())
}

fn handle_validate_archive(path: &std::path::Path) -> Result<()> {
    archive::validate_archive(path, &CancellationToken::new())
        .with_context(|| format!("Archive {} is invalid", path.display()))?;
    println!("✓ Archive is valid: {}", path.display());
    Ok(())
}

fn handle_check_password(password: Option<&str>, generate: Option<usize>) -> Result<()> {
    if let Some(length) = generate {
        println!("{}", encryption::generate_secure_password(length));
        return Ok(());
    }

    let password = password.unwrap_or_default();
    encryption::validate_password(password)?;
    println!("✓ Password meets strength requirements");
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}
