use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use lcg_audit::VerifyResult;
use lcg_config::UnusedKeyPolicy;

mod commands;

#[derive(Parser)]
#[command(name = "lcg")]
#[command(about = "Lifecycle guard operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fail when the merged config has keys nothing reads
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Abandoned-draft sweep
    Sweep {
        #[command(subcommand)]
        cmd: SweepCmd,
    },

    /// Email outbox
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },

    /// Shared rate-limit table
    RateLimit {
        #[command(subcommand)]
        cmd: RateLimitCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum SweepCmd {
    /// Run one full reclaim sweep under the shared lease.
    Once {
        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Lease holder name; defaults to a fresh per-invocation id
        #[arg(long)]
        holder: Option<String>,
    },
}

#[derive(Subcommand)]
enum OutboxCmd {
    /// Claim and deliver one batch of due messages.
    Dispatch {
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of an audit JSONL file.
    Verify {
        /// Defaults to LCG_AUDIT_PATH
        #[arg(long)]
        path: Option<String>,
    },
}

#[derive(Subcommand)]
enum RateLimitCmd {
    /// Drop entries older than their window.
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = lcg_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = lcg_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_orders_table={} pending_outbox={}",
                        s.ok, s.has_orders_table, s.pending_outbox
                    );
                }
                DbCmd::Migrate => {
                    lcg_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths, strict } => {
            let loaded = commands::load_config(&paths)?;
            let policy = if strict {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let unused = lcg_config::report_unused_keys(&loaded.config_json, policy)?;
            // Typed extraction validates every threshold.
            loaded.guard()?;
            println!("config_hash={}", loaded.config_hash);
            for key in &unused.unused_leaf_pointers {
                println!("unused_key={key}");
            }
            println!("{}", loaded.canonical_json);
        }

        Commands::Sweep {
            cmd: SweepCmd::Once {
                config_paths,
                holder,
            },
        } => {
            let rt = commands::connect_runtime(&config_paths).await?;
            let holder = holder.unwrap_or_else(|| format!("lcg-cli-{}", uuid::Uuid::new_v4()));
            commands::guard::sweep_once(&rt, &holder).await?;
        }

        Commands::Outbox {
            cmd: OutboxCmd::Dispatch { config_paths },
        } => {
            let rt = commands::connect_runtime(&config_paths).await?;
            commands::guard::dispatch_once(&rt).await?;
        }

        Commands::Audit {
            cmd: AuditCmd::Verify { path },
        } => {
            let path = path.unwrap_or_else(lcg_audit::audit_path_from_env);
            match lcg_audit::verify_hash_chain(&path)? {
                VerifyResult::Valid { lines } => {
                    println!("audit_ok=true lines={lines} path={path}");
                }
                VerifyResult::Broken { line, reason } => {
                    println!("audit_ok=false line={line} reason={reason} path={path}");
                    bail!("audit chain broken at line {line}: {reason}");
                }
            }
        }

        Commands::RateLimit {
            cmd: RateLimitCmd::Prune,
        } => {
            let rt = commands::connect_runtime(&[]).await?;
            commands::guard::prune_rate_limits(&rt).await?;
        }
    }

    Ok(())
}
