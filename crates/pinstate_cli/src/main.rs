//! pinstate CLI
//!
//! Operator tools for instance state directories.
//!
//! # Commands
//!
//! - `init` - Create an instance with an empty manifest
//! - `inspect` - Show the live manifest, payload refs and archives
//! - `recover` - Discard a transaction abandoned by a crash
//! - `ingest` - Store a payload in the artifact store
//! - `verify-artifact` - Re-hash a stored artifact
//! - `pin` / `unpin` - Add or remove content through a full transaction

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use pinstate_core::ContentType;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tools for crash-safe pinstate instances.
#[derive(Parser)]
#[command(name = "pinstate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// State root holding `instances/` and `artifacts/`
    #[arg(global = true, short, long, env = "PINSTATE_STATE_ROOT")]
    state_root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Content kinds accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Any,
    Engine,
    Game,
    Pack,
    Mod,
    Runtime,
}

impl From<Kind> for ContentType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Any => Self::Any,
            Kind::Engine => Self::Engine,
            Kind::Game => Self::Game,
            Kind::Pack => Self::Pack,
            Kind::Mod => Self::Mod,
            Kind::Runtime => Self::Runtime,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an instance with an empty manifest
    Init {
        /// Instance id
        instance: String,

        /// Pinned engine build id
        #[arg(long, default_value = "")]
        engine_build: String,

        /// Pinned game build id
        #[arg(long, default_value = "")]
        game_build: String,
    },

    /// Show the live state of an instance
    Inspect {
        /// Instance id
        instance: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Discard a transaction abandoned by a crash
    Recover {
        /// Instance id
        instance: String,
    },

    /// Store a payload file in the artifact store
    Ingest {
        /// Payload file
        file: PathBuf,

        /// Content type
        #[arg(short = 't', long = "type", value_enum)]
        kind: Kind,

        /// Origin recorded in the metadata (defaults to the file path)
        #[arg(long)]
        source: Option<String>,
    },

    /// Re-hash a stored artifact and check its metadata
    VerifyArtifact {
        /// Artifact hash (hex)
        hash: String,

        /// Expected content type
        #[arg(short = 't', long = "type", value_enum, default_value = "any")]
        kind: Kind,
    },

    /// Pin content into an instance through a full transaction
    Pin {
        /// Instance id
        instance: String,

        /// Content type
        #[arg(short = 't', long = "type", value_enum)]
        kind: Kind,

        /// Content id
        #[arg(long)]
        id: String,

        /// Version string
        #[arg(long)]
        version: String,

        /// Artifact hash (hex)
        #[arg(long)]
        hash: String,

        /// Position in the load order (defaults to the end)
        #[arg(long)]
        order: Option<u32>,

        /// Mark the resulting manifest as known-good
        #[arg(long)]
        known_good: bool,
    },

    /// Remove pinned content through a full transaction
    Unpin {
        /// Instance id
        instance: String,

        /// Content type
        #[arg(short = 't', long = "type", value_enum)]
        kind: Kind,

        /// Content id
        #[arg(long)]
        id: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("pinstate CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let root = cli
        .state_root
        .ok_or("State root required (--state-root or PINSTATE_STATE_ROOT)")?;
    let engine = commands::open_engine()?;

    match cli.command {
        Commands::Init {
            instance,
            engine_build,
            game_build,
        } => commands::init::run(&engine, &root, &instance, engine_build, game_build)?,
        Commands::Inspect { instance, format } => {
            commands::inspect::run(&engine, &root, &instance, &format)?;
        }
        Commands::Recover { instance } => commands::recover::run(&engine, &root, &instance)?,
        Commands::Ingest { file, kind, source } => {
            commands::ingest::run(&engine, &root, &file, kind.into(), source.as_deref())?;
        }
        Commands::VerifyArtifact { hash, kind } => {
            commands::verify_artifact::run(&engine, &root, &hash, kind.into())?;
        }
        Commands::Pin {
            instance,
            kind,
            id,
            version,
            hash,
            order,
            known_good,
        } => {
            let request = commands::pin::PinRequest {
                content_type: kind.into(),
                id,
                version,
                hash,
                order,
                known_good,
            };
            commands::pin::pin(&engine, &root, &instance, request)?;
        }
        Commands::Unpin { instance, kind, id } => {
            commands::pin::unpin(&engine, &root, &instance, kind.into(), &id)?;
        }
        Commands::Version => {}
    }

    Ok(())
}
