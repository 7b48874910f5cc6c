//! warden CLI: hierarchical authorization engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use warden::declare::Declarations;
use warden::engine::{Engine, EngineConfig};
use warden::entity::{EntityKind, RuleSide};
use warden::paths::WardenPaths;

#[derive(Parser)]
#[command(name = "warden", version, about = "Hierarchical authorization engine")]
struct Cli {
    /// Data directory for persistent storage (overrides the XDG workspace path).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Workspace name. Workspaces live under the XDG data dir.
    #[arg(short = 'w', long, global = true, default_value = "default")]
    workspace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a policy declaration file, converging static state to it.
    Init {
        /// Path to the policy TOML file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Register (or upsert) a subject.
    RegisterSubject { id: String, description: String },

    /// Register (or upsert) an object.
    RegisterObject { id: String, description: String },

    /// Register (or upsert) a permission.
    RegisterPermission { id: String, description: String },

    /// Add a positive rule for a (subject, object, permission) triple.
    Grant {
        subject: String,
        object: String,
        permission: String,
    },

    /// Add a negative rule for a triple.
    Deny {
        subject: String,
        object: String,
        permission: String,
    },

    /// Remove a positive rule. Absence is success.
    Revoke {
        subject: String,
        object: String,
        permission: String,
    },

    /// Remove a negative rule. Absence is success.
    Allow {
        subject: String,
        object: String,
        permission: String,
    },

    /// Add a parent -> child edge to a hierarchy.
    AddChild {
        /// Hierarchy kind: subject, object, or permission.
        kind: String,
        parent: String,
        child: String,
    },

    /// Remove a parent -> child edge from a hierarchy.
    RemoveChild {
        kind: String,
        parent: String,
        child: String,
    },

    /// Answer an authorization query; prints "granted" or "denied".
    Check {
        subject: String,
        object: String,
        permission: String,
    },

    /// List rules referencing an entity as subject or object.
    Rules {
        /// Rule side: subject or object.
        side: String,
        id: String,

        /// Output format: "table" or "json".
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// List all descendants of an entity, one per line.
    Members { kind: String, id: String },

    /// Show summary counts of the persisted state.
    Info,

    /// List existing workspaces.
    Workspaces,
}

fn parse_kind(raw: &str) -> Result<EntityKind> {
    raw.parse::<EntityKind>().map_err(|e| miette::miette!("{e}"))
}

fn parse_side(raw: &str) -> Result<RuleSide> {
    match raw.to_ascii_lowercase().as_str() {
        "subject" => Ok(RuleSide::Subject),
        "object" => Ok(RuleSide::Object),
        other => Err(miette::miette!(
            "unknown rule side \"{other}\" (expected subject or object)"
        )),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Workspaces = cli.command {
        let paths = WardenPaths::resolve()?;
        for name in paths.list_workspaces() {
            println!("{name}");
        }
        return Ok(());
    }

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => WardenPaths::resolve()?.workspace(&cli.workspace),
    };
    let engine = Engine::new(EngineConfig {
        data_dir: Some(data_dir),
    })?;

    match cli.command {
        Commands::Init { file } => {
            let decls = Declarations::from_toml_file(&file)?;
            let report = engine.init(&decls)?;
            println!(
                "registered {} entities, rebuilt {} rules, swept {} entities, edges +{}/-{}",
                report.entities_registered,
                report.rules_rebuilt,
                report.entities_swept,
                report.edges_added,
                report.edges_removed,
            );
        }
        Commands::RegisterSubject { id, description } => {
            engine.register_subject(id.as_str(), &description)?;
        }
        Commands::RegisterObject { id, description } => {
            engine.register_object(id.as_str(), &description)?;
        }
        Commands::RegisterPermission { id, description } => {
            engine.register_permission(id.as_str(), &description)?;
        }
        Commands::Grant {
            subject,
            object,
            permission,
        } => {
            engine.grant(subject.as_str(), object.as_str(), permission.as_str())?;
        }
        Commands::Deny {
            subject,
            object,
            permission,
        } => {
            engine.deny(subject.as_str(), object.as_str(), permission.as_str())?;
        }
        Commands::Revoke {
            subject,
            object,
            permission,
        } => {
            engine.revoke(subject.as_str(), object.as_str(), permission.as_str())?;
        }
        Commands::Allow {
            subject,
            object,
            permission,
        } => {
            engine.allow(subject.as_str(), object.as_str(), permission.as_str())?;
        }
        Commands::AddChild {
            kind,
            parent,
            child,
        } => {
            engine.add_child(parse_kind(&kind)?, parent.as_str(), child.as_str())?;
        }
        Commands::RemoveChild {
            kind,
            parent,
            child,
        } => {
            engine.remove_child(parse_kind(&kind)?, parent.as_str(), child.as_str())?;
        }
        Commands::Check {
            subject,
            object,
            permission,
        } => {
            let decision =
                engine.decision(subject.as_str(), object.as_str(), permission.as_str())?;
            println!("{decision}");
        }
        Commands::Rules { side, id, format } => {
            let rules = engine.list_rules(parse_side(&side)?, id.as_str())?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&rules).into_diagnostic()?);
            } else {
                for rule in rules {
                    println!(
                        "{} {} {} {}",
                        rule.sign, rule.subject, rule.object, rule.permission
                    );
                }
            }
        }
        Commands::Members { kind, id } => {
            for member in engine.members(parse_kind(&kind)?, id.as_str())? {
                println!("{member}");
            }
        }
        Commands::Info => {
            print!("{}", engine.info()?);
        }
        Commands::Workspaces => unreachable!("handled before engine startup"),
    }

    Ok(())
}
