//! Anvil CLI - generate game assets through the Anvil pipeline

mod commands;

use anvil_core::ClassifiedError;
use clap::{Parser, Subcommand};
use commands::common::{RequestArgs, StudioArgs};
use commands::{batch, generate, retexture};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "anvil")]
#[command(about = "Generate game-ready 3D assets from text or images", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one asset
    Generate {
        #[command(flatten)]
        request: RequestArgs,

        #[command(flatten)]
        studio: StudioArgs,
    },

    /// Generate several variations of one asset, one after another
    Batch {
        #[command(flatten)]
        request: RequestArgs,

        #[command(flatten)]
        studio: StudioArgs,

        /// Number of variations
        #[arg(long, default_value = "3")]
        count: usize,
    },

    /// Apply a new texture style to an existing model
    Retexture {
        /// URL of the model to retexture
        #[arg(long)]
        model_url: String,

        /// Style prompt for the new texture
        #[arg(long)]
        style: String,

        /// Asset name (defaults to the model file name)
        #[arg(long)]
        name: Option<String>,

        /// Quality tier: preview, medium, high
        #[arg(long, default_value = "medium")]
        quality: String,

        /// Content category: item, prop, character, npc
        #[arg(long, default_value = "prop")]
        category: String,

        #[command(flatten)]
        studio: StudioArgs,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Process exit code for a failed command
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ClassifiedError>())
        .map(ClassifiedError::exit_code)
        .unwrap_or(1)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Generate { request, studio } => generate::run(request, studio),
        Commands::Batch {
            request,
            studio,
            count,
        } => batch::run(request, studio, count),
        Commands::Retexture {
            model_url,
            style,
            name,
            quality,
            category,
            studio,
        } => retexture::run(
            retexture::RetextureArgs {
                model_url,
                style,
                name,
                quality,
                category,
            },
            studio,
        ),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_gen::pipeline::PipelineFailure;
    use anvil_gen::Stage;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "anvil", "-vv", "generate", "armored knight", "--category", "character", "--rig",
            "--provider", "mock", "--events",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Generate { request, studio } => {
                assert_eq!(request.prompt.as_deref(), Some("armored knight"));
                assert!(request.rig);
                assert!(!request.avatar);
                assert_eq!(studio.provider.as_deref(), Some("mock"));
                assert!(studio.events);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_exit_codes_follow_classification() {
        let failure = PipelineFailure {
            stage: Stage::MeshRefine,
            error: ClassifiedError::generation(Some("mesh-refine"), "task failed"),
        };
        assert_eq!(exit_code(&anyhow::Error::from(failure)), 4);

        let validation = ClassifiedError::validation(Some("prompt"), "required");
        assert_eq!(exit_code(&anyhow::Error::from(validation)), 2);

        assert_eq!(exit_code(&anyhow::anyhow!("plain failure")), 1);
    }
}
