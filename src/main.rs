use anyhow::Result;
use clap::{CommandFactory, Parser};
use convoice::cli::{Cli, Commands, ConfigAction};
use convoice::config::Config;
use convoice::simulate::{EventOutput, SimulateOptions, SimulationSummary, run_simulation};
use owo_colors::OwoColorize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    convoice::logging::init(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Simulate {
            wav,
            chunk_ms,
            transcript,
            reply,
            language,
            realtime,
            json,
            timeout,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let output = if json {
                EventOutput::Json
            } else if cli.quiet {
                EventOutput::Silent
            } else {
                EventOutput::Human
            };
            let options = SimulateOptions {
                wav,
                chunk_ms,
                transcript,
                reply,
                language,
                realtime,
                output,
                timeout,
            };
            let summary = run_simulation(&config, options).await?;
            if !json && !cli.quiet {
                print_summary(&summary);
            }
            if summary.timed_out {
                anyhow::bail!("Simulation timed out before all replies arrived");
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "convoice", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/convoice/config.toml)
/// 3. Built-in defaults
///
/// Environment overrides apply on top, then the result is validated.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    }
    .with_env_overrides();

    config.validate()?;
    Ok(config)
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&std::path::Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(std::path::Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
            if !path.exists() {
                eprintln!("{}", "(file does not exist, using defaults)".dimmed());
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &SimulationSummary) {
    println!();
    println!("{} {}", "Conversation".bold(), summary.conversation_id);
    println!(
        "  {}    {} chunks, {} segments",
        "Audio:".dimmed(),
        summary.chunks_sent,
        summary.segments
    );
    println!(
        "  {}  {} ({} bytes of reply audio)",
        "Replies:".dimmed(),
        summary.replies.len(),
        summary.reply_audio_bytes
    );
    for reply in &summary.replies {
        println!("    {} {}", "●".green(), reply);
    }
    if let Some(reason) = summary.end_reason {
        println!(
            "  {}    {:?}, {} messages",
            "Ended:".dimmed(),
            reason,
            summary.message_count
        );
    }
    for error in &summary.errors {
        eprintln!("  {}", format!("Error: {}", error).red());
    }
    if summary.timed_out {
        eprintln!("  {}", "Timed out waiting for replies".yellow());
    }
}
