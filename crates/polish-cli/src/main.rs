use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use polish_contracts::cards::scan_placeholders;
use polish_contracts::settings::{Settings, SETTINGS_FILE};
use polish_engine::{ChatService, SessionLog, SubmitError};

#[derive(Debug, Parser)]
#[command(name = "prose-polish", version, about = "Prompt-card chat runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one message to a configured model and stream the reply.
    Chat(ChatArgs),
    /// List the `{{placeholder}}` names a template file declares.
    Placeholders(PlaceholdersArgs),
    /// Write a default settings file to edit by hand.
    Init(InitArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Message text; read from stdin when omitted.
    message: Option<String>,
    /// Model key: tongyi, deepseek-v3, deepseek-r1, openai, gemini, custom.
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = SETTINGS_FILE)]
    settings: PathBuf,
    /// Append submission events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct PlaceholdersArgs {
    template: PathBuf,
}

#[derive(Debug, Parser)]
struct InitArgs {
    #[arg(long, default_value = SETTINGS_FILE)]
    settings: PathBuf,
    /// Overwrite an existing file.
    #[arg(long)]
    force: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("prose-polish error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => run_chat(args),
        Command::Placeholders(args) => run_placeholders(args),
        Command::Init(args) => run_init(args),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let settings = Settings::load(&args.settings);
    let model_key = args
        .model
        .unwrap_or_else(|| settings.default_model.clone());

    let message = match args.message {
        Some(message) => message,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read message from stdin")?;
            buffer
        }
    };
    let message = message.trim();
    if message.is_empty() {
        bail!("message is empty");
    }

    let mut service = ChatService::new(settings);
    if let Some(events) = args.events {
        let session_id = format!("session_{}", uuid::Uuid::new_v4());
        service = service.with_log(SessionLog::new(events, session_id));
    }

    let mut stdout = io::stdout();
    let mut sink = |delta: &str| {
        let _ = stdout.write_all(delta.as_bytes());
        let _ = stdout.flush();
    };
    match service.call_model(&model_key, message, &mut sink) {
        Ok(_) => {
            println!();
            Ok(())
        }
        Err(SubmitError::Provider { provider, message }) => {
            bail!("{provider}: {message}")
        }
        Err(err) => Err(err.into()),
    }
}

fn run_placeholders(args: PlaceholdersArgs) -> Result<()> {
    let text = fs::read_to_string(&args.template)
        .with_context(|| format!("failed to read {}", args.template.display()))?;
    for name in scan_placeholders(&text) {
        println!("{name}");
    }
    Ok(())
}

fn run_init(args: InitArgs) -> Result<()> {
    if args.settings.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            args.settings.display()
        );
    }
    Settings::default().save(&args.settings)?;
    println!("Wrote {}", args.settings.display());
    Ok(())
}
