use crate::tone::TonePreset;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "tonepicker", version, about = "Tone Picker - rewrite text in a chosen tone")]
pub struct CliArgs {
    /// Enable debug mode with verbose logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Session state file (defaults to the user data directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP relay in front of the completion service
    Serve(ServeArgs),
    /// Rewrite the session text and show what changed
    Rewrite(RewriteArgs),
    /// Step back to the previous rewrite
    Undo,
    /// Step forward again after an undo
    Redo,
    /// Restore the default text and tone and clear history
    Reset,
    /// List every snapshot in the session history
    History,
    /// Show the sentence diff of the current history step
    Diff,
    /// Print the current tone label and axes
    Label,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Cache entry lifetime in milliseconds (overrides CACHE_TTL_MS)
    #[arg(long, value_name = "MS")]
    pub cache_ttl_ms: Option<u64>,

    /// Interface to bind
    #[arg(long)]
    pub host: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RewriteArgs {
    /// New text to rewrite; the session text is used when omitted
    pub text: Option<String>,

    /// Formality, 0 (casual) to 1 (formal)
    #[arg(long, requires = "friendly", conflicts_with_all = ["preset", "tone"])]
    pub formal: Option<f64>,

    /// Friendliness, 0 (direct) to 1 (warm)
    #[arg(long, requires = "formal", conflicts_with_all = ["preset", "tone"])]
    pub friendly: Option<f64>,

    /// One of formal-warm, casual-friendly, formal-direct, casual-direct
    #[arg(long, conflicts_with = "tone")]
    pub preset: Option<TonePreset>,

    /// Free-form tone label sent instead of the axes
    #[arg(long)]
    pub tone: Option<String>,

    /// Use a running tone server instead of calling the model directly
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,
}
