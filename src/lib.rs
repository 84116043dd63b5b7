pub mod cache;
pub mod cancellation;
pub mod cli;
pub mod client;
pub mod diff;
pub mod history;
pub mod llm_client;
pub mod managers;
pub mod relay;
pub mod server;
pub mod settings;
pub mod store;
pub mod text;
pub mod tone;

use anyhow::{anyhow, Context};
use cache::ResponseCache;
use cli::{CliArgs, Command, RewriteArgs, ServeArgs};
use client::HttpRewriter;
use diff::{render_plain, DiffStats};
use llm_client::{CompletionError, MistralClient};
use log::{info, warn};
use managers::session::{AppliedRewrite, ToneController};
use relay::{Rewriter, ToneRelay};
use server::ApiServer;
use settings::{AppSettings, API_KEY_ENV};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use store::{JsonFileStore, StoreError};
use tone::ToneAxes;

/// Wire the Mistral client and a fresh cache into a relay.
pub fn build_relay(settings: &AppSettings) -> Result<ToneRelay, CompletionError> {
    let client = MistralClient::new(settings)?;
    let cache = ResponseCache::new(settings.cache_ttl);
    Ok(ToneRelay::new(Arc::new(client), Arc::new(cache)))
}

/// `<data dir>/tonepicker/state.json`
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("tonepicker").join("state.json"))
}

pub async fn run(args: CliArgs, settings: AppSettings) -> anyhow::Result<()> {
    match args.command {
        Command::Serve(serve) => run_server(apply_serve_overrides(settings, &serve)).await,
        command => {
            let state_path = match args.state {
                Some(path) => path,
                None => default_state_path()
                    .ok_or_else(|| anyhow!("Could not determine a data directory; pass --state"))?,
            };
            run_session_command(command, state_path, settings).await
        }
    }
}

fn apply_serve_overrides(mut settings: AppSettings, serve: &ServeArgs) -> AppSettings {
    if let Some(port) = serve.port {
        settings.port = port;
    }
    if let Some(ms) = serve.cache_ttl_ms {
        settings.cache_ttl = Duration::from_millis(ms);
    }
    if let Some(host) = &serve.host {
        settings.host = host.clone();
    }
    settings
}

async fn run_server(settings: AppSettings) -> anyhow::Result<()> {
    if !settings.has_api_key() {
        warn!(
            "{} is not set; uncached rewrites will fail until it is configured",
            API_KEY_ENV
        );
    }
    info!(
        "Using model {} at {} (cache TTL {:?})",
        settings.model, settings.base_url, settings.cache_ttl
    );

    let relay = build_relay(&settings).context("Failed to set up completion client")?;
    let addr = settings.listen_addr();
    let server = ApiServer::start(&addr, Arc::new(relay))
        .await
        .with_context(|| format!("Failed to bind tone server to {}", addr))?;
    println!("Tone server listening on http://{}", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    server.shutdown().await;
    Ok(())
}

async fn run_session_command(
    command: Command,
    state_path: PathBuf,
    settings: AppSettings,
) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileStore::open(&state_path));
    let rewriter: Arc<dyn Rewriter> = match &command {
        Command::Rewrite(RewriteArgs {
            endpoint: Some(url),
            ..
        }) => Arc::new(HttpRewriter::new(url, settings.request_timeout)?),
        _ => Arc::new(build_relay(&settings).context("Failed to set up completion client")?),
    };
    let controller = ToneController::new(store, rewriter);
    let saved = |e: StoreError| {
        anyhow::Error::new(e).context(format!("Failed to save session to {:?}", state_path))
    };

    match command {
        Command::Serve(_) => Err(anyhow!("serve does not operate on a session")),
        Command::Rewrite(args) => rewrite(&controller, args, &state_path).await,
        Command::Undo => {
            if controller.update(|s| s.undo()).map_err(saved)? {
                println!("{}", controller.snapshot().text());
            } else {
                println!("Nothing to undo");
            }
            Ok(())
        }
        Command::Redo => {
            if controller.update(|s| s.redo()).map_err(saved)? {
                println!("{}", controller.snapshot().text());
            } else {
                println!("Nothing to redo");
            }
            Ok(())
        }
        Command::Reset => {
            controller.update(|s| s.reset_all()).map_err(saved)?;
            println!("Session reset");
            Ok(())
        }
        Command::History => {
            let session = controller.snapshot();
            let history = session.history();
            for (i, snapshot) in history.snapshots().iter().enumerate() {
                let marker = if i == history.index() { '>' } else { ' ' };
                println!("{} {:>3}  {}", marker, i, snapshot);
            }
            Ok(())
        }
        Command::Diff => {
            let session = controller.snapshot();
            match session.last_diff().or_else(|| session.step_diff()) {
                Some(script) => println!("{}", render_plain(&script)),
                None => println!("No changes yet"),
            }
            Ok(())
        }
        Command::Label => {
            let axes = controller.snapshot().axes();
            println!(
                "{} (formal {:.2}, friendly {:.2})",
                axes.label(),
                axes.formal,
                axes.friendly
            );
            Ok(())
        }
    }
}

async fn rewrite(
    controller: &ToneController,
    args: RewriteArgs,
    state_path: &std::path::Path,
) -> anyhow::Result<()> {
    controller
        .update(|session| {
            if let Some(text) = args.text {
                session.set_text(text);
            }
            if let (Some(formal), Some(friendly)) = (args.formal, args.friendly) {
                session.set_axes(ToneAxes::new(formal, friendly));
            }
            if let Some(preset) = args.preset {
                session.apply_preset(preset);
            }
        })
        .with_context(|| format!("Failed to save session to {:?}", state_path))?;

    let pending = async {
        match &args.tone {
            Some(label) => controller.apply_label(label).await,
            None => controller.apply_tone().await,
        }
    };
    tokio::pin!(pending);

    let outcome = tokio::select! {
        outcome = &mut pending => outcome,
        _ = tokio::signal::ctrl_c() => {
            controller.cancel();
            pending.await
        }
    };

    match outcome.context("Rewrite failed")? {
        Some(AppliedRewrite { rewrite, diff }) => {
            let stats = DiffStats::of(&diff);
            println!("{}", rewrite.text);
            println!();
            println!("{}", render_plain(&diff));
            println!(
                "{} kept, {} removed, {} added{}",
                stats.equal,
                stats.removed,
                stats.added,
                if rewrite.cached { " (cached)" } else { "" }
            );
        }
        None => println!("Nothing rewritten"),
    }
    Ok(())
}
