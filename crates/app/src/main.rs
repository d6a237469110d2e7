mod cli;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use conversation::{ChatSession, SubmitError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use transport::{ChatBackend, DemoBackend, HttpBackend};

use crate::cli::Flags;
use crate::render::Renderer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr so the transcript on stdout stays readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let flags = Flags::parse();

    let mut settings = shared::settings::load_settings_or_default();
    flags.apply(&mut settings);

    if flags.save_config {
        let path = shared::settings::config_path().context("no config directory on this platform")?;
        shared::settings::save_to(&path, &settings)?;
        println!("wrote {}", path.display());
        return Ok(());
    }
    tracing::info!(
        base_url = %settings.base_url,
        mode = ?settings.mode,
        streaming = settings.streaming,
        demo = flags.demo,
        "starting chat"
    );

    if flags.demo {
        let mut backend = DemoBackend::new(settings.fallback_step_delay());
        if !settings.streaming {
            backend = backend.without_streaming();
        }
        run(ChatSession::new(backend, settings)).await
    } else {
        let backend = HttpBackend::new(&settings).context("failed to build HTTP client")?;
        run(ChatSession::new(backend, settings)).await
    }
}

fn print_prompt() {
    if let Err(e) = render::write_prompt(&mut std::io::stdout().lock()) {
        tracing::debug!(error = %e, "could not write prompt");
    }
}

async fn run<B: ChatBackend>(session: ChatSession<B>) -> Result<()> {
    for message in session.messages() {
        for line in render::message_lines(message) {
            println!("{}", line);
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = session.with_observer(tx);

    let printer = tokio::spawn(async move {
        let mut renderer = Renderer::new();
        while let Some(update) = rx.recv().await {
            let bot_reply = matches!(
                &update,
                conversation::SessionUpdate::MessageAppended(m) if m.is_bot()
            );
            for line in renderer.render(&update) {
                println!("{}", line);
            }
            if bot_reply {
                print_prompt();
            }
        }
    });

    print_prompt();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match session.submit(&line).await {
            Ok(_) => {}
            Err(SubmitError::Empty) => print_prompt(),
            Err(e) => {
                tracing::warn!(error = %e, "turn did not complete");
                print_prompt();
            }
        }
    }

    // Dropping the session closes the update channel and ends the printer.
    drop(session);
    printer.await.context("transcript printer panicked")?;
    println!();
    Ok(())
}
