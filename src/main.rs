use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use scribe::bridge::{self, EntryTag, GenerationBridge, GenerationSession};
use scribe::client::OpenAiClient;
use scribe::config::{Cli, Command, KbCommand, PersistedState};
use scribe::knowledge::{KbEvent, KnowledgeBase, KnowledgeBridge, KnowledgeConfig};
use scribe::pricing::CostEstimator;
use scribe::ui;

/// How long `ask` waits for a cancelled generation to wind down.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

type MainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let interactive = matches!(cli.command, None | Some(Command::Chat));
    let log_file = if interactive {
        Some(cli.log_path())
    } else {
        cli.log_file.clone()
    };
    init_tracing(log_file.as_deref())?;

    let client = Arc::new(OpenAiClient::new(cli.client_config()?)?);
    let state_path = cli.state_path();
    let mut state = PersistedState::load(&state_path)?;
    if let Some(model) = &cli.model {
        state.model = model.clone();
    }
    tracing::info!(base_url = client.base_url(), model = %state.model, "starting");

    match &cli.command {
        None | Some(Command::Chat) => {
            let chat = GenerationBridge::new(
                client.clone(),
                cli.retry_policy(),
                CostEstimator::default(),
                GenerationSession::new(state.model.clone(), state.last_response_id.clone()),
            );
            let kb = KnowledgeBridge::new(
                Arc::new(KnowledgeBase::new(client, KnowledgeConfig::default())),
                bridge::DEFAULT_QUEUE_CAPACITY,
            );
            ui::run_tui(ui::App::new(chat, kb, state, state_path))
        }
        Some(Command::Ask { prompt, fresh }) => {
            if *fresh {
                state.last_response_id = None;
            }
            ask(client, &cli, state, &state_path, prompt).await
        }
        Some(Command::Kb { command }) => {
            let kb = KnowledgeBase::new(client, KnowledgeConfig::default());
            run_kb(&kb, command, state.vector_store_id.as_deref()).await
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> MainResult<()> {
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            // The terminal UI owns stdout, so logs go to a file.
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Streams one turn to stdout through the same bridge the TUI uses.
async fn ask(
    client: Arc<OpenAiClient>,
    cli: &Cli,
    mut state: PersistedState,
    state_path: &Path,
    prompt: &str,
) -> MainResult<()> {
    let mut chat = GenerationBridge::new(
        client,
        cli.retry_policy(),
        CostEstimator::default(),
        GenerationSession::new(state.model.clone(), state.last_response_id.clone()),
    );
    chat.submit(prompt, &state.turn_options())?;

    let (interrupt_tx, mut interrupts) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });

    let mut stdout = std::io::stdout();
    let mut printed = 0usize;
    let mut seen = chat.session().transcript().len();
    let mut give_up_at: Option<tokio::time::Instant> = None;
    loop {
        chat.drain_once(64);

        let session = chat.session();
        // Finished entries first: `printed` refers to the text they closed.
        for entry in &session.transcript()[seen..] {
            match entry.tag {
                EntryTag::Assistant => {
                    writeln!(stdout, "{}", entry.text.get(printed..).unwrap_or(""))?;
                    printed = 0;
                }
                EntryTag::Error | EntryTag::Info => eprintln!("{}", entry.text),
                EntryTag::User => {}
            }
        }
        seen = session.transcript().len();
        if let Some(text) = session.streaming_text() {
            write!(stdout, "{}", text.get(printed..).unwrap_or(""))?;
            printed = text.len();
        }
        stdout.flush()?;

        if !session.is_generating() {
            break;
        }
        if give_up_at.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
            tracing::warn!("generation did not stop after cancel, exiting anyway");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            Some(()) = interrupts.recv() => {
                if give_up_at.is_some() {
                    break;
                }
                chat.cancel();
                give_up_at = Some(tokio::time::Instant::now() + CANCEL_GRACE);
            }
        }
    }

    if chat.session().streaming_text().is_some() {
        writeln!(stdout)?;
    }
    eprintln!("{}", chat.session().status_line());
    state.last_response_id = chat.session().last_response_id().map(str::to_string);
    state.save(state_path)?;
    Ok(())
}

async fn run_kb(kb: &KnowledgeBase, command: &KbCommand, selected: Option<&str>) -> MainResult<()> {
    let event = match command {
        KbCommand::List => KbEvent::Stores(kb.list_stores().await?),
        KbCommand::Create { name } => KbEvent::StoreSaved(kb.create_store(name).await?),
        KbCommand::Rename { store_id, name } => {
            KbEvent::StoreSaved(kb.rename_store(store_id, name).await?)
        }
        KbCommand::Delete { store_id } => {
            kb.delete_store(store_id).await?;
            KbEvent::StoreDeleted {
                store_id: store_id.clone(),
            }
        }
        KbCommand::Files { store_id } => KbEvent::Files {
            store_id: store_id.clone(),
            files: kb.list_store_files(store_id).await?,
        },
        KbCommand::Add { store_id, path } => {
            let (file, status) = kb
                .add_document(store_id, path, |message| eprintln!("{}", message))
                .await?;
            KbEvent::DocumentAdded {
                store_id: store_id.clone(),
                file,
                status,
            }
        }
        KbCommand::Remove { store_id, file_id } => {
            kb.remove_file(store_id, file_id).await?;
            KbEvent::FileRemoved {
                store_id: store_id.clone(),
                file_id: file_id.clone(),
            }
        }
    };

    if let Some((_, text)) = ui::describe_kb_event(&event, selected) {
        println!("{}", text);
    }
    Ok(())
}
