use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::path::PathBuf;

mod app;
mod config;
mod credential;
mod crypto;
mod edit;
mod error;
mod logger;
mod markdown;
mod session;
mod store;
mod ui;

use crate::app::{restore_terminal, App, Services};
use crate::credential::CredentialGate;
use crate::edit::EditorCommand;
use crate::store::NoteStore;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding the encrypted notes (default: config, then the current directory)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the TUI application (default)
    Tui,
    /// Print note names and modification times without unlocking
    List,
}

fn list_notes(store: &NoteStore) -> Result<()> {
    let notes = store
        .list()
        .with_context(|| format!("listing {}", store.dir().display()))?;
    if notes.is_empty() {
        println!("No notes in {}", store.dir().display());
        return Ok(());
    }
    let width = notes
        .iter()
        .map(|n| n.display_name.chars().count())
        .max()
        .unwrap_or(0);
    for note in notes {
        println!(
            "{:<width$}  {}",
            note.display_name,
            note.modified_at.format("%Y-%m-%d %H:%M"),
            width = width
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal();
        default_hook(info);
    }));

    logger::init();
    let args = Args::parse();
    let app_config = config::load_config();

    let notes_dir = match args.dir.or_else(|| app_config.general.notes_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving the current directory")?,
    };
    let store = NoteStore::new(&notes_dir, app_config.kdf, app_config.general.sort);

    if let Some(Commands::List) = args.command {
        return list_notes(&store);
    }

    let gate = CredentialGate::new(&notes_dir, app_config.kdf, StdRng::from_os_rng());
    let editor = EditorCommand::parse(&config::resolve_editor(
        app_config.general.editor.as_deref(),
    ));
    let scratch_dir = app_config
        .general
        .scratch_dir
        .clone()
        .unwrap_or_else(edit::default_scratch_dir);
    logger::log(&format!(
        "main: notes in {}, marker {}, editor {}",
        notes_dir.display(),
        gate.marker_path().display(),
        editor.program()
    ));

    let services = Services::new(store, gate, editor, scratch_dir);
    let mut app = App::new(services, app_config.theme.clone());

    app::enter_terminal()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    let app_result = app.run(&mut terminal).await;

    drop(app);
    let _ = restore_terminal();
    if let Err(err) = app_result {
        logger::log(&format!("main: {:?}", err));
        eprintln!("Error: {:?}", err);
    }
    Ok(())
}
