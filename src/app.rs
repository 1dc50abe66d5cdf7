use anyhow::Result;
use crossterm::{
    event::{DisableBracketedPaste, EnableBracketedPaste, Event as TermEvent, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::Backend, Terminal};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time;

use crate::config::ThemeConfig;
use crate::credential::CredentialGate;
use crate::edit::{self, EditorCommand};
use crate::logger::log;
use crate::session::{Command, Event, Session};
use crate::store::NoteStore;
use crate::ui;

/// Everything a command needs to run, shared read-only across tasks.
pub struct Services {
    store: NoteStore,
    gate: CredentialGate,
    editor: EditorCommand,
    scratch_dir: PathBuf,
}

impl Services {
    pub fn new(
        store: NoteStore,
        gate: CredentialGate,
        editor: EditorCommand,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            gate,
            editor,
            scratch_dir,
        }
    }

    /// Runs one blocking command to completion and returns its result
    /// event. `LaunchEditor` and `Exit` belong to the runner and yield
    /// nothing here.
    pub fn execute(&self, command: Command) -> Option<Event> {
        let event = match command {
            Command::ListDirectory { ticket } => Event::Listed {
                ticket,
                result: self.store.list(),
            },
            Command::CheckCredential => Event::CredentialChecked(self.gate.exists()),
            Command::EstablishCredential { password } => {
                Event::CredentialEstablished(self.gate.establish(&password))
            }
            Command::VerifyPassword { ticket, password } => Event::PasswordVerified {
                ticket,
                result: self.gate.verify(&password),
            },
            Command::CheckName { ticket, name } => {
                let result = self.store.exists(&name);
                Event::NameChecked {
                    ticket,
                    name,
                    result,
                }
            }
            Command::OpenNote {
                ticket,
                path,
                password,
            } => Event::NoteOpened {
                ticket,
                result: self.store.open(&path, &password),
            },
            Command::BeginEdit { target, password } => Event::EditBegun(edit::prepare(
                &self.store,
                &target,
                &password,
                &self.scratch_dir,
            )),
            Command::CommitEdit { edit, password } => {
                Event::EditCommitted(edit.commit(&self.store, &password))
            }
            Command::DiscardEdit(edit) => Event::EditDiscarded(edit.discard()),
            Command::LaunchEditor(_) | Command::Exit => {
                log("app: runner-only command reached the blocking executor");
                return None;
            }
        };
        Some(event)
    }
}

pub fn enter_terminal() -> io::Result<()> {
    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen, EnableBracketedPaste)?;
    Ok(())
}

pub fn restore_terminal() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, DisableBracketedPaste)?;
    Ok(())
}

/// Owns the session and runs its commands: blocking work on the blocking
/// pool, the editor as an async child process. Every result comes back
/// through one channel.
pub struct App {
    session: Session,
    services: Arc<Services>,
    theme: ThemeConfig,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    tasks: JoinSet<()>,
    input: Option<EventStream>,
}

impl App {
    pub fn new(services: Services, theme: ThemeConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session: Session::new(),
            services: Arc::new(services),
            theme,
            tx,
            rx,
            tasks: JoinSet::new(),
            input: None,
        }
    }

    pub async fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let mut spinner_interval = time::interval(Duration::from_millis(100));
        self.input = Some(EventStream::new());

        let size = terminal.size()?;
        self.session.update(Event::Resize(size.width, size.height));
        let commands = self.session.start();
        let mut done = self.dispatch(commands)?;

        while !done {
            if self.input.is_some() {
                terminal.draw(|f| ui::draw(f, &self.session, &self.theme))?;
            }

            let event = tokio::select! {
                Some(input) = next_input(&mut self.input) => match translate(input?) {
                    Some(event) => event,
                    None => continue,
                },
                Some(event) = self.rx.recv() => event,
                _ = spinner_interval.tick() => Event::Tick,
            };

            if matches!(event, Event::EditorExited { .. }) {
                self.resume(terminal)?;
            }
            let commands = self.session.update(event);
            done = self.dispatch(commands)?;
        }

        log("app: exiting");
        self.tasks.abort_all();
        Ok(())
    }

    /// Starts each command; returns true once the session asks to exit.
    fn dispatch(&mut self, commands: Vec<Command>) -> Result<bool> {
        for command in commands {
            log(&format!("app: dispatch {}", command.name()));
            match command {
                Command::Exit => return Ok(true),
                Command::LaunchEditor(edit) => {
                    log(&format!(
                        "app: handing terminal to editor for {}",
                        edit.target().display()
                    ));
                    self.suspend()?;
                    let services = Arc::clone(&self.services);
                    let tx = self.tx.clone();
                    self.tasks.spawn(async move {
                        let result = services.editor.run(edit.scratch_path()).await;
                        let _ = tx.send(Event::EditorExited { edit, result });
                    });
                }
                other => {
                    let services = Arc::clone(&self.services);
                    let tx = self.tx.clone();
                    self.tasks.spawn_blocking(move || {
                        if let Some(event) = services.execute(other) {
                            let _ = tx.send(event);
                        }
                    });
                }
            }
        }
        Ok(false)
    }

    /// Hands the terminal to the editor. The event stream goes first so it
    /// stops reading the keystrokes meant for the child.
    fn suspend(&mut self) -> Result<()> {
        self.input = None;
        restore_terminal()?;
        Ok(())
    }

    fn resume<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        enter_terminal()?;
        terminal.clear()?;
        self.input = Some(EventStream::new());
        Ok(())
    }
}

async fn next_input(input: &mut Option<EventStream>) -> Option<io::Result<TermEvent>> {
    match input {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn translate(event: TermEvent) -> Option<Event> {
    match event {
        TermEvent::Key(key) => Some(Event::Key(key)),
        TermEvent::Resize(w, h) => Some(Event::Resize(w, h)),
        TermEvent::Paste(text) => Some(Event::Paste(text)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListOrder;
    use crate::crypto::test_params;
    use crate::error::ErrorKind;
    use crate::session::Screen;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    type FakeEditor = Box<dyn FnMut(&Path) -> Result<(), ErrorKind>>;

    /// Drives a session synchronously against real files, with the editor
    /// replaced by a closure.
    struct Harness {
        dir: TempDir,
        session: Session,
        services: Services,
        editor: FakeEditor,
        scratch_seen: Vec<PathBuf>,
        exited: bool,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let notes = dir.path().join("notes");
            fs::create_dir(&notes).unwrap();
            let services = Services::new(
                NoteStore::new(&notes, test_params(), ListOrder::Name),
                CredentialGate::new(&notes, test_params(), StdRng::seed_from_u64(1)),
                EditorCommand::parse("true"),
                dir.path().join("scratch"),
            );
            Self {
                dir,
                session: Session::new(),
                services,
                editor: Box::new(|_| Ok(())),
                scratch_seen: Vec::new(),
                exited: false,
            }
        }

        fn with_password(self, password: &str) -> Self {
            self.services.gate.establish(password).unwrap();
            self
        }

        fn with_note(self, name: &str, body: &str, password: &str) -> Self {
            let plain = self.dir.path().join("seed.md");
            fs::write(&plain, body).unwrap();
            let target = self.services.store.storage_path(name);
            self.services.store.seal(&plain, &target, password).unwrap();
            fs::remove_file(plain).unwrap();
            self
        }

        fn editor(mut self, f: impl FnMut(&Path) -> Result<(), ErrorKind> + 'static) -> Self {
            self.editor = Box::new(f);
            self
        }

        fn start(&mut self) {
            let commands = self.session.start();
            self.pump(commands);
        }

        fn pump(&mut self, commands: Vec<Command>) {
            let mut queue: VecDeque<Command> = commands.into();
            while let Some(command) = queue.pop_front() {
                let event = match command {
                    Command::Exit => {
                        self.exited = true;
                        continue;
                    }
                    Command::LaunchEditor(edit) => {
                        self.scratch_seen.push(edit.scratch_path().to_path_buf());
                        let result = (self.editor)(edit.scratch_path());
                        Event::EditorExited { edit, result }
                    }
                    other => self.services.execute(other).unwrap(),
                };
                queue.extend(self.session.update(event));
            }
        }

        fn key(&mut self, code: KeyCode) {
            let commands = self
                .session
                .update(Event::Key(KeyEvent::new(code, KeyModifiers::NONE)));
            self.pump(commands);
        }

        fn type_line(&mut self, text: &str) {
            for c in text.chars() {
                self.key(KeyCode::Char(c));
            }
            self.key(KeyCode::Enter);
        }

        fn unlock(&mut self, password: &str) {
            self.start();
            assert_eq!(self.session.screen(), &Screen::EnteringPassword);
            self.type_line(password);
            assert_eq!(self.session.screen(), &Screen::FileList);
        }

        fn note_names(&self) -> Vec<String> {
            self.session
                .notes()
                .iter()
                .map(|n| n.display_name.clone())
                .collect()
        }

        fn scratch_files(&self) -> usize {
            fs::read_dir(self.dir.path().join("scratch"))
                .map(|d| d.count())
                .unwrap_or(0)
        }
    }

    #[test]
    fn first_run_establishes_the_password() {
        let mut h = Harness::new();
        h.start();
        assert_eq!(h.session.screen(), &Screen::EstablishingCredential);

        h.type_line("abc");
        h.type_line("abc");

        assert_eq!(h.session.screen(), &Screen::FileList);
        assert!(h.session.password_verified());
        assert!(h.services.gate.exists().unwrap());
        assert_eq!(h.services.gate.verify("abc"), Ok(()));
    }

    #[test]
    fn wrong_password_can_be_retried() {
        let mut h = Harness::new().with_password("abc");
        h.start();
        h.type_line("xyz");
        assert_eq!(h.session.screen(), &Screen::EnteringPassword);
        assert_eq!(h.session.last_error(), Some(&ErrorKind::IncorrectPassword));

        h.type_line("abc");
        assert_eq!(h.session.screen(), &Screen::FileList);
    }

    #[test]
    fn duplicate_note_name_is_refused() {
        let mut h = Harness::new()
            .with_password("abc")
            .with_note("todo", "- milk", "abc");
        h.unlock("abc");
        assert_eq!(h.note_names(), vec!["todo".to_string()]);

        h.key(KeyCode::Enter);
        assert_eq!(h.session.screen(), &Screen::NewNoteName);
        h.type_line("todo");

        assert_eq!(h.session.screen(), &Screen::NewNoteName);
        assert_eq!(
            h.session.last_error(),
            Some(&ErrorKind::NameConflict("todo".to_string()))
        );
        assert!(h.scratch_seen.is_empty());
    }

    #[test]
    fn failed_edit_deletes_scratch_and_keeps_the_note() {
        let mut h = Harness::new()
            .with_password("abc")
            .with_note("a", "original", "abc")
            .editor(|path| {
                fs::write(path, "half-written").unwrap();
                Err(ErrorKind::EditorLaunch("vim exited with status 1".into()))
            });
        h.unlock("abc");
        h.key(KeyCode::Down);
        h.key(KeyCode::Enter);
        assert_eq!(h.session.screen(), &Screen::NoteViewer);

        h.key(KeyCode::Char('e'));

        assert_eq!(h.scratch_seen.len(), 1);
        assert!(!h.scratch_seen[0].exists());
        assert_eq!(h.scratch_files(), 0);
        assert_eq!(h.session.screen(), &Screen::NoteViewer);
        assert!(matches!(
            h.session.last_error(),
            Some(ErrorKind::EditorLaunch(_))
        ));
        let shown = h.session.viewer().content.as_ref().map(|c| c.to_string());
        assert_eq!(shown.as_deref(), Some("original"));
    }

    #[test]
    fn new_note_is_sealed_and_listed() {
        let mut h = Harness::new().with_password("abc").editor(|path| {
            fs::write(path, "# Ideas\n").unwrap();
            Ok(())
        });
        h.unlock("abc");
        h.key(KeyCode::Enter);
        h.type_line("ideas");

        assert_eq!(h.session.screen(), &Screen::FileList);
        assert_eq!(h.note_names(), vec!["ideas".to_string()]);
        assert!(!h.scratch_seen[0].exists());

        let stored = h.services.store.storage_path("ideas");
        assert_eq!(
            h.services.store.open(&stored, "abc").unwrap().as_slice(),
            b"# Ideas\n"
        );
        assert!(!fs::read_to_string(&stored).unwrap().contains("Ideas"));
    }

    #[test]
    fn edited_note_reloads_in_the_viewer() {
        let mut h = Harness::new()
            .with_password("abc")
            .with_note("log", "day one\n", "abc")
            .editor(|path| {
                let mut body = fs::read_to_string(path).unwrap();
                assert_eq!(body, "day one\n");
                body.push_str("day two\n");
                fs::write(path, body).unwrap();
                Ok(())
            });
        h.unlock("abc");
        h.key(KeyCode::Down);
        h.key(KeyCode::Enter);
        h.key(KeyCode::Char('e'));

        assert_eq!(h.session.screen(), &Screen::NoteViewer);
        let shown = h.session.viewer().content.as_ref().map(|c| c.to_string());
        assert_eq!(shown.as_deref(), Some("day one\nday two\n"));
        assert!(!h.scratch_seen[0].exists());
        assert_eq!(h.scratch_files(), 0);
    }

    #[test]
    fn failed_create_is_fatal_without_leftovers() {
        let mut h = Harness::new()
            .with_password("abc")
            .editor(|_| Err(ErrorKind::EditorLaunch("could not start vim".into())));
        h.unlock("abc");
        h.key(KeyCode::Char('n'));
        h.type_line("draft");

        assert!(matches!(
            h.session.screen(),
            Screen::Fatal(ErrorKind::EditorLaunch(_))
        ));
        assert_eq!(h.scratch_files(), 0);
        assert!(!h.services.store.exists("draft").unwrap());

        h.key(KeyCode::Char('x'));
        assert!(h.exited);
    }

    #[test]
    fn corrupt_note_stays_recoverable() {
        let mut h = Harness::new().with_password("abc");
        fs::write(h.services.store.storage_path("broken"), "enotes-v1\n!!!\n").unwrap();
        h.unlock("abc");
        h.key(KeyCode::Down);
        h.key(KeyCode::Enter);

        assert_eq!(h.session.screen(), &Screen::NoteViewer);
        assert!(matches!(h.session.viewer().error, Some(ErrorKind::Format(_))));
        h.key(KeyCode::Esc);
        assert_eq!(h.session.screen(), &Screen::FileList);
        h.key(KeyCode::Char('q'));
        assert!(h.exited);
    }

    #[test]
    fn damaged_marker_with_the_right_password_is_fatal() {
        let mut h = Harness::new().with_password("abc");
        let marker = h.services.gate.marker_path().to_path_buf();
        let blob = fs::read_to_string(&marker).unwrap();
        fs::write(&marker, crate::crypto::damage_body(&blob)).unwrap();

        h.start();
        h.type_line("abc");
        assert!(matches!(
            h.session.screen(),
            Screen::Fatal(ErrorKind::Format(_))
        ));
        assert!(!h.session.password_verified());
    }

    #[test]
    fn runner_only_commands_are_not_executed() {
        let h = Harness::new();
        assert!(h.services.execute(Command::Exit).is_none());
    }
}
