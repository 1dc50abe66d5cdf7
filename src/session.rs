//! The session state machine.
//!
//! [`Session::update`] is the only place session state changes. It takes one
//! [`Event`] (a key press or the result of an earlier command), never blocks,
//! and hands back the [`Command`]s the runner should start. Every command
//! that can go stale carries a [`Ticket`]; a result whose ticket is no longer
//! outstanding is dropped.

use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::path::PathBuf;
use tui_textarea::TextArea;
use zeroize::Zeroizing;

use crate::edit::{EditMode, EditTarget, TempEditSession};
use crate::error::ErrorKind;
use crate::logger::log;
use crate::store::{self, ListEntry, NoteRef};

pub type Ticket = u64;

// Same shape as the "leave empty for current date" default name.
const DEFAULT_NAME_FORMAT: &str = "%b %e %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    CheckingCredential,
    EstablishingCredential,
    EnteringPassword,
    VerifyingPassword,
    FileList,
    NewNoteName,
    NoteEditorCreate,
    NoteEditorEdit,
    NoteViewer,
    Fatal(ErrorKind),
}

/// Where the single temp edit is in its lifecycle. The scratch file itself
/// travels inside [`Command`]s and [`Event`]s; this only tracks that one is
/// out there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    Idle,
    Preparing(EditMode),
    InEditor(EditMode),
    Finishing { mode: EditMode, committing: bool },
}

pub enum Command {
    ListDirectory {
        ticket: Ticket,
    },
    CheckCredential,
    EstablishCredential {
        password: Zeroizing<String>,
    },
    VerifyPassword {
        ticket: Ticket,
        password: Zeroizing<String>,
    },
    CheckName {
        ticket: Ticket,
        name: String,
    },
    OpenNote {
        ticket: Ticket,
        path: PathBuf,
        password: Zeroizing<String>,
    },
    BeginEdit {
        target: EditTarget,
        password: Zeroizing<String>,
    },
    LaunchEditor(TempEditSession),
    CommitEdit {
        edit: TempEditSession,
        password: Zeroizing<String>,
    },
    DiscardEdit(TempEditSession),
    Exit,
}

impl Command {
    /// Name for logs; never includes the password or note content.
    pub fn name(&self) -> &'static str {
        match self {
            Command::ListDirectory { .. } => "listDirectory",
            Command::CheckCredential => "checkCredentialExists",
            Command::EstablishCredential { .. } => "establishCredential",
            Command::VerifyPassword { .. } => "verify",
            Command::CheckName { .. } => "checkName",
            Command::OpenNote { .. } => "openNote",
            Command::BeginEdit { .. } => "createTempEdit",
            Command::LaunchEditor(_) => "launchEditor",
            Command::CommitEdit { .. } => "commitEdit",
            Command::DiscardEdit(_) => "discardEdit",
            Command::Exit => "exit",
        }
    }
}

pub enum Event {
    Key(KeyEvent),
    Paste(String),
    Resize(u16, u16),
    Tick,
    Listed {
        ticket: Ticket,
        result: Result<Vec<NoteRef>, ErrorKind>,
    },
    CredentialChecked(Result<bool, ErrorKind>),
    CredentialEstablished(Result<(), ErrorKind>),
    PasswordVerified {
        ticket: Ticket,
        result: Result<(), ErrorKind>,
    },
    NameChecked {
        ticket: Ticket,
        name: String,
        result: Result<bool, ErrorKind>,
    },
    NoteOpened {
        ticket: Ticket,
        result: Result<Zeroizing<Vec<u8>>, ErrorKind>,
    },
    EditBegun(Result<TempEditSession, ErrorKind>),
    EditorExited {
        edit: TempEditSession,
        result: Result<(), ErrorKind>,
    },
    EditCommitted(Result<(), ErrorKind>),
    EditDiscarded(Result<(), ErrorKind>),
}

/// What the viewer shows for the selected note.
#[derive(Debug, Default)]
pub struct Viewer {
    pub note: Option<NoteRef>,
    pub content: Option<Zeroizing<String>>,
    pub loading: bool,
    pub error: Option<ErrorKind>,
    pub scroll: u16,
}

#[derive(Debug, Default)]
struct Outstanding {
    list: Option<Ticket>,
    verify: Option<Ticket>,
    name: Option<Ticket>,
    open: Option<Ticket>,
}

pub struct Session {
    screen: Screen,
    credential_established: bool,
    password: Option<Zeroizing<String>>,
    password_verified: bool,
    notes: Vec<NoteRef>,
    selected_index: usize,
    pending_note_name: Option<String>,
    edit: EditPhase,
    // Why the running edit is being discarded, reported once cleanup ends.
    discard_reason: Option<ErrorKind>,
    last_error: Option<ErrorKind>,

    password_input: TextArea<'static>,
    confirm_input: TextArea<'static>,
    confirm_focused: bool,
    name_input: TextArea<'static>,
    viewer: Viewer,

    outstanding: Outstanding,
    next_ticket: Ticket,
    quit_requested: bool,
    spinner: usize,
    height: u16,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            screen: Screen::CheckingCredential,
            credential_established: false,
            password: None,
            password_verified: false,
            notes: Vec::new(),
            selected_index: 0,
            pending_note_name: None,
            edit: EditPhase::Idle,
            discard_reason: None,
            last_error: None,
            password_input: masked_input(),
            confirm_input: masked_input(),
            confirm_focused: false,
            name_input: TextArea::default(),
            viewer: Viewer::default(),
            outstanding: Outstanding::default(),
            next_ticket: 0,
            quit_requested: false,
            spinner: 0,
            height: 24,
        }
    }

    /// Startup commands: list the directory and look for the marker.
    pub fn start(&mut self) -> Vec<Command> {
        log("session: start");
        vec![self.relist(), Command::CheckCredential]
    }

    pub fn update(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::Key(key) => {
                if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                    self.on_key(key)
                } else {
                    Vec::new()
                }
            }
            Event::Paste(text) => {
                self.on_paste(&text);
                Vec::new()
            }
            Event::Resize(_, height) => {
                self.height = height;
                Vec::new()
            }
            Event::Tick => {
                self.spinner = self.spinner.wrapping_add(1);
                Vec::new()
            }
            Event::Listed { ticket, result } => self.on_listed(ticket, result),
            Event::CredentialChecked(result) => self.on_credential_checked(result),
            Event::CredentialEstablished(result) => self.on_credential_established(result),
            Event::PasswordVerified { ticket, result } => self.on_password_verified(ticket, result),
            Event::NameChecked {
                ticket,
                name,
                result,
            } => self.on_name_checked(ticket, name, result),
            Event::NoteOpened { ticket, result } => self.on_note_opened(ticket, result),
            Event::EditBegun(result) => self.on_edit_begun(result),
            Event::EditorExited { edit, result } => self.on_editor_exited(edit, result),
            Event::EditCommitted(result) => self.on_edit_committed(result),
            Event::EditDiscarded(result) => self.on_edit_discarded(result),
        }
    }

    // --- read access for the presentation layer ---

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn credential_established(&self) -> bool {
        self.credential_established
    }

    pub fn password_verified(&self) -> bool {
        self.password_verified
    }

    pub fn notes(&self) -> &[NoteRef] {
        &self.notes
    }

    /// The file list rows: the "new note" action first, then every note.
    pub fn entries(&self) -> Vec<ListEntry<'_>> {
        std::iter::once(ListEntry::NewNoteAction)
            .chain(self.notes.iter().map(ListEntry::Note))
            .collect()
    }

    pub fn selected_index(&self) -> usize {
        self.selected_index
    }

    pub fn pending_note_name(&self) -> Option<&str> {
        self.pending_note_name.as_deref()
    }

    pub fn edit_phase(&self) -> EditPhase {
        self.edit
    }

    pub fn last_error(&self) -> Option<&ErrorKind> {
        self.last_error.as_ref()
    }

    pub fn password_input(&self) -> &TextArea<'static> {
        &self.password_input
    }

    pub fn confirm_input(&self) -> &TextArea<'static> {
        &self.confirm_input
    }

    pub fn confirm_focused(&self) -> bool {
        self.confirm_focused
    }

    pub fn name_input(&self) -> &TextArea<'static> {
        &self.name_input
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn is_checking_name(&self) -> bool {
        self.outstanding.name.is_some()
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    pub fn spinner(&self) -> usize {
        self.spinner
    }

    // --- input ---

    fn on_key(&mut self, key: KeyEvent) -> Vec<Command> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return self.request_quit();
        }
        if self.quit_requested {
            return Vec::new();
        }

        match self.screen {
            Screen::EstablishingCredential => self.on_establish_key(key),
            Screen::EnteringPassword => self.on_password_key(key),
            Screen::FileList => self.on_file_list_key(key),
            Screen::NewNoteName => self.on_new_name_key(key),
            Screen::NoteViewer => self.on_viewer_key(key),
            Screen::Fatal(_) => self.request_quit(),
            // Waiting on a command or the editor.
            Screen::CheckingCredential
            | Screen::VerifyingPassword
            | Screen::NoteEditorCreate
            | Screen::NoteEditorEdit => Vec::new(),
        }
    }

    fn on_paste(&mut self, text: &str) {
        let line: String = text.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        let input = match self.screen {
            Screen::EstablishingCredential if self.confirm_focused => &mut self.confirm_input,
            Screen::EstablishingCredential | Screen::EnteringPassword => &mut self.password_input,
            Screen::NewNoteName => &mut self.name_input,
            _ => return,
        };
        input.insert_str(line);
    }

    fn on_establish_key(&mut self, key: KeyEvent) -> Vec<Command> {
        match key.code {
            KeyCode::Esc => self.request_quit(),
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.confirm_focused = !self.confirm_focused;
                Vec::new()
            }
            KeyCode::Enter => {
                let first = first_line(&self.password_input);
                if first.is_empty() {
                    self.confirm_focused = false;
                    return Vec::new();
                }
                if !self.confirm_focused {
                    self.confirm_focused = true;
                    return Vec::new();
                }

                let second = first_line(&self.confirm_input);
                if *first != *second {
                    self.confirm_input = masked_input();
                    self.last_error = Some(ErrorKind::PasswordMismatch);
                    return Vec::new();
                }

                self.password_input = masked_input();
                self.confirm_input = masked_input();
                self.confirm_focused = false;
                self.last_error = None;
                self.password = Some(first.clone());
                self.screen = Screen::VerifyingPassword;
                log("session: establishing credential");
                vec![Command::EstablishCredential { password: first }]
            }
            _ => {
                let input = if self.confirm_focused {
                    &mut self.confirm_input
                } else {
                    &mut self.password_input
                };
                feed_line(input, key);
                Vec::new()
            }
        }
    }

    fn on_password_key(&mut self, key: KeyEvent) -> Vec<Command> {
        match key.code {
            KeyCode::Esc => self.request_quit(),
            KeyCode::Enter => {
                let attempt = first_line(&self.password_input);
                if attempt.is_empty() {
                    return Vec::new();
                }
                self.password_input = masked_input();
                self.password = Some(attempt.clone());
                self.password_verified = false;
                self.screen = Screen::VerifyingPassword;
                vec![self.verify(attempt)]
            }
            _ => {
                feed_line(&mut self.password_input, key);
                Vec::new()
            }
        }
    }

    fn on_file_list_key(&mut self, key: KeyEvent) -> Vec<Command> {
        let last = self.notes.len();
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.request_quit(),
            KeyCode::Char('j') | KeyCode::Down => {
                self.selected_index = (self.selected_index + 1).min(last);
                Vec::new()
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected_index = self.selected_index.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Char('g') | KeyCode::Home => {
                self.selected_index = 0;
                Vec::new()
            }
            KeyCode::Char('G') | KeyCode::End => {
                self.selected_index = last;
                Vec::new()
            }
            KeyCode::Char('r') => vec![self.relist()],
            KeyCode::Char('n') => {
                self.to_new_note_name();
                Vec::new()
            }
            KeyCode::Enter => self.select_entry(),
            _ => Vec::new(),
        }
    }

    fn select_entry(&mut self) -> Vec<Command> {
        let chosen = match self.entries().get(self.selected_index) {
            Some(ListEntry::Note(note)) => Some((*note).clone()),
            Some(ListEntry::NewNoteAction) | None => None,
        };
        match chosen {
            Some(note) => self.open_in_viewer(note),
            None => {
                self.to_new_note_name();
                Vec::new()
            }
        }
    }

    fn to_new_note_name(&mut self) {
        self.name_input = TextArea::default();
        self.name_input
            .set_placeholder_text("New note name (leave empty for current date)");
        self.pending_note_name = None;
        self.last_error = None;
        self.screen = Screen::NewNoteName;
    }

    fn on_new_name_key(&mut self, key: KeyEvent) -> Vec<Command> {
        match key.code {
            KeyCode::Esc => {
                self.outstanding.name = None;
                self.pending_note_name = None;
                self.last_error = None;
                self.screen = Screen::FileList;
                Vec::new()
            }
            KeyCode::Enter => {
                if self.outstanding.name.is_some() {
                    return Vec::new();
                }
                let typed = first_line(&self.name_input);
                let name = match typed.trim() {
                    "" => Local::now().format(DEFAULT_NAME_FORMAT).to_string(),
                    other => other.to_string(),
                };
                if let Err(e) = store::validate_name(&name) {
                    self.last_error = Some(e);
                    return Vec::new();
                }
                self.last_error = None;
                self.pending_note_name = Some(name.clone());
                let ticket = self.issue();
                self.outstanding.name = Some(ticket);
                vec![Command::CheckName { ticket, name }]
            }
            _ => {
                feed_line(&mut self.name_input, key);
                Vec::new()
            }
        }
    }

    fn on_viewer_key(&mut self, key: KeyEvent) -> Vec<Command> {
        let page = (self.height / 2).max(1);
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.outstanding.open = None;
                self.viewer = Viewer::default();
                self.last_error = None;
                self.screen = Screen::FileList;
                Vec::new()
            }
            KeyCode::Char('e') => {
                let ready = self.viewer.content.is_some() && !self.viewer.loading;
                match (&self.viewer.note, ready) {
                    (Some(note), true) => {
                        let path = note.storage_path.clone();
                        self.last_error = None;
                        self.screen = Screen::NoteEditorEdit;
                        self.begin_edit(EditTarget::Existing(path))
                    }
                    _ => Vec::new(),
                }
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.viewer.scroll = self.viewer.scroll.saturating_add(1);
                Vec::new()
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.viewer.scroll = self.viewer.scroll.saturating_sub(1);
                Vec::new()
            }
            KeyCode::PageDown | KeyCode::Char(' ') => {
                self.viewer.scroll = self.viewer.scroll.saturating_add(page);
                Vec::new()
            }
            KeyCode::PageUp => {
                self.viewer.scroll = self.viewer.scroll.saturating_sub(page);
                Vec::new()
            }
            KeyCode::Char('g') | KeyCode::Home => {
                self.viewer.scroll = 0;
                Vec::new()
            }
            KeyCode::Char('G') | KeyCode::End => {
                let lines = self
                    .viewer
                    .content
                    .as_ref()
                    .map(|c| c.lines().count())
                    .unwrap_or(0);
                self.viewer.scroll = u16::try_from(lines).unwrap_or(u16::MAX);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    // --- command results ---

    fn on_listed(&mut self, ticket: Ticket, result: Result<Vec<NoteRef>, ErrorKind>) -> Vec<Command> {
        if self.outstanding.list != Some(ticket) {
            return Vec::new();
        }
        self.outstanding.list = None;
        match result {
            Ok(notes) => {
                self.notes = notes;
                self.selected_index = self.selected_index.min(self.notes.len());
                Vec::new()
            }
            // The note directory itself is unreadable.
            Err(ErrorKind::NotFound(dir)) => self.fail(ErrorKind::Io(format!(
                "note directory {} is missing",
                dir
            ))),
            Err(e) => self.fail(e),
        }
    }

    fn on_credential_checked(&mut self, result: Result<bool, ErrorKind>) -> Vec<Command> {
        if self.screen != Screen::CheckingCredential {
            return Vec::new();
        }
        match result {
            Ok(true) => {
                self.credential_established = true;
                self.screen = Screen::EnteringPassword;
                Vec::new()
            }
            Ok(false) => {
                self.screen = Screen::EstablishingCredential;
                Vec::new()
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_credential_established(&mut self, result: Result<(), ErrorKind>) -> Vec<Command> {
        if self.screen != Screen::VerifyingPassword || self.credential_established {
            return Vec::new();
        }
        match result {
            Ok(()) => {
                self.credential_established = true;
                match self.password.clone() {
                    Some(password) => vec![self.verify(password)],
                    None => self.fail(ErrorKind::Io("password lost before verification".into())),
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_password_verified(&mut self, ticket: Ticket, result: Result<(), ErrorKind>) -> Vec<Command> {
        if self.outstanding.verify != Some(ticket) {
            return Vec::new();
        }
        self.outstanding.verify = None;
        match result {
            Ok(()) => {
                log("session: password verified");
                self.password_verified = true;
                self.last_error = None;
                self.screen = Screen::FileList;
                Vec::new()
            }
            Err(ErrorKind::IncorrectPassword) => {
                log("session: incorrect password");
                self.password_verified = false;
                self.last_error = Some(ErrorKind::IncorrectPassword);
                self.screen = Screen::EnteringPassword;
                Vec::new()
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_name_checked(
        &mut self,
        ticket: Ticket,
        name: String,
        result: Result<bool, ErrorKind>,
    ) -> Vec<Command> {
        if self.outstanding.name != Some(ticket) {
            return Vec::new();
        }
        self.outstanding.name = None;
        match result {
            Ok(true) => {
                self.pending_note_name = None;
                self.last_error = Some(ErrorKind::NameConflict(name));
                Vec::new()
            }
            Ok(false) => {
                self.screen = Screen::NoteEditorCreate;
                self.begin_edit(EditTarget::NewNote(name))
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_note_opened(
        &mut self,
        ticket: Ticket,
        result: Result<Zeroizing<Vec<u8>>, ErrorKind>,
    ) -> Vec<Command> {
        if self.outstanding.open != Some(ticket) {
            return Vec::new();
        }
        self.outstanding.open = None;
        self.viewer.loading = false;
        match result {
            Ok(bytes) => {
                // Non-UTF-8 notes are shown lossily; edits still see the raw bytes.
                self.viewer.content =
                    Some(Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned()));
                self.viewer.error = None;
                Vec::new()
            }
            Err(e) => self.note_failure(e),
        }
    }

    fn on_edit_begun(&mut self, result: Result<TempEditSession, ErrorKind>) -> Vec<Command> {
        let mode = match self.edit {
            EditPhase::Preparing(mode) => mode,
            other => {
                log(&format!("session: unexpected scratch session in phase {:?}", other));
                return match result {
                    Ok(edit) => {
                        self.edit = EditPhase::Finishing {
                            mode: edit.mode(),
                            committing: false,
                        };
                        vec![Command::DiscardEdit(edit)]
                    }
                    Err(_) => Vec::new(),
                };
            }
        };

        match result {
            Ok(edit) if self.quit_requested => {
                self.edit = EditPhase::Finishing {
                    mode,
                    committing: false,
                };
                vec![Command::DiscardEdit(edit)]
            }
            Ok(edit) => {
                self.edit = EditPhase::InEditor(mode);
                vec![Command::LaunchEditor(edit)]
            }
            Err(e) => {
                self.edit = EditPhase::Idle;
                if self.quit_requested {
                    return vec![Command::Exit];
                }
                match mode {
                    EditMode::Create => self.fail(e),
                    EditMode::Edit => self.note_failure(e),
                }
            }
        }
    }

    fn on_editor_exited(
        &mut self,
        edit: TempEditSession,
        result: Result<(), ErrorKind>,
    ) -> Vec<Command> {
        let mode = edit.mode();
        let password = if self.password_verified {
            self.password.clone()
        } else {
            None
        };

        match (result, password) {
            (Ok(()), Some(password)) if !self.quit_requested => {
                self.edit = EditPhase::Finishing {
                    mode,
                    committing: true,
                };
                vec![Command::CommitEdit { edit, password }]
            }
            (result, _) => {
                if let Err(e) = result {
                    log(&format!("session: editor failed ({})", e.label()));
                    self.discard_reason = Some(e);
                }
                self.edit = EditPhase::Finishing {
                    mode,
                    committing: false,
                };
                vec![Command::DiscardEdit(edit)]
            }
        }
    }

    fn on_edit_committed(&mut self, result: Result<(), ErrorKind>) -> Vec<Command> {
        let mode = match self.edit {
            EditPhase::Finishing {
                mode,
                committing: true,
            } => mode,
            _ => return Vec::new(),
        };
        self.edit = EditPhase::Idle;

        if self.quit_requested {
            if let Err(e) = result {
                log(&format!("session: commit failed during quit ({})", e));
            }
            return vec![Command::Exit];
        }
        if matches!(self.screen, Screen::Fatal(_)) {
            return Vec::new();
        }

        match result {
            Ok(()) => self.after_edit(mode),
            Err(e) => self.fail(e),
        }
    }

    fn on_edit_discarded(&mut self, result: Result<(), ErrorKind>) -> Vec<Command> {
        let mode = match self.edit {
            EditPhase::Finishing {
                mode,
                committing: false,
            } => mode,
            _ => return Vec::new(),
        };
        self.edit = EditPhase::Idle;
        let reason = self.discard_reason.take();

        if self.quit_requested {
            if let Err(e) = result {
                log(&format!("session: discard failed during quit ({})", e));
            }
            return vec![Command::Exit];
        }
        if matches!(self.screen, Screen::Fatal(_)) {
            return Vec::new();
        }

        if let Err(cleanup) = result {
            return self.fail(cleanup);
        }
        let reason =
            reason.unwrap_or_else(|| ErrorKind::EditorLaunch("edit was cancelled".to_string()));
        match mode {
            EditMode::Create => self.fail(reason),
            EditMode::Edit => {
                let commands = self.after_edit(mode);
                self.last_error = Some(reason);
                commands
            }
        }
    }

    // --- helpers ---

    fn after_edit(&mut self, mode: EditMode) -> Vec<Command> {
        match mode {
            EditMode::Create => {
                self.pending_note_name = None;
                self.last_error = None;
                self.screen = Screen::FileList;
                vec![self.relist()]
            }
            EditMode::Edit => match self.viewer.note.clone() {
                Some(note) => self.open_in_viewer(note),
                None => {
                    self.screen = Screen::FileList;
                    vec![self.relist()]
                }
            },
        }
    }

    fn open_in_viewer(&mut self, note: NoteRef) -> Vec<Command> {
        let Some(password) = self.verified_password() else {
            return Vec::new();
        };
        let ticket = self.issue();
        self.outstanding.open = Some(ticket);
        let path = note.storage_path.clone();
        self.viewer = Viewer {
            note: Some(note),
            loading: true,
            ..Viewer::default()
        };
        self.last_error = None;
        self.screen = Screen::NoteViewer;
        vec![Command::OpenNote {
            ticket,
            path,
            password,
        }]
    }

    fn begin_edit(&mut self, target: EditTarget) -> Vec<Command> {
        debug_assert_eq!(
            self.edit,
            EditPhase::Idle,
            "a second temp edit was started while one is active"
        );
        if self.edit != EditPhase::Idle {
            return Vec::new();
        }
        let Some(password) = self.verified_password() else {
            return Vec::new();
        };
        self.edit = EditPhase::Preparing(target.mode());
        vec![Command::BeginEdit { target, password }]
    }

    /// Failures scoped to one note: a vanished note sends the user back to
    /// a fresh listing, an undecryptable one is shown in the viewer, and
    /// anything else ends the session.
    fn note_failure(&mut self, err: ErrorKind) -> Vec<Command> {
        log(&format!("session: note failure ({})", err.label()));
        match err {
            ErrorKind::NotFound(_) => {
                self.outstanding.open = None;
                self.viewer = Viewer::default();
                self.last_error = Some(err);
                self.screen = Screen::FileList;
                vec![self.relist()]
            }
            ErrorKind::IncorrectPassword | ErrorKind::Format(_) => {
                self.viewer.loading = false;
                self.viewer.content = None;
                self.viewer.error = Some(err);
                self.screen = Screen::NoteViewer;
                Vec::new()
            }
            other => self.fail(other),
        }
    }

    fn fail(&mut self, err: ErrorKind) -> Vec<Command> {
        log(&format!("session: fatal {}: {}", err.label(), err));
        self.outstanding = Outstanding::default();
        self.last_error = Some(err.clone());
        self.screen = Screen::Fatal(err);
        Vec::new()
    }

    fn request_quit(&mut self) -> Vec<Command> {
        if !self.quit_requested {
            log(&format!("session: quit requested (edit phase {:?})", self.edit));
        }
        self.quit_requested = true;
        self.outstanding = Outstanding::default();
        if self.edit == EditPhase::Idle {
            vec![Command::Exit]
        } else {
            Vec::new()
        }
    }

    fn relist(&mut self) -> Command {
        let ticket = self.issue();
        self.outstanding.list = Some(ticket);
        Command::ListDirectory { ticket }
    }

    fn verify(&mut self, password: Zeroizing<String>) -> Command {
        let ticket = self.issue();
        self.outstanding.verify = Some(ticket);
        Command::VerifyPassword { ticket, password }
    }

    fn verified_password(&self) -> Option<Zeroizing<String>> {
        if self.password_verified {
            self.password.clone()
        } else {
            None
        }
    }

    fn issue(&mut self) -> Ticket {
        self.next_ticket += 1;
        self.next_ticket
    }
}

fn masked_input() -> TextArea<'static> {
    let mut input = TextArea::default();
    input.set_mask_char('•');
    input
}

fn first_line(input: &TextArea<'static>) -> Zeroizing<String> {
    Zeroizing::new(input.lines().first().cloned().unwrap_or_default())
}

// Single-line inputs: never let the textarea insert a newline.
fn feed_line(input: &mut TextArea<'static>, key: KeyEvent) {
    let newline_chord = key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('m') | KeyCode::Char('j'));
    if newline_chord || key.code == KeyCode::Enter {
        return;
    }
    input.input(key);
}
