use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use tui_textarea::TextArea;

use crate::config::{self, ThemeConfig};
use crate::edit::EditMode;
use crate::error::ErrorKind;
use crate::markdown;
use crate::session::{EditPhase, Screen, Session};
use crate::store::ListEntry;

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Draws one frame. Reads the session, never changes it.
pub fn draw(f: &mut Frame, session: &Session, theme: &ThemeConfig) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(f.area());

    f.render_widget(
        Block::default().style(Style::default().bg(theme.background).fg(theme.foreground)),
        f.area(),
    );

    let header = Paragraph::new(format!(" enotes {}", config::APP_VERSION))
        .style(Style::default().fg(theme.header).add_modifier(Modifier::BOLD));
    f.render_widget(header, chunks[0]);

    match session.screen() {
        Screen::CheckingCredential => {
            render_waiting(f, chunks[1], session, theme, "Looking for notes")
        }
        Screen::VerifyingPassword => {
            let label = if session.credential_established() {
                "Verifying password"
            } else {
                "Creating password"
            };
            render_waiting(f, chunks[1], session, theme, label);
        }
        Screen::EstablishingCredential => render_establish(f, chunks[1], session, theme),
        Screen::EnteringPassword => render_unlock(f, chunks[1], session, theme),
        Screen::FileList => render_list(f, chunks[1], session, theme),
        Screen::NewNoteName => {
            render_list(f, chunks[1], session, theme);
            render_name_prompt(f, chunks[1], session, theme);
        }
        Screen::NoteEditorCreate | Screen::NoteEditorEdit => {
            let label = match session.edit_phase() {
                EditPhase::Preparing(EditMode::Edit) => "Decrypting note for editing".to_string(),
                EditPhase::Preparing(EditMode::Create) => match session.pending_note_name() {
                    Some(name) => format!("Preparing \"{}\"", name),
                    None => "Preparing new note".to_string(),
                },
                EditPhase::InEditor(_) => "Waiting for the editor".to_string(),
                EditPhase::Finishing {
                    committing: true, ..
                } => "Encrypting note".to_string(),
                EditPhase::Finishing { .. } | EditPhase::Idle => "Cleaning up".to_string(),
            };
            render_waiting(f, chunks[1], session, theme, &label);
        }
        Screen::NoteViewer => render_viewer(f, chunks[1], session, theme),
        Screen::Fatal(err) => render_fatal(f, chunks[1], err, theme),
    }

    render_footer(f, chunks[2], session, theme);
}

fn spinner_frame(session: &Session) -> &'static str {
    SPINNER[session.spinner() % SPINNER.len()]
}

fn render_waiting(
    f: &mut Frame,
    area: Rect,
    session: &Session,
    theme: &ThemeConfig,
    label: &str,
) {
    let area = centered_rect(50, 20, area);
    let text = format!("{} {}...", spinner_frame(session), label);
    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .style(Style::default().fg(theme.spinner))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border_inactive)),
        );
    f.render_widget(Clear, area);
    f.render_widget(paragraph, area);
}

fn render_input(
    f: &mut Frame,
    area: Rect,
    input: &TextArea<'static>,
    title: &str,
    active: bool,
    theme: &ThemeConfig,
) {
    let color = if active {
        theme.border_active
    } else {
        theme.border_inactive
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title.to_string())
        .border_style(Style::default().fg(color));
    let inner = block.inner(area);
    f.render_widget(block, area);
    f.render_widget(input, inner);
}

fn notice_line(err: Option<&ErrorKind>, theme: &ThemeConfig) -> Line<'static> {
    match err {
        Some(e) => {
            let color = if e.is_recoverable() {
                theme.spinner
            } else {
                theme.error
            };
            Line::from(Span::styled(e.to_string(), Style::default().fg(color)))
        }
        None => Line::default(),
    }
}

fn render_establish(f: &mut Frame, area: Rect, session: &Session, theme: &ThemeConfig) {
    let area = centered_rect(60, 60, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Set a password ")
        .border_style(Style::default().fg(theme.border_active));
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .margin(2)
        .split(area);

    let info = Paragraph::new(
        "No notes are protected here yet. Choose the password for this directory.\nIt cannot be recovered if lost.",
    )
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true });
    f.render_widget(info, chunks[0]);

    let confirm = session.confirm_focused();
    render_input(f, chunks[1], session.password_input(), " Password ", !confirm, theme);
    render_input(f, chunks[2], session.confirm_input(), " Confirm ", confirm, theme);
    f.render_widget(
        Paragraph::new(notice_line(session.last_error(), theme)).alignment(Alignment::Center),
        chunks[3],
    );
}

fn render_unlock(f: &mut Frame, area: Rect, session: &Session, theme: &ThemeConfig) {
    let area = centered_rect(50, 40, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Unlock notes ")
        .border_style(Style::default().fg(theme.border_active));
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .margin(2)
        .split(area);

    render_input(f, chunks[0], session.password_input(), " Password ", true, theme);
    f.render_widget(
        Paragraph::new(notice_line(session.last_error(), theme)).alignment(Alignment::Center),
        chunks[1],
    );
}

fn render_list(f: &mut Frame, area: Rect, session: &Session, theme: &ThemeConfig) {
    let items: Vec<ListItem> = session
        .entries()
        .into_iter()
        .map(|entry| match entry {
            ListEntry::NewNoteAction => ListItem::new(Line::from(Span::styled(
                "   + New note",
                Style::default().fg(theme.header),
            ))),
            ListEntry::Note(note) => ListItem::new(Line::from(vec![
                Span::raw(format!("   {}", note.display_name)),
                Span::styled(
                    format!("  {}", note.modified_at.format("%Y-%m-%d %H:%M")),
                    Style::default().fg(theme.muted),
                ),
            ])),
        })
        .collect();

    let active = *session.screen() == Screen::FileList;
    let border = if active {
        theme.border_active
    } else {
        theme.border_inactive
    };
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Notes ({}) ", session.notes().len()))
                .border_style(Style::default().fg(border)),
        )
        .highlight_style(
            Style::default()
                .bg(theme.selection_bg)
                .fg(theme.selection_fg)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">>");

    let mut state = ListState::default();
    state.select(Some(session.selected_index()));
    f.render_stateful_widget(list, area, &mut state);
}

fn render_name_prompt(f: &mut Frame, area: Rect, session: &Session, theme: &ThemeConfig) {
    let area = centered_rect(60, 30, area);
    let area = Rect {
        height: area.height.min(5),
        ..area
    };
    f.render_widget(Clear, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);
    render_input(f, chunks[0], session.name_input(), " New note ", true, theme);

    let status = if session.is_checking_name() {
        Line::from(Span::styled(
            format!("{} checking name...", spinner_frame(session)),
            Style::default().fg(theme.spinner),
        ))
    } else {
        notice_line(session.last_error(), theme)
    };
    f.render_widget(Paragraph::new(status), chunks[1]);
}

fn render_viewer(f: &mut Frame, area: Rect, session: &Session, theme: &ThemeConfig) {
    let viewer = session.viewer();
    let title = match &viewer.note {
        Some(note) => format!(
            " {} • {} ",
            note.display_name,
            note.modified_at.format("%Y-%m-%d %H:%M")
        ),
        None => " Note ".to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(theme.border_active));

    let paragraph = if viewer.loading {
        Paragraph::new(format!("{} Decrypting...", spinner_frame(session)))
            .style(Style::default().fg(theme.spinner))
    } else if let Some(err) = &viewer.error {
        Paragraph::new(vec![
            Line::from(Span::styled(
                format!("This note cannot be shown ({})", err.label()),
                Style::default().fg(theme.error).add_modifier(Modifier::BOLD),
            )),
            Line::from(err.to_string()),
        ])
    } else if let Some(content) = &viewer.content {
        Paragraph::new(markdown::render(content, theme))
            .wrap(Wrap { trim: false })
            .scroll((viewer.scroll, 0))
    } else {
        Paragraph::new("")
    };
    f.render_widget(paragraph.block(block), area);
}

fn render_fatal(f: &mut Frame, area: Rect, err: &ErrorKind, theme: &ThemeConfig) {
    let area = centered_rect(70, 40, area);
    let text = vec![
        Line::from(Span::styled(
            err.label(),
            Style::default().fg(theme.error).add_modifier(Modifier::BOLD),
        )),
        Line::default(),
        Line::from(err.to_string()),
        Line::default(),
        Line::from(Span::styled(
            "Press any key to exit.",
            Style::default().fg(theme.muted),
        )),
    ];
    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Error ")
                .border_style(Style::default().fg(theme.error)),
        );
    f.render_widget(Clear, area);
    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, area: Rect, session: &Session, theme: &ThemeConfig) {
    let help = match session.screen() {
        Screen::EstablishingCredential => " Tab: Switch Field  •  Enter: Submit  •  Esc: Quit ",
        Screen::EnteringPassword => " Enter: Unlock  •  Esc: Quit ",
        Screen::FileList => " j/k: Move  •  Enter: Open  •  n: New  •  r: Refresh  •  q: Quit ",
        Screen::NewNoteName => " Enter: Create  •  Esc: Cancel ",
        Screen::NoteViewer => " e: Edit  •  j/k: Scroll  •  PgUp/PgDn: Page  •  g/G: Top/Bottom  •  q: Back ",
        Screen::Fatal(_) => " Any key: Exit ",
        Screen::CheckingCredential
        | Screen::VerifyingPassword
        | Screen::NoteEditorCreate
        | Screen::NoteEditorEdit => " Ctrl+C: Quit ",
    };

    let help = if session.quit_requested() {
        " Finishing the current edit before exiting... "
    } else {
        help
    };

    let mut lines = Vec::new();
    // Notices the screen itself does not already show.
    let shown_inline = matches!(
        session.screen(),
        Screen::EstablishingCredential | Screen::EnteringPassword | Screen::NewNoteName | Screen::Fatal(_)
    );
    if !shown_inline {
        lines.push(notice_line(session.last_error(), theme));
    } else {
        lines.push(Line::default());
    }
    lines.push(Line::from(Span::styled(help, Style::default().fg(theme.border_inactive))));
    f.render_widget(Paragraph::new(lines), area);
}

pub fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Command, Event};
    use crate::store::NoteRef;
    use chrono::Local;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::{backend::TestBackend, Terminal};
    use std::path::PathBuf;

    fn screen_text(session: &Session) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        let theme = ThemeConfig::default();
        terminal.draw(|f| draw(f, session, &theme)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn startup_shows_a_spinner() {
        let mut session = Session::new();
        session.start();
        assert!(screen_text(&session).contains("Looking for notes"));
    }

    #[test]
    fn list_starts_with_new_note_entry() {
        let mut session = Session::new();
        let list_ticket = match session.start().first() {
            Some(Command::ListDirectory { ticket }) => *ticket,
            _ => panic!("expected listDirectory"),
        };
        session.update(Event::Listed {
            ticket: list_ticket,
            result: Ok(vec![NoteRef {
                storage_path: PathBuf::from("groceries.md.enc"),
                display_name: "groceries".into(),
                modified_at: Local::now(),
            }]),
        });
        session.update(Event::CredentialChecked(Ok(true)));
        for c in "pw".chars() {
            session.update(Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)));
        }
        let text = screen_text(&session);
        assert!(text.contains("Unlock notes"));
        assert!(!text.contains("pw"));

        let commands = session.update(Event::Key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE)));
        let ticket = match commands.first() {
            Some(Command::VerifyPassword { ticket, .. }) => *ticket,
            _ => panic!("expected verify"),
        };
        session.update(Event::PasswordVerified {
            ticket,
            result: Ok(()),
        });

        let text = screen_text(&session);
        let new_at = text.find("+ New note").unwrap();
        let note_at = text.find("groceries").unwrap();
        assert!(new_at < note_at);
    }

    #[test]
    fn fatal_screen_keeps_the_message() {
        let mut session = Session::new();
        session.start();
        session.update(Event::CredentialChecked(Err(ErrorKind::Io(
            "permission denied".into(),
        ))));
        let text = screen_text(&session);
        assert!(text.contains("IOError"));
        assert!(text.contains("permission denied"));
        assert!(text.contains("Press any key to exit."));
    }

    #[test]
    fn centered_rect_stays_inside() {
        let outer = Rect::new(0, 0, 100, 50);
        let inner = centered_rect(50, 20, outer);
        assert_eq!(inner.width, 50);
        assert!(inner.x >= 25 && inner.bottom() <= outer.bottom());
    }
}
