use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};

use crate::config::ThemeConfig;

/// Kinds of source line the viewer styles differently.
#[derive(Debug, PartialEq, Eq)]
enum LineKind<'a> {
    Fence(&'a str),
    Heading(usize, &'a str),
    Rule,
    Task(bool, &'a str),
    Bullet(&'a str),
    Numbered(&'a str, &'a str),
    Quote(&'a str),
    Plain(&'a str),
}

fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim_start();
    if let Some(lang) = trimmed.strip_prefix("```") {
        return LineKind::Fence(lang.trim());
    }

    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) {
        if let Some(rest) = trimmed[hashes..].strip_prefix(' ') {
            return LineKind::Heading(hashes, rest.trim());
        }
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() >= 3 && ['-', '*', '_'].iter().any(|m| compact.chars().all(|c| c == *m)) {
        return LineKind::Rule;
    }

    if let Some(rest) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("+ "))
    {
        if let Some(task) = rest.strip_prefix("[ ] ") {
            return LineKind::Task(false, task);
        }
        if let Some(task) = rest
            .strip_prefix("[x] ")
            .or_else(|| rest.strip_prefix("[X] "))
        {
            return LineKind::Task(true, task);
        }
        return LineKind::Bullet(rest);
    }

    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = trimmed[digits..]
            .strip_prefix(". ")
            .or_else(|| trimmed[digits..].strip_prefix(") "))
        {
            return LineKind::Numbered(&trimmed[..digits], rest);
        }
    }

    if let Some(rest) = trimmed.strip_prefix('>') {
        return LineKind::Quote(rest.trim_start());
    }

    LineKind::Plain(line)
}

/// Renders a note for the viewer. Fenced code is shown verbatim; everything
/// else gets block and inline styling.
pub fn render(content: &str, theme: &ThemeConfig) -> Text<'static> {
    let mut lines = Vec::new();
    let mut in_fence = false;
    let fence_style = Style::default().fg(theme.muted);
    let code_style = Style::default().fg(Color::Magenta);

    for line in content.lines() {
        let kind = classify(line);

        if in_fence {
            if matches!(kind, LineKind::Fence(_)) {
                in_fence = false;
                lines.push(Line::from(Span::styled("└─", fence_style)));
            } else {
                lines.push(Line::from(vec![
                    Span::styled("│ ", fence_style),
                    Span::styled(line.to_string(), code_style),
                ]));
            }
            continue;
        }

        let rendered = match kind {
            LineKind::Fence(lang) => {
                in_fence = true;
                let label = if lang.is_empty() {
                    "┌─".to_string()
                } else {
                    format!("┌─ {}", lang)
                };
                Line::from(Span::styled(label, fence_style))
            }
            LineKind::Heading(level, text) => {
                let style = heading_style(level, theme);
                let mut spans = vec![Span::styled(format!("{} ", "#".repeat(level)), style)];
                spans.extend(inline(text, style));
                Line::from(spans)
            }
            LineKind::Rule => Line::from(Span::styled("─".repeat(40), fence_style)),
            LineKind::Task(done, text) => {
                let (mark, style) = if done {
                    ("  ☑ ", Style::default().fg(theme.muted).add_modifier(Modifier::CROSSED_OUT))
                } else {
                    ("  ☐ ", Style::default())
                };
                let mut spans = vec![Span::styled(mark, Style::default().fg(theme.header))];
                spans.extend(inline(text, style));
                Line::from(spans)
            }
            LineKind::Bullet(text) => {
                let mut spans = vec![Span::styled("  • ", Style::default().fg(theme.header))];
                spans.extend(inline(text, Style::default()));
                Line::from(spans)
            }
            LineKind::Numbered(n, text) => {
                let mut spans = vec![Span::styled(
                    format!("  {}. ", n),
                    Style::default().fg(theme.header),
                )];
                spans.extend(inline(text, Style::default()));
                Line::from(spans)
            }
            LineKind::Quote(text) => {
                let style = Style::default().fg(theme.muted).add_modifier(Modifier::ITALIC);
                let mut spans = vec![Span::styled("  ┃ ", style)];
                spans.extend(inline(text, style));
                Line::from(spans)
            }
            LineKind::Plain(text) => Line::from(inline(text, Style::default())),
        };
        lines.push(rendered);
    }

    Text::from(lines)
}

fn heading_style(level: usize, theme: &ThemeConfig) -> Style {
    let base = Style::default().add_modifier(Modifier::BOLD);
    match level {
        1 => base.fg(Color::Yellow).add_modifier(Modifier::UNDERLINED),
        2 => base.fg(theme.header),
        3 => base.fg(Color::Green),
        _ => base.fg(theme.foreground),
    }
}

/// Splits a line into styled spans for `**bold**`, `*italic*`/`_italic_`
/// and `` `code` ``. An unmatched delimiter is kept as literal text.
fn inline(text: &str, base: Style) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    let mut plain = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find(['*', '_', '`']) {
        let (before, tail) = rest.split_at(pos);
        plain.push_str(before);

        let (delim, style) = if tail.starts_with('`') {
            ("`", Style::default().bg(Color::Rgb(40, 44, 52)).fg(Color::LightCyan))
        } else if tail.starts_with("**") {
            ("**", base.add_modifier(Modifier::BOLD).fg(Color::LightYellow))
        } else if tail.starts_with("__") {
            ("__", base.add_modifier(Modifier::BOLD).fg(Color::LightYellow))
        } else if tail.starts_with('*') {
            ("*", base.add_modifier(Modifier::ITALIC))
        } else {
            ("_", base.add_modifier(Modifier::ITALIC))
        };

        let body = &tail[delim.len()..];
        match body.find(delim) {
            Some(end) if end > 0 => {
                if !plain.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut plain), base));
                }
                spans.push(Span::styled(body[..end].to_string(), style));
                rest = &body[end + delim.len()..];
            }
            _ => {
                plain.push_str(delim);
                rest = body;
            }
        }
    }

    plain.push_str(rest);
    if !plain.is_empty() || spans.is_empty() {
        spans.push(Span::styled(plain, base));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(line: &Line) -> Vec<String> {
        line.spans.iter().map(|s| s.content.to_string()).collect()
    }

    #[test]
    fn classifies_block_lines() {
        assert_eq!(classify("### Notes"), LineKind::Heading(3, "Notes"));
        assert_eq!(classify("#hashtag"), LineKind::Plain("#hashtag"));
        assert_eq!(classify("####### seven"), LineKind::Plain("####### seven"));
        assert_eq!(classify("- [ ] milk"), LineKind::Task(false, "milk"));
        assert_eq!(classify("* [x] eggs"), LineKind::Task(true, "eggs"));
        assert_eq!(classify("12. twelfth"), LineKind::Numbered("12", "twelfth"));
        assert_eq!(classify("---"), LineKind::Rule);
        assert_eq!(classify("* * *"), LineKind::Rule);
        assert_eq!(classify("```rust"), LineKind::Fence("rust"));
        assert_eq!(classify("> quoted"), LineKind::Quote("quoted"));
    }

    #[test]
    fn inline_markers_become_spans() {
        let spans = inline("a **b** c `d` _e_", Style::default());
        let content: Vec<&str> = spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(content, vec!["a ", "b", " c ", "d", " ", "e"]);
        assert!(spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert!(spans[5].style.add_modifier.contains(Modifier::ITALIC));
    }

    #[test]
    fn unmatched_delimiters_stay_literal() {
        let spans = inline("2 * 3 = 6 and snake_case", Style::default());
        let joined: String = spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(joined, "2 * 3 = 6 and snake_case");
    }

    #[test]
    fn fenced_code_is_not_styled_inline() {
        let text = render("```sh\necho **hi**\n```\nafter", &ThemeConfig::default());
        assert_eq!(text.lines.len(), 4);
        assert_eq!(texts(&text.lines[0]), vec!["┌─ sh"]);
        assert_eq!(texts(&text.lines[1]), vec!["│ ", "echo **hi**"]);
        assert_eq!(texts(&text.lines[3]), vec!["after"]);
    }

    #[test]
    fn every_source_line_yields_one_rendered_line() {
        let source = "# T\n\n- a\n1. b\n> c\n***\nplain";
        let text = render(source, &ThemeConfig::default());
        assert_eq!(text.lines.len(), source.lines().count());
    }
}
