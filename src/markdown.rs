//! Line-oriented Markdown styling for terminal bubbles.
//!
//! `render` is a pure function of the whole text, so re-rendering a bubble
//! after every streamed fragment always yields the same lines as rendering
//! the finished text once.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

const INDENT: &str = "  ";

pub fn render(text: &str, base: Style) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut in_code_block = false;

    for line in text.lines() {
        // ── Code fence toggle ───────────────────────────────────────
        if let Some(lang) = line.trim_start().strip_prefix("```") {
            let fence = Style::default().fg(Color::DarkGray);
            if in_code_block {
                lines.push(Line::from(Span::styled(format!("{INDENT}└────────"), fence)));
            } else {
                let label = lang.trim();
                let label = if label.is_empty() {
                    String::new()
                } else {
                    format!(" {} ", label)
                };
                lines.push(Line::from(Span::styled(format!("{INDENT}┌──{label}──"), fence)));
            }
            in_code_block = !in_code_block;
            continue;
        }

        if in_code_block {
            lines.push(Line::from(vec![
                Span::styled(format!("{INDENT}│ "), Style::default().fg(Color::DarkGray)),
                Span::styled(line.to_string(), Style::default().fg(Color::Green)),
            ]));
            continue;
        }

        lines.push(render_block_line(line, base));
    }

    lines
}

fn render_block_line(line: &str, base: Style) -> Line<'static> {
    let accent = Style::default().fg(Color::Cyan);

    // ── Headings ────────────────────────────────────────────────
    if line.starts_with('#') && !line.starts_with("#!") {
        let trimmed = line.trim_start_matches('#');
        if let Some(heading) = trimmed.strip_prefix(' ') {
            let style = accent.add_modifier(Modifier::BOLD);
            return Line::from(Span::styled(format!("{INDENT}{heading}"), style));
        }
    }

    // ── Blockquote ──────────────────────────────────────────────
    if let Some(quote) = line.strip_prefix("> ") {
        let mut spans = vec![Span::styled(format!("{INDENT}│ "), Style::default().fg(Color::Gray))];
        spans.extend(render_inline(quote, base.add_modifier(Modifier::ITALIC)));
        return Line::from(spans);
    }

    // ── Bullets, at any indent ──────────────────────────────────
    let stripped = line.trim_start();
    let indent = &line[..line.len() - stripped.len()];
    if let Some(item) = stripped
        .strip_prefix("- ")
        .or_else(|| stripped.strip_prefix("* "))
        .or_else(|| stripped.strip_prefix("• "))
    {
        let bullet = if indent.is_empty() { "•" } else { "◦" };
        let mut spans = vec![Span::styled(format!("{INDENT}{indent}{bullet} "), accent)];
        spans.extend(render_inline(item, base));
        return Line::from(spans);
    }

    // ── Numbered list ───────────────────────────────────────────
    if let Some(dot) = stripped.find(". ") {
        if dot > 0 && dot <= 4 && stripped[..dot].chars().all(|c| c.is_ascii_digit()) {
            let mut spans = vec![Span::styled(
                format!("{INDENT}{indent}{}", &stripped[..dot + 2]),
                accent,
            )];
            spans.extend(render_inline(&stripped[dot + 2..], base));
            return Line::from(spans);
        }
    }

    let mut spans = vec![Span::styled(INDENT.to_string(), base)];
    spans.extend(render_inline(line, base));
    Line::from(spans)
}

/// Splits a line on `` `code` `` and `**bold**` markers. Unclosed markers
/// are kept as literal text.
fn render_inline(text: &str, base: Style) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let next_code = rest.find('`');
        let next_bold = rest.find("**");
        let (start, marker, style) = match (next_code, next_bold) {
            (Some(c), Some(b)) if b < c => (b, "**", base.add_modifier(Modifier::BOLD)),
            (Some(c), _) => (c, "`", Style::default().fg(Color::Magenta)),
            (None, Some(b)) => (b, "**", base.add_modifier(Modifier::BOLD)),
            (None, None) => break,
        };

        let after = &rest[start + marker.len()..];
        let Some(end) = after.find(marker) else {
            break;
        };

        if start > 0 {
            spans.push(Span::styled(rest[..start].to_string(), base));
        }
        spans.push(Span::styled(after[..end].to_string(), style));
        rest = &after[end + marker.len()..];
    }

    if !rest.is_empty() {
        spans.push(Span::styled(rest.to_string(), base));
    }
    spans
}
