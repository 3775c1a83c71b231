use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use hostpkg_installer::PackageState;
use hostpkg_lifecycle::LifecycleOutcome;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

/// Rich output only when stdout is a terminal and `NO_COLOR` is unset.
pub(crate) fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub(crate) fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn badge_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::Green,
        "warn" => AnsiColor::Yellow,
        "error" => AnsiColor::Red,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn badge(status: &str) -> String {
    format!("[{}]", status.to_ascii_uppercase())
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", badge(status)),
    }
}

pub(crate) fn print_status(style: OutputStyle, status: &str, message: &str) {
    match style {
        OutputStyle::Plain => println!("{message}"),
        OutputStyle::Rich => println!(
            "{} {message}",
            colorize(badge_style(status), &badge(status))
        ),
    }
}

/// One rendered line; the status selects the badge in rich output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct StatusLine {
    pub status: &'static str,
    pub message: String,
}

impl StatusLine {
    fn new(status: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

pub(crate) fn format_outcome_lines(outcome: &LifecycleOutcome) -> Vec<StatusLine> {
    let result = &outcome.result;
    let operation = result.operation.as_str().to_ascii_lowercase();
    let headline = match &result.previous_version {
        Some(previous) if previous != &result.version => format!(
            "{operation} {} {previous} -> {}: {}",
            result.package_name,
            result.version,
            result.status.as_str()
        ),
        _ => format!(
            "{operation} {} {}: {}",
            result.package_name,
            result.version,
            result.status.as_str()
        ),
    };
    let headline_status = if outcome.is_success() { "ok" } else { "error" };
    let mut lines = vec![StatusLine::new(headline_status, headline)];

    for step in &result.trace {
        let mut line = format!("{} (exit {})", step.operation, step.exitcode);
        if let Some(error) = &step.error {
            line.push_str(": ");
            line.push_str(error);
        }
        lines.push(StatusLine::new("step", line));
    }

    if let Some(error) = &outcome.error {
        lines.push(StatusLine::new("error", error.to_string()));
    }
    if outcome.requires_reboot() {
        lines.push(StatusLine::new(
            "warn",
            "reboot required to finish; rerun the same request afterwards",
        ));
    }
    if let Some(error) = &outcome.report_error {
        lines.push(StatusLine::new(
            "warn",
            format!("result report not delivered: {error}"),
        ));
    }
    lines
}

pub(crate) fn format_state_lines(name: &str, state: &PackageState) -> Vec<StatusLine> {
    let mut lines = vec![StatusLine::new("ok", format!("{name}: {}", state.state))];
    if !state.version.is_empty() {
        lines.push(StatusLine::new("step", format!("version: {}", state.version)));
    }
    if let Some(previous) = &state.data.previous_version {
        lines.push(StatusLine::new(
            "step",
            format!("previous_version: {previous}"),
        ));
    }
    if state.data.reboot_pending {
        lines.push(StatusLine::new("warn", "reboot pending"));
    }
    lines
}

pub(crate) fn render_lines(lines: &[StatusLine], style: OutputStyle) -> Vec<String> {
    lines
        .iter()
        .map(|line| render_status_line(style, line.status, &line.message))
        .collect()
}

pub(crate) fn print_lines(lines: &[StatusLine], style: OutputStyle) {
    for line in lines {
        print_status(style, line.status, &line.message);
    }
}
