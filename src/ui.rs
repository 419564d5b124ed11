use console::{measure_text_width, style, StyledObject, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const MIN_WIDTH: usize = 60;
const RULE_WIDTH: usize = 56;

// ── Layout ────────────────────────────────────────────────────────────────────

fn rule() -> String {
    let cols = Term::stdout().size().1 as usize;
    "─".repeat(cols.max(MIN_WIDTH).min(RULE_WIDTH))
}

/// `[3/41] Mounting /dev/mapper/NIXROOT to /mnt`
pub fn step_tag(index: usize, total: usize, label: &str) -> String {
    format!("[{}/{}] {}", index, total, label)
}

// ── Banner ────────────────────────────────────────────────────────────────────

pub fn print_banner() {
    let _ = Term::stdout().clear_screen();

    println!();
    println!(
        "{}  {}",
        style("   nixos-up").blue().bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim()
    );
    println!("{}", style("   Guided NixOS installation onto a whole disk").dim().italic());
    println!();
    println!("{}", style(rule()).dim());
}

/// Numbered phase header.
pub fn print_step(step: u8, total: u8, title: &str) {
    println!();
    println!(
        "{}{}",
        style(format!(" {}/{} ", step, total)).black().on_blue().bold(),
        style(format!("  {}", title)).white().bold()
    );
    println!("{}", style(rule()).dim());
}

// ── Feedback ──────────────────────────────────────────────────────────────────

fn line(glyph: StyledObject<&str>, msg: impl std::fmt::Display) -> String {
    format!("  {}  {}", glyph, msg)
}

pub fn print_success(msg: &str) {
    println!("{}", line(style("✓").green().bold(), style(msg).green()));
}

pub fn print_info(msg: &str) {
    println!("{}", line(style("→").blue().bold(), msg));
}

/// Non-fatal notice.
pub fn print_warning(msg: &str) {
    println!("{}", line(style("!").yellow().bold(), style(msg).yellow()));
}

/// Goes to stderr.
pub fn print_error(msg: &str) {
    eprintln!("{}", line(style("✗").red().bold(), style(msg).red()));
}

/// Output of a finished step, indented and dimmed.
pub fn print_output(text: &str) {
    for l in text.trim_end().lines() {
        println!("     {}", style(l).dim());
    }
}

// ── Summary box ───────────────────────────────────────────────────────────────

/// Bordered key/value table, as wide as its longest row.
///
/// ```text
/// ┌─ Your selection ───────────────┐
/// │ Disk       /dev/sda (64.0 GiB) │
/// │ Hostname   nixos               │
/// └────────────────────────────────┘
/// ```
pub fn kv_box(title: &str, rows: &[(&str, &str)]) -> Vec<String> {
    let key_width = rows.iter().map(|(k, _)| measure_text_width(k)).max().unwrap_or(0) + 3;
    let body_width = rows
        .iter()
        .map(|(_, v)| key_width + measure_text_width(v))
        .max()
        .unwrap_or(0)
        .max(measure_text_width(title) + 2);

    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(format!(
        "┌─ {} {}┐",
        title,
        "─".repeat(body_width.saturating_sub(measure_text_width(title) + 1))
    ));
    for (key, val) in rows {
        let pad = body_width - key_width - measure_text_width(val);
        out.push(format!(
            "│ {:<kw$}{}{} │",
            key,
            val,
            " ".repeat(pad),
            kw = key_width
        ));
    }
    out.push(format!("└{}┘", "─".repeat(body_width + 2)));
    out
}

pub fn print_kv_box(title: &str, rows: &[(&str, &str)]) {
    for l in kv_box(title, rows) {
        println!("  {}", style(l).cyan());
    }
}

// ── Spinner ───────────────────────────────────────────────────────────────────

/// A ticking spinner; hidden when stderr is not a terminal.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("  {spinner:.blue.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");
    pb.set_style(style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
