//! Terminal output: banner, tables, spinners

use std::time::Duration;

use comfy_table::{Cell, Color, Table, presets::UTF8_FULL_CONDENSED};
use console::{Emoji, style};
use indicatif::{ProgressBar, ProgressStyle};
use tengu_juju::{ServiceConfig, StatusDocument, StatusKind};

pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static HOURGLASS: Emoji<'_, '_> = Emoji("⏳ ", "");

pub fn print_banner() {
    println!();
    println!(
        "{}",
        style("╔═══════════════════════════════════════╗")
            .cyan()
            .bold()
    );
    println!(
        "{}",
        style("║        TENGU JUJU ENVIRONMENT         ║")
            .cyan()
            .bold()
    );
    println!(
        "{}",
        style("╚═══════════════════════════════════════╝")
            .cyan()
            .bold()
    );
    println!();
}

pub fn step(message: &str) {
    println!("{} {message}", style("▸").blue().bold());
}

pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) =
        ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} {elapsed:.dim}")
    {
        spinner.set_style(template);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn status_color(kind: StatusKind) -> Color {
    match kind {
        StatusKind::Active => Color::Green,
        StatusKind::Blocked | StatusKind::Error => Color::Red,
        StatusKind::Maintenance | StatusKind::Waiting => Color::Yellow,
        StatusKind::Unknown => Color::Grey,
    }
}

pub fn status_table(status: &StatusDocument) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Service", "Status", "Message", "Units"]);

    for (name, service) in &status.services {
        let workload = &service.service_status;
        let units: Vec<String> = service
            .units
            .iter()
            .map(|(unit, s)| match &s.machine {
                Some(machine) => format!("{unit} ({machine})"),
                None => unit.clone(),
            })
            .collect();
        table.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            Cell::new(&workload.current).fg(status_color(workload.kind())),
            Cell::new(&workload.message),
            Cell::new(units.join("\n")),
        ]);
    }
    table
}

fn render_value(value: Option<&serde_yaml::Value>) -> String {
    match value {
        None | Some(serde_yaml::Value::Null) => String::new(),
        Some(serde_yaml::Value::String(s)) => s.clone(),
        Some(other) => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

pub fn config_table(config: &ServiceConfig) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Option", "Value", "Type", "Default", "Description"]);

    for (key, option) in &config.settings {
        let value = render_value(option.value.as_ref());
        let explicit = !value.is_empty() && option.value != option.default;
        table.add_row(vec![
            Cell::new(key).fg(Color::Cyan),
            if explicit {
                Cell::new(value).fg(Color::Green)
            } else {
                Cell::new(value)
            },
            Cell::new(option.option_type.as_deref().unwrap_or("")),
            Cell::new(render_value(option.default.as_ref())).fg(Color::Grey),
            Cell::new(option.description.as_deref().unwrap_or("")),
        ]);
    }
    table
}

/// `service (charm)` heading for a config listing
pub fn config_heading(config: &ServiceConfig, fallback: &str) -> String {
    let service = config.service.as_deref().unwrap_or(fallback);
    match &config.charm {
        Some(charm) => format!("{service} ({charm})"),
        None => service.to_string(),
    }
}

pub fn print_success(message: &str) {
    println!();
    println!("{SPARKLE} {message}");
}
