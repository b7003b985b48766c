//! Output formatting utilities for the CLI
//!
//! Tables for proxy groups and profiles, one-line renderings of telemetry
//! events, and colored status messages.

use tabled::{settings::Style, Table, Tabled};

use tv_core::{ProcessState, ProfileInfo, ProxySnapshot, TelemetryEvent};

/// Format a proxy snapshot as an ASCII table
///
/// The routed group is marked with `*`. Returns "No proxy groups" if the
/// engine reported none.
pub fn format_proxies(snapshot: &ProxySnapshot, detailed: bool) -> String {
    if snapshot.groups.is_empty() {
        return "No proxy groups".to_string();
    }

    #[derive(Tabled)]
    struct GroupRow {
        #[tabled(rename = "GROUP")]
        name: String,
        #[tabled(rename = "TYPE")]
        kind: String,
        #[tabled(rename = "SELECTED")]
        now: String,
        #[tabled(rename = "PROXIES")]
        proxies: String,
    }

    let rows: Vec<GroupRow> = snapshot
        .groups
        .iter()
        .map(|(name, group)| GroupRow {
            name: if *name == snapshot.current_group {
                format!("* {}", name)
            } else {
                name.clone()
            },
            kind: group.kind.clone(),
            now: group.now.clone().unwrap_or_else(|| "-".to_string()),
            proxies: if detailed {
                group.proxies.join("\n")
            } else {
                summarize(&group.proxies, 3)
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format stored profiles as an ASCII table
pub fn format_profiles(profiles: &[ProfileInfo]) -> String {
    if profiles.is_empty() {
        return "No profiles".to_string();
    }

    #[derive(Tabled)]
    struct ProfileRow {
        #[tabled(rename = "ID")]
        id: u64,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "ACTIVE")]
        active: String,
        #[tabled(rename = "CACHE")]
        cache: String,
    }

    let rows: Vec<ProfileRow> = profiles
        .iter()
        .map(|p| ProfileRow {
            id: p.id.0,
            name: p.name.clone(),
            active: if p.active { "yes" } else { "-" }.to_string(),
            cache: p.cache_path.display().to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the daemon status block
pub fn format_status(address: &str, state: ProcessState, snapshot: Option<&ProxySnapshot>) -> String {
    let mut output = String::new();

    output.push_str(&format!("Daemon: {}\n", address));
    output.push_str(&format!(
        "Engine: {}\n",
        match state {
            ProcessState::Started => "Running",
            ProcessState::Stopped => "Stopped",
        }
    ));

    if let Some(snapshot) = snapshot {
        output.push_str(&format!("Routing: {}\n", snapshot.current_group));
        output.push_str(&format!("Proxy groups: {}\n", snapshot.groups.len()));
    }

    output
}

/// Render one telemetry event as a single line
pub fn format_event(event: &TelemetryEvent) -> String {
    match event {
        TelemetryEvent::Speed { up, down } => format!(
            "speed      ↑ {}/s  ↓ {}/s",
            format_bytes(*up),
            format_bytes(*down)
        ),
        TelemetryEvent::Bandwidth { total } => format!("bandwidth  {}", format_bytes(*total)),
        TelemetryEvent::Log(line) => format!("log        [{}] {}", line.level, line.payload),
        TelemetryEvent::Process { state } => format!("process    {}", state),
        TelemetryEvent::ProfileChanged => "profile    changed".to_string(),
        TelemetryEvent::Error { kind, message } => format!("error      {}: {}", kind, message),
    }
}

/// Format a byte count with binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// First `max` names, then a count of the rest
fn summarize(names: &[String], max: usize) -> String {
    if names.len() <= max {
        names.join(", ")
    } else {
        format!("{}, +{} more", names[..max].join(", "), names.len() - max)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
