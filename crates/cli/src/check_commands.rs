use std::path::Path;

use {
    anyhow::Result,
    calbridge_caldav::CalendarService,
    calbridge_config::{CalBridgeConfig, Diagnostic, Severity, validate},
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const GREEN: &str = "\x1b[32m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Report file diagnostics, then problems with the effective settings
/// (file + environment), then optionally try a live login.
pub async fn check(
    path: Option<&Path>,
    config: &CalBridgeConfig,
    verbose: bool,
    connect: bool,
) -> Result<()> {
    let file = validate(path);
    if let Some(ref path) = file.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults and environment.\n");
    }

    let effective = validate::validate_effective(config);
    let diagnostics: Vec<&Diagnostic> = file
        .diagnostics
        .iter()
        .chain(effective.diagnostics.iter())
        .collect();

    let mut shown = 0;
    for d in &diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        print_diagnostic(d);
        shown += 1;
    }

    let errors = file.count(Severity::Error) + effective.count(Severity::Error);
    let warnings = file.count(Severity::Warning) + effective.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    if connect {
        let service = CalendarService::new(config.caldav.clone())?;
        match service.connection_status().await {
            Ok(status) => {
                eprintln!(
                    "\n{BOLD}{GREEN}connected{RESET} as {} to {}",
                    status.email, status.server_url
                );
                for name in &status.calendars {
                    eprintln!("  {name}");
                }
            },
            Err(e) => {
                eprintln!("\n{BOLD}{RED}{}{RESET} {e}", e.kind());
                std::process::exit(1);
            },
        }
    }

    Ok(())
}

fn print_diagnostic(d: &Diagnostic) {
    let (color, label) = match d.severity {
        Severity::Error => (RED, "error"),
        Severity::Warning => (YELLOW, "warning"),
        Severity::Info => (CYAN, "info"),
    };

    if d.path.is_empty() {
        eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
    } else {
        eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
    }
}
