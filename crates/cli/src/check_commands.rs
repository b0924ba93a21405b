use std::path::Path;

use {
    anyhow::Result,
    homegw_config::validate::{self, Diagnostic, Severity},
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Validate the config file and processor definitions, print diagnostics,
/// and exit non-zero when any error is found.
pub fn check(config: Option<&Path>, processors: Option<&Path>, verbose: bool) -> Result<()> {
    let mut result = validate::validate(config);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    if let Some(processors) = processors {
        replace_processor_diagnostics(
            &mut result.diagnostics,
            validate::validate_processor_path(processors),
        );
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        eprintln!("  {}", render(d));
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

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

    Ok(())
}

/// Swap the diagnostics for the configured processors path with those for
/// the `--processors` override.
fn replace_processor_diagnostics(diagnostics: &mut Vec<Diagnostic>, replacement: Vec<Diagnostic>) {
    diagnostics.retain(|d| d.category != "processors");
    diagnostics.extend(replacement);
}

fn render(d: &Diagnostic) -> String {
    let (color, label) = match d.severity {
        Severity::Error => (RED, "error"),
        Severity::Warning => (YELLOW, "warning"),
        Severity::Info => (CYAN, "info"),
    };
    if d.path.is_empty() {
        format!("{BOLD}{color}{label}{RESET} {}", d.message)
    } else {
        format!("{BOLD}{color}{label}{RESET} {}: {}", d.path, d.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_replaces_processor_diagnostics_only() {
        let mut diagnostics = vec![
            Diagnostic::new(Severity::Warning, "security", "security.api_token", "unset"),
            Diagnostic::new(Severity::Error, "processors", "processors.path", "missing"),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processors.yaml");
        std::fs::write(&path, "processors:\n  - id: fan\n    name: Fan\n    keywords: [fan]\n")
            .unwrap();

        replace_processor_diagnostics(&mut diagnostics, validate::validate_processor_path(&path));

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].category, "security");
    }

    #[test]
    fn render_includes_path_when_present() {
        let d = Diagnostic::new(Severity::Error, "llm", "llm.model", "must not be empty");
        let line = render(&d);
        assert!(line.contains("error"));
        assert!(line.ends_with("llm.model: must not be empty"));

        let d = Diagnostic::new(Severity::Info, "syntax", "", "no config file found");
        assert!(render(&d).ends_with("info\x1b[0m no config file found"));
    }
}
