use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
}

/// Lines of build output shown under a failed step
const OUTPUT_TAIL_LINES: usize = 20;

/// Print a fatal engine error with its category advice
pub fn fatal(err: &formulakit::Error) {
    let category = err.category();
    if category.needs_manual_intervention() {
        error(&format!("{}: {}", category.description().red().bold(), err));
    } else {
        error(&format!("{}: {}", category.description(), err));
    }
    for line in fatal_details(err) {
        eprintln!("    {}", line.dimmed());
    }
    if category.is_preflight() {
        eprintln!("  {} {}", "→".dimmed(), "Nothing was built or changed".dimmed());
    }
    eprintln!("  {} {}", "→".dimmed(), category.advice().dimmed());
}

/// Detail lines of a fatal error: displaced backups, then build output
fn fatal_details(err: &formulakit::Error) -> Vec<String> {
    let mut lines = Vec::new();
    if let formulakit::Error::RollbackFailed { failures, .. } = err {
        for failure in failures {
            lines.push(format!(
                "{} is still at {}: {}",
                failure.path.display(),
                failure.backup.display(),
                failure.message
            ));
        }
    }
    if let Some(tail) = err.output_tail(OUTPUT_TAIL_LINES) {
        lines.extend(tail.lines().map(str::to_string));
    }
    lines
}

/// Join a list for display, or a dash when empty
pub fn list_or_dash<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use formulakit::{BuildStep, Error, RestoreFailure};
    use std::path::PathBuf;

    fn configure_failed(stderr: &str) -> Error {
        Error::BuildStepFailed {
            formula: "php74".into(),
            step: BuildStep::Configure,
            command: "./configure".into(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_fatal_details_show_build_output() {
        let stderr: String = (1..=30).map(|n| format!("line {n}\n")).collect();
        let lines = fatal_details(&configure_failed(&stderr));
        assert_eq!(lines.len(), OUTPUT_TAIL_LINES);
        assert_eq!(lines.first().map(String::as_str), Some("line 11"));
        assert_eq!(lines.last().map(String::as_str), Some("line 30"));
    }

    #[test]
    fn test_fatal_details_list_displaced_backups() {
        let err = Error::RollbackFailed {
            cause: Box::new(configure_failed("error: libxml2 not found\n")),
            failures: vec![RestoreFailure {
                path: PathBuf::from("/usr/local/etc/pear.conf"),
                backup: PathBuf::from("/usr/local/etc/pear.conf-backup"),
                message: "permission denied".into(),
            }],
        };
        assert_eq!(
            fatal_details(&err),
            vec![
                "/usr/local/etc/pear.conf is still at /usr/local/etc/pear.conf-backup: permission denied"
                    .to_string(),
                "error: libxml2 not found".to_string(),
            ]
        );
    }

    #[test]
    fn test_fatal_details_empty_for_plain_errors() {
        assert!(fatal_details(&Error::NotFound { name: "gmp".into() }).is_empty());
    }

    #[test]
    fn test_list_or_dash() {
        let empty: [&str; 0] = [];
        assert_eq!(list_or_dash(&empty), "-");
        assert_eq!(list_or_dash(&["gmp", "curl"]), "gmp, curl");
    }
}
