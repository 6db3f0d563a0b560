use std::path::Path;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
};

use composer_config::{Diagnostic, Severity, config_dir, find_config_file, validate_file};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the config file that would be loaded.
    Path,
    /// Print the effective configuration as JSON.
    Show,
}

pub fn handle_config(action: ConfigAction, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(explicit, verbose),
        ConfigAction::Path => {
            match explicit.map(Path::to_path_buf).or_else(find_config_file) {
                Some(path) => println!("{}", path.display()),
                None => {
                    eprintln!("No config file found.");
                    if let Some(dir) = config_dir() {
                        eprintln!("Searched ./ and {}", dir.display());
                    }
                },
            }
            Ok(())
        },
        ConfigAction::Show => {
            let config = crate::load(explicit)?;
            let mut value = serde_json::to_value(&config)?;
            redact_tokens(&mut value);
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        },
    }
}

fn redact_tokens(config: &mut serde_json::Value) {
    if let Some(servers) = config
        .pointer_mut("/servers/proxied/sse")
        .and_then(serde_json::Value::as_array_mut)
    {
        for server in servers {
            if let Some(token) = server.get_mut("auth_token") {
                *token = "[REDACTED]".into();
            }
        }
    }
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn render(d: &Diagnostic) -> String {
    let (color, label) = match d.severity {
        Severity::Error => (RED, "error"),
        Severity::Warning => (YELLOW, "warning"),
        Severity::Info => (CYAN, "info"),
    };
    let location = if d.path.is_empty() {
        String::new()
    } else {
        format!("{}: ", d.path)
    };
    format!("  {BOLD}{color}{label}{RESET} [{}] {location}{}", d.category, d.message)
}

fn check(explicit: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate_file(explicit);
    match &result.config_path {
        Some(path) => eprintln!("Validating {}", path.display()),
        None => eprintln!("No config file found; validating built-in defaults"),
    }

    let visible: Vec<String> = result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(render)
        .collect();
    if !visible.is_empty() {
        eprintln!("\n{}\n", visible.join("\n"));
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors + warnings == 0 {
        eprintln!("Configuration is valid.");
        return Ok(());
    }
    eprintln!("{errors} error(s), {warnings} warning(s)");
    if errors > 0 {
        bail!("configuration has {errors} error(s)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn show_redacts_auth_tokens() {
        let mut value = json!({
            "servers": { "proxied": { "sse": [
                { "name": "web", "auth_token": "s3cret" },
                { "name": "open" }
            ] } }
        });
        redact_tokens(&mut value);
        assert_eq!(value["servers"]["proxied"]["sse"][0]["auth_token"], "[REDACTED]");
        assert!(value["servers"]["proxied"]["sse"][1].get("auth_token").is_none());
    }
}
