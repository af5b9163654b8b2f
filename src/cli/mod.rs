//! Command-line interface for the ivalora server.
//!
//! With no subcommand the binary starts the server. Other subcommands:
//! - `bootstrap` - Ensure a super admin account exists, then exit
//! - `config check` - Validate a configuration file

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{BackendKind, Config};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "ivalora")]
#[command(author, version, about = "Access control service for the Ivalora dashboard", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ivalora.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve,

    /// Create the first super admin account if it does not exist
    Bootstrap {
        /// Email of the super admin
        #[arg(long)]
        email: String,
        /// Password (can also be set via IVALORA_BOOTSTRAP_PASSWORD)
        #[arg(long, env = "IVALORA_BOOTSTRAP_PASSWORD", hide_env_values = true)]
        password: String,
        /// Display name stored on the profile
        #[arg(long, default_value = "Super Admin")]
        name: String,
    },

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Validate a configuration file and print a summary
pub fn cmd_config_check(config_path: &Path) -> Result<()> {
    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        println!("To create a custom configuration, copy ivalora.example.toml to ivalora.toml");
        return Ok(());
    }

    let config = match Config::load(config_path).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            println!();
            println!("Please check the configuration file and try again.");
            anyhow::bail!("Invalid configuration file");
        }
    };

    println!("[OK] Configuration file is valid!");
    println!();
    println!("=== Configuration Summary ===");
    println!();
    println!("Server:");
    println!("  Listen:       {}:{}", config.server.host, config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    println!("  Static Dir:   {}", config.server.static_dir.display());
    println!();
    println!("Backend:");
    match config.backend.kind {
        BackendKind::Local => println!("  Kind:         local (SQLite)"),
        BackendKind::Hosted => {
            println!("  Kind:         hosted");
            println!(
                "  URL:          {}",
                config.backend.url.as_deref().unwrap_or_default()
            );
        }
    }
    println!();
    println!("Access:");
    println!("  Login Page:   {}", config.access.login_path);
    println!("  Pending Page: {}", config.access.pending_path);
    for route in &config.access.routes {
        let role = route
            .required_role
            .map(|r| r.as_str().to_string())
            .unwrap_or_else(|| "any active account".to_string());
        println!("  {:<13} {}", route.prefix, role);
    }
    println!();
    println!(
        "Rate Limiting:  {}",
        if config.rate_limit.enabled {
            "Enabled"
        } else {
            "Disabled"
        }
    );
    println!();

    let warnings = config_warnings(&config);
    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("  [!] {}", warning);
        }
        println!();
    }

    Ok(())
}

fn config_warnings(config: &Config) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if !config.auth.secure_cookies {
        warnings.push("Session cookies are not marked Secure - enable auth.secure_cookies behind HTTPS");
    }
    if config.cors.allowed_origins.iter().any(|o| o == "*") {
        warnings.push("CORS allows any origin");
    }
    if config.backend.kind == BackendKind::Hosted && config.backend.anon_key.is_none() {
        warnings.push("No anon key set - user-scoped calls will send the service-role key as apikey");
    }
    if config.auth.bootstrap_email.is_none() {
        warnings.push("No bootstrap super admin configured");
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_starts_server() {
        let cli = Cli::try_parse_from(["ivalora"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("ivalora.toml"));
    }

    #[test]
    fn test_parse_bootstrap() {
        let cli = Cli::try_parse_from([
            "ivalora",
            "--config",
            "/etc/ivalora.toml",
            "bootstrap",
            "--email",
            "root@example.com",
            "--password",
            "long-enough",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/ivalora.toml"));
        match cli.command {
            Some(Commands::Bootstrap {
                email,
                password,
                name,
            }) => {
                assert_eq!(email, "root@example.com");
                assert_eq!(password, "long-enough");
                assert_eq!(name, "Super Admin");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_check() {
        let cli = Cli::try_parse_from(["ivalora", "-l", "debug", "config", "check"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Some(Commands::Config(ConfigCommands::Check))
        ));
    }

    #[test]
    fn test_missing_config_file_is_not_an_error() {
        cmd_config_check(Path::new("/nonexistent/ivalora.toml")).unwrap();
    }

    #[test]
    fn test_default_config_warnings() {
        let warnings = config_warnings(&Config::default());
        assert!(warnings.iter().any(|w| w.contains("CORS")));
        assert!(warnings.iter().any(|w| w.contains("bootstrap")));
    }
}
