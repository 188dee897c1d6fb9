use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use formulakit::RequestedOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formulary")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Build and install packages from declarative formulas", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build and install formulas with their dependencies
    Install(InstallArgs),

    /// Show the install plan of a formula without building anything
    Plan(PlanArgs),

    /// Show details of a formula
    Info {
        /// Formula name
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List known formulas
    List {
        /// Only show installed formulas
        #[arg(long)]
        installed: bool,
    },

    /// Run the smoke test of an installed formula
    Test {
        /// Formula name
        name: String,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Build Options
// ============================================================================

#[derive(Args, Debug, Default)]
pub struct OptionArgs {
    /// Enable a boolean option (or optional dependency)
    #[arg(long = "with", value_name = "OPT")]
    pub with: Vec<String>,

    /// Disable a boolean option
    #[arg(long = "without", value_name = "OPT")]
    pub without: Vec<String>,

    /// Set an option value
    #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub option: Vec<(String, String)>,

    /// Build from the head repository instead of the release tarball
    #[arg(long)]
    pub head: bool,
}

impl OptionArgs {
    /// Options grouped as every `--with`, then every `--without`, then every `--option`.
    ///
    /// A later request for the same name wins, so `--without` overrides
    /// `--with` and `--option` overrides both, wherever they appear.
    pub fn requested(&self) -> RequestedOptions {
        let mut requested = RequestedOptions::new();
        for name in &self.with {
            requested = requested.with(name.as_str());
        }
        for name in &self.without {
            requested = requested.without(name.as_str());
        }
        for (key, value) in &self.option {
            requested = requested.set(key.as_str(), value.as_str());
        }
        requested
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing option name in '{s}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

// ============================================================================
// Install / Plan
// ============================================================================

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Formulas to install
    #[arg(required = true)]
    pub names: Vec<String>,

    #[command(flatten)]
    pub options: OptionArgs,

    /// Print the plan, rendered arguments and environment without building
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Don't ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Concurrent independent installs (defaults to the config value)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Use an already unpacked source tree instead of downloading
    #[arg(long, value_name = "DIR")]
    pub source_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Formula name
    pub name: String,

    #[command(flatten)]
    pub options: OptionArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Validate the config file and every formula it points to
    Validate,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("sapi=fpm").unwrap(),
            ("sapi".to_string(), "fpm".to_string())
        );
        assert!(parse_key_val("sapi").is_err());
        assert!(parse_key_val("=fpm").is_err());
    }

    #[test]
    fn test_install_args() {
        let cli = Cli::try_parse_from([
            "formulary",
            "install",
            "php74",
            "--with",
            "gmp",
            "--without",
            "pear",
            "--option",
            "sapi=fpm",
            "--head",
            "--jobs",
            "2",
            "-y",
        ])
        .unwrap();

        let Command::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.names, vec!["php74"]);
        assert!(args.options.head);
        assert!(args.yes);
        assert_eq!(args.jobs, Some(2));

        let requested: Vec<_> = args
            .options
            .requested()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(
            requested,
            vec![
                ("gmp".to_string(), "true".to_string()),
                ("pear".to_string(), "false".to_string()),
                ("sapi".to_string(), "fpm".to_string()),
            ]
        );
    }

    #[test]
    fn test_without_overrides_with() {
        use formulakit::types::OptionDecl;
        use formulakit::{Formula, OptionSet, OptionValue};

        let cli = Cli::try_parse_from([
            "formulary",
            "install",
            "php74",
            "--without",
            "pear",
            "--with",
            "pear",
        ])
        .unwrap();
        let Command::Install(args) = cli.command else {
            panic!("expected install");
        };

        let formula = Formula::new("php74").with_option(OptionDecl::flag("pear", "Build PEAR", true));
        let options = OptionSet::resolve(&formula, &args.options.requested()).unwrap();
        assert_eq!(options.value("pear"), Some(&OptionValue::Bool(false)));
    }

    #[test]
    fn test_install_requires_a_name() {
        assert!(Cli::try_parse_from(["formulary", "install"]).is_err());
    }
}
