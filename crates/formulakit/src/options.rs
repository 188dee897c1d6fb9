//! Option resolution and the conditional option evaluator.
//!
//! [`OptionSet::resolve`] turns user requests into a complete, immutable set
//! of option values. [`evaluate`] then renders the configure argument list
//! and environment overlay for a formula. Output order follows declaration
//! order (base arguments, options, rules), so the same inputs always give
//! byte-identical output.

use crate::backend::{EnvOverlay, EnvVar};
use crate::condition::{EnvFacts, Scope, holds};
use crate::error::{Error, Result};
use crate::template::{self, Vars};
use crate::types::{Formula, OptionDecl, OptionValue, parse_bool};

/// Option values requested by the user, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedOptions {
    entries: Vec<(String, String)>,
}

impl RequestedOptions {
    /// No requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a switch to be on.
    pub fn with(self, name: impl Into<String>) -> Self {
        self.set(name, "true")
    }

    /// Request a switch to be off.
    pub fn without(self, name: impl Into<String>) -> Self {
        self.set(name, "false")
    }

    /// Request a value. Later requests for the same name win.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Whether nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Requests in the order they were made.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Resolved option values of one formula, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    values: Vec<(String, OptionValue)>,
}

impl OptionSet {
    /// Validate requests against the formula's declarations and fill in defaults.
    pub fn resolve(formula: &Formula, requested: &RequestedOptions) -> Result<Self> {
        let decls = formula.effective_options();
        let mut values: Vec<(String, OptionValue)> = decls
            .iter()
            .map(|d| (d.name.clone(), d.default.clone()))
            .collect();

        for (name, raw) in requested.iter() {
            let Some(index) = decls.iter().position(|d| d.name == name) else {
                return Err(Error::UnknownOption {
                    formula: formula.name.clone(),
                    option: name.to_string(),
                });
            };
            values[index].1 = parse_value(formula, &decls[index], raw)?;
        }

        Ok(Self { values })
    }

    /// Every option at its default.
    pub fn defaults(formula: &Formula) -> Self {
        Self {
            values: formula
                .effective_options()
                .into_iter()
                .map(|d| (d.name, d.default))
                .collect(),
        }
    }

    /// Value of an option.
    pub fn value(&self, name: &str) -> Option<&OptionValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Whether a boolean option is on.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.value(name).is_some_and(OptionValue::is_enabled)
    }

    /// All values in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of options.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the formula declares no options.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn parse_value(formula: &Formula, decl: &OptionDecl, raw: &str) -> Result<OptionValue> {
    let invalid = |message: String| Error::InvalidOptionValue {
        formula: formula.name.clone(),
        option: decl.name.clone(),
        value: raw.to_string(),
        message,
    };

    if decl.is_choice() {
        if decl.choices.iter().any(|c| c == raw) {
            Ok(OptionValue::Choice(raw.to_string()))
        } else {
            Err(invalid(format!("expected one of: {}", decl.choices.join(", "))))
        }
    } else {
        parse_bool(raw)
            .map(OptionValue::Bool)
            .ok_or_else(|| invalid("expected a boolean".into()))
    }
}

/// Rendered build inputs of a formula.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildArgs {
    /// Arguments passed to the configure program.
    pub configure: Vec<String>,
    /// Environment overlay for every build subprocess.
    pub env: EnvOverlay,
}

/// Render configure arguments and the environment overlay.
pub fn evaluate(
    formula: &Formula,
    options: &OptionSet,
    facts: &EnvFacts,
    vars: &Vars,
) -> Result<BuildArgs> {
    let version = formula.version_str()?;
    let scope = Scope {
        options,
        facts,
        version,
    };

    let mut configure = template::render_all(&formula.build.configure.args, vars)?;

    for decl in formula.effective_options() {
        let value = options.value(&decl.name).unwrap_or(&decl.default);
        let fragments = match value {
            OptionValue::Bool(true) | OptionValue::Choice(_) => &decl.on,
            OptionValue::Bool(false) => &decl.off,
        };
        let option_vars = vars.with("value", value.to_string());
        configure.extend(template::render_all(fragments, &option_vars)?);
    }

    for rule in &formula.rules {
        if rule.when.eval(&scope) {
            configure.extend(template::render_all(&rule.args, vars)?);
        }
    }

    let mut env = EnvOverlay::new();
    for rule in &formula.env {
        if holds(rule.when.as_ref(), &scope) {
            env = env.with(EnvVar {
                name: rule.name.clone(),
                value: template::render(&rule.value, vars)?,
                mode: rule.mode,
                separator: rule.separator.clone(),
            });
        }
    }

    log::trace!(
        "Evaluated {} configure argument(s) and {} env entr(ies) for {}",
        configure.len(),
        env.vars().len(),
        formula.name
    );

    Ok(BuildArgs { configure, env })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::template::Layout;
    use crate::types::{ArgRule, Dependency, EnvMode, EnvRule};

    fn php() -> Formula {
        let mut formula = Formula::new("php74")
            .with_version("7.4")
            .with_option(
                OptionDecl::flag("pear", "Build with PEAR", true).off(&["--without-pear"]),
            )
            .with_option(
                OptionDecl::flag("phpdbg", "Enable phpdbg", false)
                    .on(&["--enable-phpdbg"])
                    .off(&["--enable-dtrace", "--disable-phpdbg"]),
            )
            .with_option(OptionDecl::flag("debug", "Debug build", false))
            .with_option(
                OptionDecl::choice("sapi", "Server API", &["cli", "fpm"], "cli")
                    .on(&["--enable-{value}"]),
            )
            .with_dependency(Dependency::optional("gmp"));
        formula.build.configure.args = vec!["--prefix={prefix}".into(), "--with-zlib".into()];
        formula.rules = vec![
            ArgRule {
                when: Condition::All(vec![
                    Condition::Option("phpdbg".into()),
                    Condition::Option("debug".into()),
                ]),
                args: vec!["--enable-phpdbg-debug".into()],
            },
            ArgRule {
                when: Condition::Option("gmp".into()),
                args: vec!["--with-gmp={opt:gmp}".into()],
            },
        ];
        formula.env = vec![
            EnvRule {
                name: "lt_cv_path_SED".into(),
                value: "sed".into(),
                mode: EnvMode::Set,
                separator: ":".into(),
                when: None,
            },
            EnvRule {
                name: "SDKROOT".into(),
                value: "/sdk/10.12".into(),
                mode: EnvMode::Set,
                separator: ":".into(),
                when: Some(Condition::OsVersionPrefix("10.12".into())),
            },
        ];
        formula
    }

    fn vars(formula: &Formula) -> Vars {
        Layout::new("/fx", "/home/dev").vars(formula, "7.4").unwrap()
    }

    #[test]
    fn test_resolve_defaults() {
        let formula = php();
        let options = OptionSet::resolve(&formula, &RequestedOptions::new()).unwrap();

        assert_eq!(options, OptionSet::defaults(&formula));
        assert!(options.is_enabled("pear"));
        assert!(!options.is_enabled("gmp"));
        assert_eq!(
            options.value("sapi"),
            Some(&OptionValue::Choice("cli".into()))
        );
        let names: Vec<_> = options.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["pear", "phpdbg", "debug", "sapi", "gmp"]);
    }

    #[test]
    fn test_resolve_unknown_option() {
        let requested = RequestedOptions::new().with("imap");
        let err = OptionSet::resolve(&php(), &requested).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownOption { ref option, .. } if option == "imap"
        ));
    }

    #[test]
    fn test_resolve_invalid_values() {
        let requested = RequestedOptions::new().set("sapi", "cgi");
        assert!(matches!(
            OptionSet::resolve(&php(), &requested),
            Err(Error::InvalidOptionValue { .. })
        ));

        let requested = RequestedOptions::new().set("pear", "maybe");
        assert!(matches!(
            OptionSet::resolve(&php(), &requested),
            Err(Error::InvalidOptionValue { .. })
        ));
    }

    #[test]
    fn test_last_request_wins() {
        let requested = RequestedOptions::new().with("debug").without("debug");
        let options = OptionSet::resolve(&php(), &requested).unwrap();
        assert!(!options.is_enabled("debug"));
    }

    #[test]
    fn test_evaluate_declaration_order() {
        let formula = php();
        let requested = RequestedOptions::new()
            .with("gmp")
            .without("pear")
            .with("debug")
            .with("phpdbg")
            .set("sapi", "fpm");
        let options = OptionSet::resolve(&formula, &requested).unwrap();
        let facts = EnvFacts::new("linux", "x86_64");
        let args = evaluate(&formula, &options, &facts, &vars(&formula)).unwrap();

        assert_eq!(
            args.configure,
            vec![
                "--prefix=/fx/Cellar/php74/7.4",
                "--with-zlib",
                "--without-pear",
                "--enable-phpdbg",
                "--enable-fpm",
                "--enable-phpdbg-debug",
                "--with-gmp=/fx/opt/gmp",
            ]
        );
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let formula = php();
        let options = OptionSet::resolve(&formula, &RequestedOptions::new().with("gmp")).unwrap();
        let facts = EnvFacts::new("macos", "x86_64").with_os_version("10.12.6");
        let vars = vars(&formula);

        let first = evaluate(&formula, &options, &facts, &vars).unwrap();
        let second = evaluate(&formula, &options, &facts, &vars).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_env_conditioned_on_facts() {
        let formula = php();
        let options = OptionSet::defaults(&formula);
        let vars = vars(&formula);

        let sierra = EnvFacts::new("macos", "x86_64").with_os_version("10.12.6");
        let args = evaluate(&formula, &options, &sierra, &vars).unwrap();
        let names: Vec<_> = args.env.vars().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["lt_cv_path_SED", "SDKROOT"]);

        let newer = EnvFacts::new("macos", "x86_64").with_os_version("14.2");
        let args = evaluate(&formula, &options, &newer, &vars).unwrap();
        assert_eq!(args.env.vars().len(), 1);
    }

    #[test]
    fn test_evaluate_requires_version() {
        let mut formula = php();
        formula.version = None;
        let options = OptionSet::defaults(&formula);
        let vars = Layout::new("/fx", "/home/dev").vars(&formula, "0").unwrap();
        let err = evaluate(&formula, &options, &EnvFacts::default(), &vars).unwrap_err();
        assert!(matches!(err, Error::MissingVersion { .. }));
    }
}
