//! Dependency graph builder.
//!
//! Expands a target formula into all of its transitive dependencies,
//! detects cycles, and produces an [`InstallPlan`] in topological order
//! (dependencies before dependents). Planning is pure: it only reads the
//! catalog and the injected [`EnvFacts`].

use crate::condition::{EnvFacts, Scope, holds};
use crate::error::{Error, Result};
use crate::options::{OptionSet, RequestedOptions};
use crate::registry::Catalog;
use crate::types::Formula;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One formula of a plan with its resolved options.
#[derive(Debug, Clone)]
pub struct PlannedFormula {
    /// The formula.
    pub formula: Arc<Formula>,
    /// Options it will be built with.
    pub options: OptionSet,
    /// Only needed while building other entries of the plan.
    pub build_only: bool,
    /// Already present on the system.
    pub present: bool,
}

impl PlannedFormula {
    /// Formula name.
    pub fn name(&self) -> &str {
        &self.formula.name
    }
}

/// A conflict-free, topologically ordered set of formulas.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    /// Name of the requested formula; always the last entry.
    pub target: String,
    /// Entries, dependencies first.
    pub entries: Vec<PlannedFormula>,
    /// Facts the plan was computed against.
    pub facts: EnvFacts,
}

impl InstallPlan {
    /// Entry names in install order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(PlannedFormula::name).collect()
    }

    /// Find an entry by name.
    pub fn get(&self, name: &str) -> Option<&PlannedFormula> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// The entry of the requested formula.
    pub fn target_entry(&self) -> Option<&PlannedFormula> {
        self.get(&self.target)
    }

    /// Whether `entry` is built from its head repository.
    ///
    /// Only the target is; its dependencies use their release sources.
    pub fn is_head_build(&self, entry: &PlannedFormula) -> bool {
        self.facts.head && entry.name() == self.target
    }

    /// Facts `entry` is built with.
    pub fn entry_facts(&self, entry: &PlannedFormula) -> EnvFacts {
        self.facts.clone().with_head(self.is_head_build(entry))
    }

    /// Entries that need installing: everything not present, plus the target.
    pub fn pending(&self) -> impl Iterator<Item = &PlannedFormula> {
        self.entries
            .iter()
            .filter(|e| !e.present || e.name() == self.target)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds install plans from a catalog.
pub struct GraphBuilder<'a> {
    catalog: &'a dyn Catalog,
}

#[derive(Default)]
struct Walk {
    visiting: Vec<String>,
    visited: HashMap<String, usize>,
    entries: Vec<PlannedFormula>,
    edges: Vec<Vec<(String, bool)>>,
}

impl<'a> GraphBuilder<'a> {
    /// Create a builder over a catalog.
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog }
    }

    /// Compute the install plan of `target`.
    ///
    /// Requested options apply to the target; dependencies use their
    /// defaults. Optional dependencies are planned only when their option
    /// is enabled, and conditional ones only when their condition holds.
    pub fn plan(
        &self,
        target: &str,
        requested: &RequestedOptions,
        facts: &EnvFacts,
    ) -> Result<InstallPlan> {
        let mut walk = Walk::default();
        self.visit(target, Some(requested), facts, &mut walk)?;

        mark_build_only(&mut walk);

        let plan = InstallPlan {
            target: target.to_string(),
            entries: walk.entries,
            facts: facts.clone(),
        };
        self.check_conflicts(&plan)?;

        log::debug!(
            "Planned {} formula(s) for {}: {}",
            plan.len(),
            target,
            plan.names().join(", ")
        );
        Ok(plan)
    }

    fn visit(
        &self,
        name: &str,
        requested: Option<&RequestedOptions>,
        facts: &EnvFacts,
        walk: &mut Walk,
    ) -> Result<()> {
        if walk.visited.contains_key(name) {
            return Ok(());
        }

        if let Some(start) = walk.visiting.iter().position(|n| n == name) {
            let mut cycle = walk.visiting[start..].to_vec();
            cycle.push(name.to_string());
            return Err(Error::CyclicDependency { cycle });
        }

        let formula = self.catalog.lookup(name)?;
        let options = match requested {
            Some(requested) => OptionSet::resolve(&formula, requested)?,
            None => OptionSet::defaults(&formula),
        };

        walk.visiting.push(name.to_string());

        // Only the requested formula is built from its head repository.
        let release_facts;
        let own_facts = if requested.is_none() && facts.head {
            release_facts = facts.clone().with_head(false);
            &release_facts
        } else {
            facts
        };
        let scope = Scope {
            options: &options,
            facts: own_facts,
            version: formula.version.as_deref().unwrap_or_default(),
        };
        let mut edges = Vec::new();
        for dep in &formula.dependencies {
            if dep.optional && !options.is_enabled(&dep.name) {
                log::trace!("{}: skipping optional dependency {}", name, dep.name);
                continue;
            }
            if !holds(dep.when.as_ref(), &scope) {
                log::trace!("{}: condition of dependency {} is false", name, dep.name);
                continue;
            }
            self.visit(&dep.name, None, facts, walk)?;
            edges.push((dep.name.clone(), dep.build));
        }

        walk.visiting.pop();
        walk.visited.insert(name.to_string(), walk.entries.len());
        walk.entries.push(PlannedFormula {
            present: facts.is_present(name),
            formula,
            options,
            build_only: true,
        });
        walk.edges.push(edges);
        Ok(())
    }

    fn check_conflicts(&self, plan: &InstallPlan) -> Result<()> {
        let planned: HashSet<&str> = plan.entries.iter().map(PlannedFormula::name).collect();
        let clashes = |name: &str| plan.facts.is_present(name) || planned.contains(name);

        for entry in plan.pending() {
            let formula = &entry.formula;

            for conflict in &formula.conflicts {
                if conflict.name != formula.name && clashes(&conflict.name) {
                    return Err(Error::Conflict {
                        formula: formula.name.clone(),
                        conflicting: conflict.name.clone(),
                        reason: conflict.reason.clone(),
                    });
                }
            }

            if let Some(family) = &formula.family {
                let pattern = Regex::new(&family.pattern).map_err(|e| Error::InvalidFormula {
                    name: formula.name.clone(),
                    message: format!("invalid family pattern: {e}"),
                })?;
                let sibling = self
                    .catalog
                    .all_matching(&pattern)
                    .into_iter()
                    .map(|f| f.name.clone())
                    .chain(plan.facts.present.iter().cloned())
                    .filter(|n| *n != formula.name && pattern.is_match(n))
                    .find(|n| clashes(n));
                if let Some(sibling) = sibling {
                    return Err(Error::Conflict {
                        formula: formula.name.clone(),
                        conflicting: sibling,
                        reason: family.reason.clone(),
                    });
                }
            }

            for present in &plan.facts.present {
                let Ok(other) = self.catalog.lookup(present) else {
                    continue;
                };
                if let Some(conflict) = other.conflicts.iter().find(|c| c.name == formula.name) {
                    return Err(Error::Conflict {
                        formula: formula.name.clone(),
                        conflicting: present.clone(),
                        reason: conflict.reason.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// An entry is build-only unless a chain of runtime edges reaches it from the target.
fn mark_build_only(walk: &mut Walk) {
    let Some(last) = walk.entries.len().checked_sub(1) else {
        return;
    };
    let mut runtime = vec![false; walk.entries.len()];
    runtime[last] = true;

    // Post-order reversed is dependents-first, so one pass propagates fully.
    for index in (0..walk.entries.len()).rev() {
        if !runtime[index] {
            continue;
        }
        for (dep, build) in &walk.edges[index] {
            if !build && let Some(&dep_index) = walk.visited.get(dep) {
                runtime[dep_index] = true;
            }
        }
    }

    for (entry, needed) in walk.entries.iter_mut().zip(runtime) {
        entry.build_only = !needed;
    }
}
