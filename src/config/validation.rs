//! Scenario validation.
//!
//! Runs on the typed [`ScenarioConfig`] after deserialization and collects
//! every problem instead of stopping at the first one.

use std::collections::HashSet;

use crate::config::loader::ConfigLimits;
use crate::config::schema::{
    ContractConfig, FilterConfig, NodeConfig, ScenarioConfig, StepAction, UnitLeafConfig,
};
use crate::error::{Severity, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Result of validating a scenario.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Problems that prevent loading.
    pub errors: Vec<ValidationIssue>,

    /// Informational problems.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Scenario validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a scenario and returns every issue found.
    pub fn validate(&mut self, config: &ScenarioConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        if config.scenario.name.trim().is_empty() {
            self.add_error("scenario.name", "Scenario name is required and cannot be empty");
        }

        let unit_names = known_unit_names(config);
        self.validate_units(config);
        self.validate_contracts(config, &unit_names);
        self.validate_steps(config);
        self.validate_limits(config, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Units
    // ========================================================================

    fn validate_units(&mut self, config: &ScenarioConfig) {
        let mut seen = HashSet::new();
        for (i, unit) in config.units.iter().enumerate() {
            let path = format!("units[{i}]");
            if unit.name.trim().is_empty() {
                self.add_error(&format!("{path}.name"), "Unit name cannot be empty");
            } else if !seen.insert(unit.name.as_str()) {
                self.add_error(
                    &format!("{path}.name"),
                    &format!("Duplicate unit name '{}'", unit.name),
                );
            }
            let part_names: HashSet<&str> = unit.parts.iter().map(|p| p.name.as_str()).collect();
            for (f, fragment) in unit.fragments.iter().enumerate() {
                if fragment.is_empty() {
                    self.add_error(&format!("{path}.fragments[{f}]"), "Fragment has no parts");
                }
                for part in fragment {
                    if !part_names.is_empty() && !part_names.contains(part.as_str()) {
                        self.add_warning(
                            &format!("{path}.fragments[{f}]"),
                            &format!("Fragment names unknown part '{part}'"),
                        );
                    }
                }
            }
        }

        if let Some(focus) = &config.focus
            && !config.units.iter().any(|u| &u.name == focus)
        {
            let names: Vec<&str> = config.units.iter().map(|u| u.name.as_str()).collect();
            self.add_error(
                "focus",
                &unknown_reference("unit", focus, names.iter().copied()),
            );
        }
    }

    // ========================================================================
    // Contracts
    // ========================================================================

    fn validate_contracts(&mut self, config: &ScenarioConfig, unit_names: &HashSet<String>) {
        if config.contracts.is_empty() {
            self.add_error("contracts", "At least one contract is required");
        }
        let mut ids = HashSet::new();
        for (i, contract) in config.contracts.iter().enumerate() {
            let path = format!("contracts[{i}]");
            if contract.id.trim().is_empty() {
                self.add_error(&format!("{path}.id"), "Contract id cannot be empty");
            } else if !ids.insert(contract.id.as_str()) {
                self.add_error(
                    &format!("{path}.id"),
                    &format!("Duplicate contract id '{}'", contract.id),
                );
            }
            if contract.root.is_empty() {
                self.add_warning(
                    &format!("{path}.root"),
                    "Contract has no conditions and completes immediately",
                );
            }
            self.validate_contract(contract, &path, unit_names);
        }
    }

    fn validate_contract(
        &mut self,
        contract: &ContractConfig,
        path: &str,
        unit_names: &HashSet<String>,
    ) {
        let mut keys = HashSet::from([contract.id.clone()]);
        for (i, node) in contract.root.iter().enumerate() {
            self.validate_node(node, &format!("{path}.root[{i}]"), &mut keys, unit_names);
        }
    }

    fn validate_node(
        &mut self,
        node: &NodeConfig,
        path: &str,
        keys: &mut HashSet<String>,
        unit_names: &HashSet<String>,
    ) {
        let key = node.key();
        if key.trim().is_empty() {
            self.add_error(&format!("{path}.key"), "Node key cannot be empty");
        } else if !keys.insert(key.to_string()) {
            self.add_error(&format!("{path}.key"), &format!("Duplicate node key '{key}'"));
        }

        let count = node.children().len();
        match node {
            NodeConfig::All(_) | NodeConfig::Any(_) | NodeConfig::None(_) if count == 0 => {
                self.add_warning(path, &format!("'{}' node has no children", node.type_name()));
            }
            NodeConfig::Not(_) if count != 1 => {
                self.add_error(path, &format!("'not' needs exactly 1 child, found {count}"));
            }
            NodeConfig::AtLeast(c) if c.n > count => {
                self.add_error(
                    path,
                    &format!("'at_least' n = {} exceeds its {count} children", c.n),
                );
            }
            NodeConfig::AtMost(c) if c.n >= count => {
                self.add_warning(
                    path,
                    &format!("'at_most' n = {} can never be exceeded by {count} children", c.n),
                );
            }
            NodeConfig::Sequence(seq) => {
                let child_keys: Vec<&str> = seq.children.iter().map(NodeConfig::key).collect();
                for hidden in &seq.hidden {
                    if !child_keys.contains(&hidden.as_str()) {
                        self.add_error(
                            &format!("{path}.hidden"),
                            &unknown_reference("step", hidden, child_keys.iter().copied()),
                        );
                    }
                }
            }
            NodeConfig::Group(group) => {
                if count == 0 {
                    self.add_error(path, "'group' needs at least 1 child");
                }
                if let Err(e) = group.duration.seconds() {
                    self.add_error(&format!("{path}.duration"), &format!("Invalid duration: {e}"));
                }
                for name in &group.units {
                    if !unit_names.contains(name) {
                        self.add_warning(
                            &format!("{path}.units"),
                            &unknown_reference("unit", name, unit_names.iter().map(String::as_str)),
                        );
                    }
                }
            }
            NodeConfig::Unit(leaf) => self.validate_leaf(leaf, path),
            _ => {}
        }

        for (i, child) in node.children().iter().enumerate() {
            self.validate_node(child, &format!("{path}.children[{i}]"), keys, unit_names);
        }
    }

    fn validate_leaf(&mut self, leaf: &UnitLeafConfig, path: &str) {
        if !leaf.filters.is_empty() && leaf.collection.is_none() {
            self.add_error(
                &format!("{path}.collection"),
                "Filters need a 'collection' (crew or parts)",
            );
        }
        for (i, filter) in leaf.filters.iter().enumerate() {
            self.validate_filter(filter, &format!("{path}.filters[{i}]"));
        }
    }

    fn validate_filter(&mut self, filter: &FilterConfig, path: &str) {
        match filter.count {
            Some(_) if filter.has_predicate() => {
                self.add_error(path, "A filter takes either 'count' or an item predicate, not both");
            }
            Some(bounds) if bounds.max.is_some_and(|max| max < bounds.min) => {
                self.add_error(&format!("{path}.count"), "'max' is below 'min'");
            }
            _ => {}
        }
    }

    // ========================================================================
    // Steps
    // ========================================================================

    fn validate_steps(&mut self, config: &ScenarioConfig) {
        let contract_ids: Vec<&str> = config.contracts.iter().map(|c| c.id.as_str()).collect();
        let mut last = f64::NEG_INFINITY;
        for (i, step) in config.steps.iter().enumerate() {
            let path = format!("steps[{i}]");
            if !step.at.is_finite() {
                self.add_error(&format!("{path}.at"), "Step time must be a finite number");
            } else {
                if step.at < last {
                    self.add_error(
                        &format!("{path}.at"),
                        &format!("Step time {} is earlier than the previous step ({last})", step.at),
                    );
                }
                last = step.at;
            }
            if let StepAction::Flag {
                contract: Some(id), ..
            } = &step.action
                && !contract_ids.contains(&id.as_str())
            {
                self.add_error(
                    &format!("{path}.contract"),
                    &unknown_reference("contract", id, contract_ids.iter().copied()),
                );
            }
        }
    }

    // ========================================================================
    // Limits
    // ========================================================================

    fn validate_limits(&mut self, config: &ScenarioConfig, limits: &ConfigLimits) {
        if config.contracts.len() > limits.max_contracts {
            self.add_error(
                "contracts",
                &format!(
                    "Too many contracts: {} (max {})",
                    config.contracts.len(),
                    limits.max_contracts
                ),
            );
        }
        for (i, contract) in config.contracts.iter().enumerate() {
            let nodes: usize = contract.root.iter().map(count_nodes).sum();
            if nodes > limits.max_nodes {
                self.add_error(
                    &format!("contracts[{i}]"),
                    &format!("Too many nodes: {nodes} (max {})", limits.max_nodes),
                );
            }
        }
        if config.units.len() > limits.max_units {
            self.add_error(
                "units",
                &format!("Too many units: {} (max {})", config.units.len(), limits.max_units),
            );
        }
        if config.steps.len() > limits.max_steps {
            self.add_error(
                "steps",
                &format!("Too many steps: {} (max {})", config.steps.len(), limits.max_steps),
            );
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Closest candidate within a Damerau-Levenshtein distance of 3.
#[must_use]
pub fn suggest<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    candidates
        .into_iter()
        .map(|c| (c, strsim::damerau_levenshtein(input, c)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(c, _)| c)
}

fn unknown_reference<'a>(
    what: &str,
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> String {
    match suggest(name, candidates) {
        Some(hint) => format!("Unknown {what} '{name}' (did you mean '{hint}'?)"),
        None => format!("Unknown {what} '{name}'"),
    }
}

/// Every unit name the scenario can produce: initial units, spawned and
/// undocked units, crew members on foot, and group `define` names.
fn known_unit_names(config: &ScenarioConfig) -> HashSet<String> {
    let mut names: HashSet<String> = config.units.iter().map(|u| u.name.clone()).collect();
    for unit in &config.units {
        names.extend(unit.crew.iter().map(|c| c.name.clone()));
    }
    for step in &config.steps {
        match &step.action {
            StepAction::Spawn { unit } => {
                names.insert(unit.name.clone());
                names.extend(unit.crew.iter().map(|c| c.name.clone()));
            }
            StepAction::Undock { name, .. } => {
                names.insert(name.clone());
            }
            StepAction::Associate { name, .. } => {
                names.insert(name.clone());
            }
            _ => {}
        }
    }
    for contract in &config.contracts {
        collect_defines(&contract.root, &mut names);
    }
    names
}

fn collect_defines(nodes: &[NodeConfig], names: &mut HashSet<String>) {
    for node in nodes {
        if let NodeConfig::Group(group) = node
            && let Some(define) = &group.define
        {
            names.insert(define.clone());
        }
        collect_defines(node.children(), names);
    }
}

fn count_nodes(node: &NodeConfig) -> usize {
    1 + node.children().iter().map(count_nodes).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ScenarioConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn validate(yaml: &str) -> ValidationResult {
        Validator::new().validate(&parse(yaml), &ConfigLimits::default())
    }

    #[test]
    fn test_valid_scenario() {
        let result = validate(
            r"
scenario: { name: ok }
contracts:
  - id: c
    root:
      - type: flag
        key: f
",
        );
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_collects_all_errors() {
        let result = validate(
            r"
scenario: { name: '' }
contracts:
  - id: c
    root:
      - type: not
        key: n
      - type: flag
        key: n
",
        );
        assert!(result.has_errors());
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_hidden_step_suggestion() {
        let result = validate(
            r"
scenario: { name: s }
contracts:
  - id: c
    root:
      - type: sequence
        key: seq
        hidden: [lnad]
        children:
          - type: flag
            key: launch
          - type: flag
            key: land
",
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("did you mean 'land'"));
    }

    #[test]
    fn test_focus_suggestion() {
        let result = validate(
            r"
scenario: { name: s }
contracts:
  - id: c
    root: [{ type: flag, key: f }]
units:
  - name: Relay
focus: Rely
",
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path, "focus");
        assert!(result.errors[0].message.contains("'Relay'"));
    }

    #[test]
    fn test_filter_errors() {
        let result = validate(
            r"
scenario: { name: s }
contracts:
  - id: c
    root:
      - type: unit
        key: u
        filters:
          - tag: pilot
            count: { min: 1 }
          - count: { min: 3, max: 1 }
",
        );
        // missing collection, mixed filter, inverted bounds
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_steps_must_not_go_back_in_time() {
        let result = validate(
            r"
scenario: { name: s }
contracts:
  - id: c
    root: [{ type: flag, key: f }]
steps:
  - { at: 10, action: tick }
  - { at: 5, action: tick }
  - { at: 6, action: flag, contract: d, key: f, state: complete }
",
        );
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_unknown_allow_list_name_is_warning() {
        let result = validate(
            r"
scenario: { name: s }
contracts:
  - id: c
    root:
      - type: group
        key: g
        units: [Ghost]
        children: [{ type: flag, key: f }]
",
        );
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_limits() {
        let limits = ConfigLimits {
            max_contracts: 0,
            ..ConfigLimits::default()
        };
        let config = parse(
            r"
scenario: { name: s }
contracts:
  - id: c
    root: [{ type: flag, key: f }]
",
        );
        let result = Validator::new().validate(&config, &limits);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_suggest() {
        assert_eq!(suggest("relya", ["relay", "base"]), Some("relay"));
        assert_eq!(suggest("zzzzzzz", ["relay"]), None);
    }
}
