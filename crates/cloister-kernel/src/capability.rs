//! Role capability configuration
//!
//! A capability table maps every [`Role`] to an ordered list of rules. Each
//! rule names a [`Namespace`], a path pattern over logical workspace paths, an
//! [`Effect`] and the actions it covers. The table is plain data: it is loaded
//! from TOML or YAML (or built in) and validated once, before any workspace
//! exists.
//!
//! ```toml
//! [[roles.isolated_producer_a]]
//! namespace = "documents"
//! pattern = "documents/**"
//! effect = "allow"
//! access = "read"
//! ```

use crate::error::ConfigError;
use crate::types::{Action, Role};
use cloister_artifact::{LogicalPath, Namespace};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Rule effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Grants the covered actions
    Allow,
    /// Refuses the covered actions, overriding any allow
    Deny,
}

/// Actions a rule covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Reads only
    Read,
    /// Writes only
    Write,
    /// Both
    #[default]
    ReadWrite,
}

impl Access {
    /// Whether `action` is covered
    #[inline]
    #[must_use]
    pub const fn covers(self, action: Action) -> bool {
        matches!(
            (self, action),
            (Access::ReadWrite, _) | (Access::Read, Action::Read) | (Access::Write, Action::Write)
        )
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::ReadWrite => "read_write",
        })
    }
}

/// Declarative rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Logical namespace the rule classifies paths into
    pub namespace: Namespace,
    /// Prefix or glob over the slash-joined logical path
    pub pattern: String,
    /// Allow or deny
    pub effect: Effect,
    /// Covered actions
    #[serde(default)]
    pub access: Access,
}

impl RuleSpec {
    /// Allow rule
    pub fn allow(namespace: Namespace, pattern: impl Into<String>, access: Access) -> Self {
        Self {
            namespace,
            pattern: pattern.into(),
            effect: Effect::Allow,
            access,
        }
    }

    /// Deny rule
    pub fn deny(namespace: Namespace, pattern: impl Into<String>, access: Access) -> Self {
        Self {
            namespace,
            pattern: pattern.into(),
            effect: Effect::Deny,
            access,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    /// `**`
    Everything,
    /// `a/b/**` with a literal prefix: segment-aware prefix match
    Prefix(LogicalPath),
    /// Anything else, matched with `*` confined to one segment
    Glob(Pattern),
}

impl Matcher {
    fn compile(pattern: &str) -> Result<Self, glob::PatternError> {
        if pattern == "**" {
            return Ok(Matcher::Everything);
        }
        if let Some(prefix) = pattern.strip_suffix("/**") {
            let literal = !prefix.contains(['*', '?', '[', ']']);
            if literal {
                if let Ok(path) = prefix.parse::<LogicalPath>() {
                    return Ok(Matcher::Prefix(path));
                }
            }
        }
        Pattern::new(pattern).map(Matcher::Glob)
    }

    fn matches(&self, path: &LogicalPath) -> bool {
        match self {
            Matcher::Everything => true,
            Matcher::Prefix(prefix) => prefix.is_prefix_of(path),
            Matcher::Glob(pattern) => pattern.matches_with(&path.as_string(), GLOB_OPTIONS),
        }
    }

    /// Whether some path below the top-level directory `dir` can match
    fn reaches(&self, dir: &str) -> bool {
        match self {
            Matcher::Everything => true,
            Matcher::Prefix(prefix) => prefix.first() == dir,
            Matcher::Glob(pattern) => {
                // `*` cannot cross a separator, so a single-segment glob stays at the top level
                let Some((head, _)) = pattern.as_str().split_once('/') else {
                    return false;
                };
                head == "**" || Pattern::new(head).is_ok_and(|h| h.matches_with(dir, GLOB_OPTIONS))
            }
        }
    }
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled rule bound to its role and position
#[derive(Debug, Clone)]
pub struct CapabilityRule {
    role: Role,
    index: usize,
    spec: RuleSpec,
    matcher: Matcher,
}

impl CapabilityRule {
    fn compile(role: Role, index: usize, spec: RuleSpec) -> Result<Self, ConfigError> {
        let matcher = Matcher::compile(&spec.pattern).map_err(|e| ConfigError::InvalidPattern {
            role,
            index,
            pattern: spec.pattern.clone(),
            message: e.msg.to_string(),
        })?;
        Ok(Self {
            role,
            index,
            spec,
            matcher,
        })
    }

    /// Role owning the rule
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// 1-based position within the role's list
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Source declaration
    #[inline]
    #[must_use]
    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    /// Namespace the rule classifies into
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.spec.namespace
    }

    /// Allow or deny
    #[inline]
    #[must_use]
    pub fn effect(&self) -> Effect {
        self.spec.effect
    }

    /// Namespace directories other than its own that the pattern can match
    /// paths in
    pub fn foreign_namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        Namespace::ALL
            .into_iter()
            .filter(move |ns| *ns != self.spec.namespace && self.matcher.reaches(ns.as_str()))
    }

    /// Whether this rule applies to `(path, action)`
    #[must_use]
    pub fn applies(&self, path: &LogicalPath, action: Action) -> bool {
        self.spec.access.covers(action) && self.matcher.matches(path)
    }
}

impl fmt::Display for CapabilityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let effect = match self.spec.effect {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        };
        write!(
            f,
            "{}#{} {} {} {}:{}",
            self.role, self.index, effect, self.spec.access, self.spec.namespace, self.spec.pattern
        )
    }
}

/// Outcome of evaluating one role's rules
#[derive(Debug, Clone, Copy)]
pub enum Evaluation<'a> {
    /// First matching allow rule
    Allowed(&'a CapabilityRule),
    /// First matching deny rule
    Denied(&'a CapabilityRule),
    /// Nothing matched
    Unmatched,
}

/// Ordered rules of one role
#[derive(Debug, Clone)]
pub struct CapabilitySet {
    role: Role,
    rules: Vec<CapabilityRule>,
}

impl CapabilitySet {
    /// Compile a role's rules
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidPattern`] for bad glob syntax.
    pub fn compile(role: Role, specs: Vec<RuleSpec>) -> Result<Self, ConfigError> {
        let rules = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| CapabilityRule::compile(role, i + 1, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { role, rules })
    }

    /// Set with no rules; denies everything
    #[must_use]
    pub fn empty(role: Role) -> Self {
        Self {
            role,
            rules: Vec::new(),
        }
    }

    /// Owning role
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// All rules in declaration order
    #[inline]
    #[must_use]
    pub fn rules(&self) -> &[CapabilityRule] {
        &self.rules
    }

    /// Allow-list
    pub fn allowed(&self) -> impl Iterator<Item = &CapabilityRule> {
        self.rules.iter().filter(|r| r.effect() == Effect::Allow)
    }

    /// Deny-list
    pub fn denied(&self) -> impl Iterator<Item = &CapabilityRule> {
        self.rules.iter().filter(|r| r.effect() == Effect::Deny)
    }

    /// Evaluate `(path, action)`: any matching deny wins, then the first
    /// matching allow, otherwise unmatched
    #[must_use]
    pub fn evaluate(&self, path: &LogicalPath, action: Action) -> Evaluation<'_> {
        if let Some(rule) = self.denied().find(|r| r.applies(path, action)) {
            return Evaluation::Denied(rule);
        }
        match self.allowed().find(|r| r.applies(path, action)) {
            Some(rule) => Evaluation::Allowed(rule),
            None => Evaluation::Unmatched,
        }
    }

    /// Whether some allow rule grants `action` within `namespace`
    #[must_use]
    pub fn grants(&self, namespace: Namespace, action: Action) -> bool {
        self.allowed()
            .any(|r| r.namespace() == namespace && r.spec.access.covers(action))
    }

    /// Whether every namespace is readable
    #[must_use]
    pub fn reads_everything(&self) -> bool {
        Namespace::ALL.into_iter().all(|ns| self.grants(ns, Action::Read))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TableFile {
    #[serde(default)]
    roles: BTreeMap<String, Vec<RuleSpec>>,
}

impl TableFile {
    fn into_specs(self) -> Result<BTreeMap<Role, Vec<RuleSpec>>, ConfigError> {
        self.roles
            .into_iter()
            .map(|(name, rules)| Ok((name.parse::<Role>()?, rules)))
            .collect()
    }
}

/// Capability sets for every role
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    sets: BTreeMap<Role, CapabilitySet>,
}

impl CapabilityTable {
    /// Compile and validate a table
    ///
    /// Roles absent from `specs` get an empty set and are denied everything.
    ///
    /// # Errors
    /// Returns [`ConfigError`] for invalid patterns or a table that breaks
    /// producer isolation or reviewer uniqueness.
    pub fn from_specs(specs: BTreeMap<Role, Vec<RuleSpec>>) -> Result<Self, ConfigError> {
        let mut sets = BTreeMap::new();
        for role in Role::ALL {
            sets.insert(role, CapabilitySet::empty(role));
        }
        for (role, rules) in specs {
            sets.insert(role, CapabilitySet::compile(role, rules)?);
        }
        let table = Self { sets };
        table.validate()?;
        Ok(table)
    }

    /// Parse a TOML table
    ///
    /// # Errors
    /// Returns [`ConfigError`] on parse or validation failure.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let file: TableFile = toml::from_str(s)?;
        Self::from_specs(file.into_specs()?)
    }

    /// Parse a YAML table
    ///
    /// # Errors
    /// Returns [`ConfigError`] on parse or validation failure.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let file: TableFile = serde_yaml::from_str(s)?;
        Self::from_specs(file.into_specs()?)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// Returns [`ConfigError`] on I/O, format, parse or validation failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Rules of one role
    #[must_use]
    pub fn set(&self, role: Role) -> &CapabilitySet {
        // from_specs inserts every role
        &self.sets[&role]
    }

    /// Declarative form of every role's rules
    #[must_use]
    pub fn to_specs(&self) -> BTreeMap<Role, Vec<RuleSpec>> {
        self.sets
            .iter()
            .map(|(role, set)| (*role, set.rules.iter().map(|r| r.spec.clone()).collect()))
            .collect()
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns the serializer error.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        let roles = self
            .to_specs()
            .into_iter()
            .map(|(role, rules)| (role.as_str().to_string(), rules))
            .collect();
        toml::to_string_pretty(&TableFile { roles })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for set in self.sets.values() {
            // an allow rule classifies what it matches, so it must stay inside its namespace
            for rule in set.allowed() {
                if let Some(foreign) = rule.foreign_namespaces().next() {
                    return Err(ConfigError::IsolationInvariant {
                        role: set.role,
                        message: format!("rule `{rule}` also matches paths under {foreign}/"),
                    });
                }
            }
            let writes_tests = set.grants(Namespace::Tests, Action::Write);
            let writes_impl = set.grants(Namespace::Implementation, Action::Write);
            if writes_tests && set.grants(Namespace::Implementation, Action::Read) {
                return Err(ConfigError::IsolationInvariant {
                    role: set.role,
                    message: "role writes tests but may read implementation".into(),
                });
            }
            if writes_impl && set.grants(Namespace::Tests, Action::Read) {
                return Err(ConfigError::IsolationInvariant {
                    role: set.role,
                    message: "role writes implementation but may read tests".into(),
                });
            }
            let full_read = set.reads_everything();
            if full_read && set.role != Role::Reviewer {
                return Err(ConfigError::IsolationInvariant {
                    role: set.role,
                    message: "only the reviewer may read every namespace".into(),
                });
            }
            if !full_read && set.role == Role::Reviewer {
                return Err(ConfigError::IsolationInvariant {
                    role: set.role,
                    message: "reviewer must be able to read every namespace".into(),
                });
            }
        }
        Ok(())
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        use Access::{Read, ReadWrite};
        use Namespace::{Documents, Implementation, Review, Tests};

        let specs = BTreeMap::from([
            (
                Role::Collector,
                vec![
                    RuleSpec::allow(Documents, "documents/**", ReadWrite),
                    RuleSpec::deny(Tests, "tests/**", ReadWrite),
                    RuleSpec::deny(Implementation, "implementation/**", ReadWrite),
                    RuleSpec::deny(Review, "review/**", ReadWrite),
                ],
            ),
            (
                Role::IsolatedProducerA,
                vec![
                    RuleSpec::allow(Documents, "documents/**", Read),
                    RuleSpec::allow(Tests, "tests/**", ReadWrite),
                    RuleSpec::deny(Implementation, "implementation/**", ReadWrite),
                    RuleSpec::deny(Review, "review/**", ReadWrite),
                ],
            ),
            (
                Role::IsolatedProducerB,
                vec![
                    RuleSpec::allow(Documents, "documents/**", Read),
                    RuleSpec::allow(Implementation, "implementation/**", ReadWrite),
                    RuleSpec::deny(Tests, "tests/**", ReadWrite),
                    RuleSpec::deny(Review, "review/**", ReadWrite),
                ],
            ),
            (
                Role::Reviewer,
                vec![
                    RuleSpec::allow(Documents, "documents/**", Read),
                    RuleSpec::allow(Tests, "tests/**", Read),
                    RuleSpec::allow(Implementation, "implementation/**", Read),
                    RuleSpec::allow(Review, "review/**", ReadWrite),
                ],
            ),
            (
                Role::Supervisor,
                vec![
                    RuleSpec::allow(Review, "review/**", Read),
                    RuleSpec::deny(Documents, "documents/**", ReadWrite),
                    RuleSpec::deny(Tests, "tests/**", ReadWrite),
                    RuleSpec::deny(Implementation, "implementation/**", ReadWrite),
                ],
            ),
        ]);

        let sets = specs
            .into_iter()
            .map(|(role, rules)| {
                let set = CapabilitySet {
                    role,
                    rules: rules
                        .into_iter()
                        .enumerate()
                        .map(|(i, spec)| CapabilityRule {
                            role,
                            index: i + 1,
                            matcher: default_matcher(&spec.pattern),
                            spec,
                        })
                        .collect(),
                };
                (role, set)
            })
            .collect();
        Self { sets }
    }
}

// Built-in patterns are all `<namespace>/**`.
fn default_matcher(pattern: &str) -> Matcher {
    match pattern.strip_suffix("/**").map(str::parse::<LogicalPath>) {
        Some(Ok(prefix)) => Matcher::Prefix(prefix),
        _ => Matcher::Everything,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn p(s: &str) -> LogicalPath {
        s.parse().unwrap()
    }

    #[test]
    fn default_table_is_valid() {
        let table = CapabilityTable::default();
        table.validate().unwrap();
        let toml = table.to_toml_string().unwrap();
        let reloaded = CapabilityTable::from_toml_str(&toml).unwrap();
        assert_eq!(reloaded.to_specs(), table.to_specs());
    }

    #[test]
    fn deny_wins_over_allow() {
        let set = CapabilitySet::compile(
            Role::IsolatedProducerA,
            vec![
                RuleSpec::allow(Namespace::Tests, "**", Access::ReadWrite),
                RuleSpec::deny(Namespace::Implementation, "implementation/**", Access::ReadWrite),
            ],
        )
        .unwrap();
        assert!(matches!(
            set.evaluate(&p("implementation/x"), Action::Read),
            Evaluation::Denied(rule) if rule.index() == 2
        ));
        assert!(matches!(
            set.evaluate(&p("tests/x"), Action::Write),
            Evaluation::Allowed(rule) if rule.index() == 1
        ));
    }

    #[test]
    fn unmatched_paths_are_unmatched() {
        let table = CapabilityTable::default();
        let set = table.set(Role::IsolatedProducerA);
        assert!(matches!(set.evaluate(&p("scratch/x"), Action::Read), Evaluation::Unmatched));
        // documents are read-only for producers
        assert!(matches!(
            set.evaluate(&p("documents/a.md"), Action::Write),
            Evaluation::Unmatched
        ));
    }

    #[test]
    fn prefix_patterns_are_segment_aware() {
        let set = CapabilitySet::compile(
            Role::Collector,
            vec![RuleSpec::allow(Namespace::Documents, "documents/**", Access::ReadWrite)],
        )
        .unwrap();
        assert!(matches!(set.evaluate(&p("documents/a/b.md"), Action::Read), Evaluation::Allowed(_)));
        assert!(matches!(set.evaluate(&p("documentsx/a"), Action::Read), Evaluation::Unmatched));
    }

    #[test]
    fn glob_star_stays_in_one_segment() {
        let set = CapabilitySet::compile(
            Role::IsolatedProducerB,
            vec![RuleSpec::allow(Namespace::Implementation, "rules/*.param", Access::ReadWrite)],
        )
        .unwrap();
        assert!(matches!(set.evaluate(&p("rules/liheap.param"), Action::Write), Evaluation::Allowed(_)));
        assert!(matches!(set.evaluate(&p("rules/x/liheap.param"), Action::Write), Evaluation::Unmatched));
    }

    #[test]
    fn invalid_glob_is_rejected_with_rule_position() {
        let err = CapabilitySet::compile(
            Role::Collector,
            vec![
                RuleSpec::allow(Namespace::Documents, "documents/**", Access::ReadWrite),
                RuleSpec::allow(Namespace::Documents, "docs/[", Access::ReadWrite),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { index: 2, .. }));
    }

    #[test]
    fn producer_reading_sibling_kind_is_rejected() {
        let toml = r#"
            [[roles.isolated_producer_a]]
            namespace = "tests"
            pattern = "tests/**"
            effect = "allow"

            [[roles.isolated_producer_a]]
            namespace = "implementation"
            pattern = "implementation/**"
            effect = "allow"
            access = "read"

            [[roles.reviewer]]
            namespace = "documents"
            pattern = "documents/**"
            effect = "allow"
            access = "read"
            [[roles.reviewer]]
            namespace = "tests"
            pattern = "tests/**"
            effect = "allow"
            access = "read"
            [[roles.reviewer]]
            namespace = "implementation"
            pattern = "implementation/**"
            effect = "allow"
            access = "read"
            [[roles.reviewer]]
            namespace = "review"
            pattern = "review/**"
            effect = "allow"
        "#;
        let err = CapabilityTable::from_toml_str(toml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::IsolationInvariant { role: Role::IsolatedProducerA, .. }
        ));
    }

    #[test]
    fn allow_rule_matching_another_namespace_is_rejected() {
        let mut specs = CapabilityTable::default().to_specs();
        specs.insert(
            Role::IsolatedProducerA,
            vec![
                RuleSpec::allow(Namespace::Documents, "documents/**", Access::Read),
                RuleSpec::allow(Namespace::Tests, "**", Access::ReadWrite),
            ],
        );
        let err = CapabilityTable::from_specs(specs).unwrap_err();
        match err {
            ConfigError::IsolationInvariant { role, message } => {
                assert_eq!(role, Role::IsolatedProducerA);
                assert!(message.contains("documents/"), "{message}");
            }
            other => panic!("expected isolation error, got {other:?}"),
        }
    }

    #[test]
    fn foreign_namespaces_follow_pattern_coverage() {
        let foreign = |ns: Namespace, pattern: &str| {
            let set = CapabilitySet::compile(
                Role::IsolatedProducerA,
                vec![RuleSpec::allow(ns, pattern, Access::ReadWrite)],
            )
            .unwrap();
            set.rules()[0].foreign_namespaces().collect::<Vec<_>>()
        };
        assert!(foreign(Namespace::Tests, "tests/**").is_empty());
        assert!(foreign(Namespace::Tests, "rules/**").is_empty());
        assert!(foreign(Namespace::Tests, "*.yaml").is_empty());
        assert_eq!(foreign(Namespace::Tests, "implementation/**"), vec![Namespace::Implementation]);
        assert_eq!(
            foreign(Namespace::Tests, "im*/*.param"),
            vec![Namespace::Implementation]
        );
        assert_eq!(
            foreign(Namespace::Tests, "*/cases/*"),
            vec![Namespace::Documents, Namespace::Implementation, Namespace::Review]
        );
        assert_eq!(foreign(Namespace::Review, "**").len(), 3);
    }

    #[test]
    fn only_reviewer_reads_everything() {
        let mut specs = CapabilityTable::default().to_specs();
        specs.insert(
            Role::Supervisor,
            Namespace::ALL
                .into_iter()
                .map(|ns| RuleSpec::allow(ns, format!("{ns}/**"), Access::Read))
                .collect(),
        );
        let err = CapabilityTable::from_specs(specs).unwrap_err();
        assert!(matches!(err, ConfigError::IsolationInvariant { role: Role::Supervisor, .. }));
    }

    #[test]
    fn yaml_tables_load() {
        let yaml = r"
roles:
  collector:
    - { namespace: documents, pattern: 'documents/**', effect: allow }
  reviewer:
    - { namespace: documents, pattern: 'documents/**', effect: allow, access: read }
    - { namespace: tests, pattern: 'tests/*.yaml', effect: allow, access: read }
    - { namespace: implementation, pattern: 'implementation/**', effect: allow, access: read }
    - { namespace: review, pattern: 'review/**', effect: allow }
";
        let table = CapabilityTable::from_yaml_str(yaml).unwrap();
        assert_eq!(table.set(Role::Collector).rules().len(), 1);
        // roles left out of the file get no rules
        assert!(table.set(Role::IsolatedProducerB).rules().is_empty());
    }

    #[test]
    fn rule_display_names_role_and_pattern() {
        let table = CapabilityTable::default();
        let rule = &table.set(Role::IsolatedProducerA).rules()[2];
        assert_eq!(
            rule.to_string(),
            "isolated_producer_a#3 deny read_write implementation:implementation/**"
        );
    }
}
