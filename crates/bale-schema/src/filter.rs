//! Component selection by name patterns, groups, and platform clauses.
//!
//! A filter expression is a comma-separated list of shell-style globs over
//! component names. A trailing `-` turns a pattern into an exclusion, and
//! exclusions are checked before inclusions.

use crate::manifest::Component;
use crate::SchemaError;
use glob::{MatchOptions, Pattern};
use std::collections::{HashMap, HashSet};

/// Maximum edit distance for a component name to be suggested when a
/// requested pattern matches nothing.
const SUGGESTION_DISTANCE: usize = 5;

/// Path-style matching: wildcards never cross a `/`.
const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectState {
    Included,
    Excluded,
    Unknown,
}

#[derive(Debug, Clone)]
struct Request {
    raw: String,
    pattern: Pattern,
    exclude: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ComponentFilter {
    requests: Vec<Request>,
    architecture: String,
    flavor: String,
    os: String,
}

/// True when the component's arch and flavor clauses admit the given platform.
/// Empty clauses admit everything.
pub fn compatible(component: &Component, arch: &str, flavor: &str) -> bool {
    let only = &component.only;
    let arch_ok = only.cluster.architecture.is_empty() || only.cluster.architecture == arch;
    let flavor_ok = only.flavor.is_empty() || only.flavor == flavor;
    arch_ok && flavor_ok
}

impl ComponentFilter {
    /// A filter that selects every component.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a comma-separated pattern list. Blank entries are ignored.
    pub fn parse(expr: &str) -> Result<Self, SchemaError> {
        Self::from_patterns(expr.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut requests = Vec::new();
        for raw in patterns {
            let raw = raw.as_ref();
            let (body, exclude) = match raw.strip_suffix('-') {
                Some(body) => (body, true),
                None => (raw, false),
            };
            let pattern = Pattern::new(body).map_err(|e| SchemaError::InvalidPattern {
                pattern: raw.to_owned(),
                reason: e.to_string(),
            })?;
            requests.push(Request {
                raw: raw.to_owned(),
                pattern,
                exclude,
            });
        }
        Ok(Self {
            requests,
            ..Self::default()
        })
    }

    /// Restrict selection to components whose `only` clauses admit this platform.
    #[must_use]
    pub fn with_platform(mut self, arch: &str, flavor: &str) -> Self {
        arch.clone_into(&mut self.architecture);
        flavor.clone_into(&mut self.flavor);
        self
    }

    /// Restrict selection to components whose `only.localOS` admits this OS.
    #[must_use]
    pub fn with_os(mut self, os: &str) -> Self {
        os.clone_into(&mut self.os);
        self
    }

    /// True when no name patterns were given.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.requests.iter().map(|r| r.raw.as_str())
    }

    /// Classify a component name against the requested patterns, returning the
    /// pattern that decided it.
    pub fn state(&self, name: &str) -> (SelectState, Option<&str>) {
        for r in self.requests.iter().filter(|r| r.exclude) {
            if r.pattern.matches_with(name, PATH_MATCH) {
                return (SelectState::Excluded, Some(&r.raw));
            }
        }
        for r in self.requests.iter().filter(|r| !r.exclude) {
            if r.pattern.matches_with(name, PATH_MATCH) {
                return (SelectState::Included, Some(&r.raw));
            }
        }
        (SelectState::Unknown, None)
    }

    fn admits_platform(&self, c: &Component) -> bool {
        let only = &c.only;
        let arch_ok = self.architecture.is_empty()
            || only.cluster.architecture.is_empty()
            || only.cluster.architecture == self.architecture;
        let flavor_ok =
            self.flavor.is_empty() || only.flavor.is_empty() || only.flavor == self.flavor;
        let os_ok = self.os.is_empty() || only.local_os.is_empty() || only.local_os == self.os;
        arch_ok && flavor_ok && os_ok
    }

    /// Select components in package order.
    ///
    /// With no patterns every platform-compatible component is selected. With
    /// patterns, required components are always selected, at most one member of
    /// a group may be selected, and a group with no explicit selection falls
    /// back to its default member.
    pub fn select<'a>(&self, components: &'a [Component]) -> Result<Vec<&'a Component>, SchemaError> {
        let candidates: Vec<&Component> = components
            .iter()
            .filter(|c| self.admits_platform(c))
            .collect();
        if self.is_empty() {
            return Ok(candidates);
        }

        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<&Component>> = HashMap::new();
        for &c in &candidates {
            let key = if c.group.is_empty() {
                c.name.as_str()
            } else {
                c.group.as_str()
            };
            if !groups.contains_key(key) {
                order.push(key);
            }
            groups.entry(key).or_default().push(c);
        }

        let mut selected = Vec::new();
        let mut matched: HashSet<&str> = HashSet::new();

        for key in order {
            let members = groups.get(key).map(Vec::as_slice).unwrap_or_default();
            let mut group_default: Option<&Component> = None;
            let mut group_selected: Option<&Component> = None;

            for &c in members {
                let (mut state, request) = self.state(&c.name);
                if c.required {
                    state = SelectState::Included;
                } else if state == SelectState::Excluded {
                    if let Some(r) = request {
                        matched.insert(r);
                    }
                    continue;
                } else if state == SelectState::Unknown && c.default && group_default.is_none() {
                    group_default = Some(c);
                }

                if state == SelectState::Included {
                    if let Some(r) = request {
                        matched.insert(r);
                    }
                    if let Some(prev) = group_selected {
                        return Err(SchemaError::MultipleInGroup {
                            group: c.group.clone(),
                            first: prev.name.clone(),
                            second: c.name.clone(),
                        });
                    }
                    selected.push(c);
                    group_selected = Some(c);
                }
            }

            match (group_selected, group_default) {
                (None, Some(d)) => selected.push(d),
                (None, None) if members.len() > 1 => {
                    return Err(SchemaError::NoGroupSelection(
                        members
                            .iter()
                            .map(|c| c.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    ));
                }
                _ => {}
            }
        }

        for r in &self.requests {
            if !matched.contains(r.raw.as_str()) {
                let near: Vec<&str> = components
                    .iter()
                    .filter(|c| edit_distance(&c.name, &r.raw) <= SUGGESTION_DISTANCE)
                    .map(|c| c.name.as_str())
                    .collect();
                return Err(SchemaError::UnmatchedComponent {
                    request: r.raw.clone(),
                    near: near.join(", "),
                });
            }
        }

        // Keep package order regardless of group bookkeeping.
        let picked: HashSet<&str> = selected.iter().map(|c| c.name.as_str()).collect();
        Ok(candidates
            .into_iter()
            .filter(|c| picked.contains(c.name.as_str()))
            .collect())
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}
