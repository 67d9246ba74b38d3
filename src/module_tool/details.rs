//! `module.properties` parsing: version numbers, module details and dependency ranges.

use super::ModuleError;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const PROP_ID: &str = "module.id";
pub const PROP_VERSION: &str = "module.version";
pub const PROP_TITLE: &str = "module.title";
pub const PROP_DESCRIPTION: &str = "module.description";
pub const PROP_REPO_VERSION_MIN: &str = "module.repo.version.min";
pub const PROP_REPO_VERSION_MAX: &str = "module.repo.version.max";
pub const PROP_EDITIONS: &str = "module.editions";
pub const PROP_ALIASES: &str = "module.aliases";
pub const PROP_DEPENDS_PREFIX: &str = "module.depends.";

pub const DEFAULT_REPO_VERSION_MIN: &str = "0";
pub const DEFAULT_REPO_VERSION_MAX: &str = "999.999.999";

/// Parse Java-style `.properties` text: `key=value`, `key: value` or `key value`, `#`/`!`
/// comments, and trailing-backslash continuation lines.
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut logical = String::new();
    for raw in text.lines() {
        let line = if logical.is_empty() { raw.trim() } else { raw.trim_start() };
        if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            logical.push_str(stripped);
            continue;
        }
        logical.push_str(line);
        insert_property(&mut out, &logical);
        logical.clear();
    }
    if !logical.is_empty() {
        insert_property(&mut out, &logical);
    }
    out
}

fn insert_property(out: &mut HashMap<String, String>, line: &str) {
    let split_at = line.find(|c: char| c == '=' || c == ':' || c.is_whitespace());
    let (key, value) = match split_at {
        Some(i) => {
            let rest = line[i..].trim_start();
            let rest = rest
                .strip_prefix('=')
                .or_else(|| rest.strip_prefix(':'))
                .unwrap_or(rest);
            (&line[..i], rest.trim())
        }
        None => (line, ""),
    };
    out.insert(key.trim().to_string(), value.to_string());
}

/// Dotted numeric version. Trailing zero components are insignificant: `1.2` == `1.2.0`.
#[derive(Clone, Debug)]
pub struct VersionNumber {
    raw: String,
    parts: Vec<u64>,
}

impl VersionNumber {
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }
}

impl FromStr for VersionNumber {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let mut parts = raw
            .split('.')
            .map(|p| {
                if p.is_empty() {
                    Ok(0)
                } else {
                    p.parse::<u64>()
                        .map_err(|_| ModuleError::InvalidVersion(s.to_string()))
                }
            })
            .collect::<Result<Vec<u64>, _>>()?;
        while parts.last() == Some(&0) {
            parts.pop();
        }
        Ok(VersionNumber {
            raw: raw.to_string(),
            parts,
        })
    }
}

impl PartialEq for VersionNumber {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for VersionNumber {}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionRange {
    pub lower: Option<VersionNumber>,
    pub upper: Option<VersionNumber>,
}

impl VersionRange {
    pub fn contains(&self, version: &VersionNumber) -> bool {
        self.lower.as_ref().map_or(true, |l| version >= l) && self.upper.as_ref().map_or(true, |u| version <= u)
    }
}

fn bound(raw: &str) -> Result<Option<VersionNumber>, ModuleError> {
    match raw.trim() {
        "" | "*" => Ok(None),
        v => v.parse().map(Some),
    }
}

/// A `module.depends.<id>` entry. Ranges: `*`, `1.0-2.0`, `1.0-`, `-2.0`, `1.0`, or a comma list
/// of those (any match satisfies the dependency).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleDependency {
    pub dependency_id: String,
    pub ranges: Vec<VersionRange>,
    raw: String,
}

impl ModuleDependency {
    pub fn parse(dependency_id: &str, raw: &str) -> Result<Self, ModuleError> {
        let mut ranges = Vec::new();
        for part in raw.split(',').map(str::trim) {
            let range = match part.split_once('-') {
                Some((lower, upper)) => VersionRange {
                    lower: bound(lower)?,
                    upper: bound(upper)?,
                },
                None => {
                    let exact = bound(part)?;
                    VersionRange {
                        lower: exact.clone(),
                        upper: exact,
                    }
                }
            };
            ranges.push(range);
        }
        Ok(ModuleDependency {
            dependency_id: dependency_id.to_string(),
            ranges,
            raw: raw.trim().to_string(),
        })
    }

    /// False when the dependency is not installed.
    pub fn is_valid_dependency(&self, installed: Option<&ModuleDetails>) -> bool {
        installed.is_some_and(|details| self.ranges.iter().any(|r| r.contains(&details.version)))
    }
}

impl fmt::Display for ModuleDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dependency_id, self.raw)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleDetails {
    pub id: String,
    pub version: VersionNumber,
    pub title: String,
    pub description: Option<String>,
    pub repo_version_min: VersionNumber,
    pub repo_version_max: VersionNumber,
    pub editions: Vec<String>,
    pub aliases: Vec<String>,
    pub dependencies: Vec<ModuleDependency>,
}

fn list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl ModuleDetails {
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ModuleError> {
        let get = |key: &str| props.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let id = get(PROP_ID).ok_or_else(|| ModuleError::InvalidProperties(format!("{} is required", PROP_ID)))?;
        let version = get(PROP_VERSION)
            .ok_or_else(|| ModuleError::InvalidProperties(format!("{} is required", PROP_VERSION)))?
            .parse()?;
        let mut dependencies = props
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(PROP_DEPENDS_PREFIX).map(|id| (id, v)))
            .map(|(id, v)| ModuleDependency::parse(id, v))
            .collect::<Result<Vec<_>, _>>()?;
        dependencies.sort_by(|a, b| a.dependency_id.cmp(&b.dependency_id));
        Ok(ModuleDetails {
            id: id.to_string(),
            version,
            title: get(PROP_TITLE).unwrap_or(id).to_string(),
            description: get(PROP_DESCRIPTION).map(String::from),
            repo_version_min: get(PROP_REPO_VERSION_MIN).unwrap_or(DEFAULT_REPO_VERSION_MIN).parse()?,
            repo_version_max: get(PROP_REPO_VERSION_MAX).unwrap_or(DEFAULT_REPO_VERSION_MAX).parse()?,
            editions: list(props.get(PROP_EDITIONS)),
            aliases: list(props.get(PROP_ALIASES)),
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionNumber {
        s.parse().unwrap()
    }

    #[test]
    fn trailing_zeros_are_ignored() {
        assert_eq!(v("1.2"), v("1.2.0.0"));
        assert!(v("1.10") > v("1.9.9"));
        assert!(v("4.2.0") < v("4.2.1"));
        assert!("4.2.c".parse::<VersionNumber>().is_err());
    }

    #[test]
    fn properties_support_separators_comments_and_continuations() {
        let props = parse_properties(
            "# comment\n! also\nmodule.id=org.example\nmodule.title : Example \\\n   Module\nmodule.aliases a,b\n\nempty=\n",
        );
        assert_eq!(props["module.id"], "org.example");
        assert_eq!(props["module.title"], "Example Module");
        assert_eq!(props["module.aliases"], "a,b");
        assert_eq!(props["empty"], "");
        assert_eq!(props.len(), 4);
    }

    #[test]
    fn details_apply_defaults() {
        let props = parse_properties("module.id=m\nmodule.version=1.0\nmodule.editions=Community, Enterprise\n");
        let details = ModuleDetails::from_properties(&props).unwrap();
        assert_eq!(details.title, "m");
        assert_eq!(details.repo_version_min, v("0"));
        assert_eq!(details.repo_version_max, v("999.999.999"));
        assert_eq!(details.editions, vec!["Community", "Enterprise"]);
        assert!(ModuleDetails::from_properties(&parse_properties("module.id=m\n")).is_err());
    }

    #[test]
    fn dependency_ranges() {
        let installed = |version: &str| ModuleDetails {
            id: "dep".into(),
            version: v(version),
            title: "dep".into(),
            description: None,
            repo_version_min: v("0"),
            repo_version_max: v("999"),
            editions: vec![],
            aliases: vec![],
            dependencies: vec![],
        };
        let check = |range: &str, version: &str| {
            ModuleDependency::parse("dep", range)
                .unwrap()
                .is_valid_dependency(Some(&installed(version)))
        };
        assert!(check("*", "0.1"));
        assert!(check("1.0-2.0", "2.0"));
        assert!(!check("1.0-2.0", "2.0.1"));
        assert!(check("1.5-", "7"));
        assert!(!check("-1.0", "1.1"));
        assert!(check("1.0", "1.0.0"));
        assert!(check("1.0-1.2, 3.0-", "3.1"));
        assert!(!check("1.0-1.2, 3.0-", "2.0"));
        assert!(!ModuleDependency::parse("dep", "*").unwrap().is_valid_dependency(None));
    }
}
