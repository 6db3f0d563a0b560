//! Finds MCP server packages among a `pyproject.toml`'s dependencies.
//!
//! Dependencies are read from `[project].dependencies`, every list under
//! `[project.optional-dependencies]` and `[tool.poetry.dependencies]`. A
//! dependency whose normalized name contains `mcp-server` is an MCP server
//! package; it is composable when the [`EmbeddedRegistry`] has a matching entry.

use std::{collections::BTreeMap, path::Path};

use tracing::{debug, warn};

use crate::{
    embedded::EmbeddedRegistry,
    error::{Error, Result},
};

pub const DEFAULT_MANIFEST: &str = "pyproject.toml";

/// One dependency line, reduced to what composition needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Normalized: lowercase, `_` and `.` folded to `-`.
    pub name: String,
    /// Set only for an exact `==` pin.
    pub version: Option<String>,
}

/// A dependency that resolved to a registered embedded package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredServer {
    pub package: String,
    pub version: Option<String>,
}

pub fn normalize_package_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(['_', '.'], "-")
}

pub fn is_mcp_server_package(name: &str) -> bool {
    normalize_package_name(name).contains("mcp-server")
}

/// Split a requirement such as `jupyter-mcp-server[extra]==1.0 ; python_version>"3.9"`.
pub fn parse_requirement(line: &str) -> Option<Dependency> {
    let requirement = line.split(';').next()?.trim();
    let end = requirement
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(requirement.len());
    let name = &requirement[..end];
    if name.is_empty() {
        return None;
    }
    let rest = requirement[end..].trim_start();
    let rest = match rest.strip_prefix('[') {
        Some(extras) => extras.split_once(']').map_or("", |(_, after)| after),
        None => rest,
    };
    let version = rest
        .trim()
        .strip_prefix("==")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.contains(','));
    Some(Dependency {
        name: normalize_package_name(name),
        version,
    })
}

fn poetry_version(entry: &toml::Value) -> Option<String> {
    let raw = match entry {
        toml::Value::String(s) => s.as_str(),
        toml::Value::Table(t) => t.get("version")?.as_str()?,
        _ => return None,
    };
    let raw = raw.trim();
    let exact = raw.strip_prefix("==").unwrap_or(raw);
    exact
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
        .then(|| exact.to_string())
}

/// Every dependency declared in the manifest text, deduplicated by name.
pub fn parse_manifest_dependencies(raw: &str) -> Result<Vec<Dependency>> {
    let table: toml::Table = toml::from_str(raw)
        .map_err(|e| Error::discovery(DEFAULT_MANIFEST, format!("invalid TOML: {e}")))?;

    let mut found: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut add = |dep: Dependency| {
        let slot = found.entry(dep.name).or_default();
        if slot.is_none() {
            *slot = dep.version;
        }
    };

    if let Some(project) = table.get("project").and_then(toml::Value::as_table) {
        let required = project.get("dependencies").and_then(toml::Value::as_array);
        let optional = project
            .get("optional-dependencies")
            .and_then(toml::Value::as_table)
            .into_iter()
            .flat_map(|groups| groups.values())
            .filter_map(toml::Value::as_array);
        for line in required.into_iter().chain(optional).flatten() {
            if let Some(dep) = line.as_str().and_then(parse_requirement) {
                add(dep);
            }
        }
    }

    if let Some(poetry) = table
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(toml::Value::as_table)
    {
        for (name, entry) in poetry {
            if name.eq_ignore_ascii_case("python") {
                continue;
            }
            add(Dependency {
                name: normalize_package_name(name),
                version: poetry_version(entry),
            });
        }
    }

    Ok(found
        .into_iter()
        .map(|(name, version)| Dependency { name, version })
        .collect())
}

/// MCP server dependencies of the manifest at `path`, keyed by normalized
/// name. Packages missing from `registry` are logged and skipped.
pub fn discover_from_manifest(
    path: &Path,
    registry: &EmbeddedRegistry,
) -> Result<BTreeMap<String, DiscoveredServer>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::discovery(path.display().to_string(), format!("cannot read manifest: {e}"))
    })?;
    let dependencies = parse_manifest_dependencies(&raw)?;
    debug!(path = %path.display(), count = dependencies.len(), "parsed manifest dependencies");

    let mut servers = BTreeMap::new();
    for dep in dependencies {
        if !is_mcp_server_package(&dep.name) {
            continue;
        }
        let Some(package) = registry
            .packages()
            .into_iter()
            .find(|p| normalize_package_name(p) == dep.name)
        else {
            warn!(package = %dep.name, "MCP server dependency has no embedded registration, skipping");
            continue;
        };
        servers.insert(dep.name, DiscoveredServer {
            package: package.to_string(),
            version: dep.version,
        });
    }
    Ok(servers)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::embedded::ServerDescriptor, rstest::rstest};

    #[rstest]
    #[case("jupyter-mcp-server", true)]
    #[case("earthdata_mcp_server", true)]
    #[case("mcp-server-example", true)]
    #[case("Some.MCP.Server", true)]
    #[case("requests", false)]
    #[case("mcp", false)]
    #[case("fastapi", false)]
    fn detects_mcp_server_packages(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_mcp_server_package(name), expected);
    }

    #[rstest]
    #[case("requests>=2.28.0", "requests", None)]
    #[case("jupyter-mcp-server==1.0.0", "jupyter-mcp-server", Some("1.0.0"))]
    #[case("Calc_MCP_Server[cli] == 0.3 ; python_version > '3.9'", "calc-mcp-server", Some("0.3"))]
    #[case("calc-mcp-server==1.0,!=1.0.1", "calc-mcp-server", None)]
    #[case("plain", "plain", None)]
    fn parses_requirements(
        #[case] line: &str,
        #[case] name: &str,
        #[case] version: Option<&str>,
    ) {
        let dep = parse_requirement(line).unwrap();
        assert_eq!(dep.name, name);
        assert_eq!(dep.version.as_deref(), version);
    }

    #[test]
    fn blank_requirement_is_skipped() {
        assert!(parse_requirement("  ").is_none());
        assert!(parse_requirement("; sys_platform == 'win32'").is_none());
    }

    #[test]
    fn collects_required_optional_and_poetry_dependencies() {
        let raw = r#"
            [project]
            dependencies = [
                "jupyter-mcp-server>=1.0.0",
                "earthdata-mcp-server==0.1.0",
                "requests>=2.28.0",
            ]

            [project.optional-dependencies]
            dev = ["pytest>=7.0.0", "ruff>=0.1.0"]

            [tool.poetry.dependencies]
            python = "^3.10"
            weather_mcp_server = { version = "2.1.0" }
        "#;
        let deps = parse_manifest_dependencies(raw).unwrap();
        let names: Vec<&str> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![
            "earthdata-mcp-server",
            "jupyter-mcp-server",
            "pytest",
            "requests",
            "ruff",
            "weather-mcp-server",
        ]);
        let weather = deps.iter().find(|d| d.name == "weather-mcp-server").unwrap();
        assert_eq!(weather.version.as_deref(), Some("2.1.0"));
    }

    #[test]
    fn manifest_without_dependencies_is_empty() {
        let raw = "[project]\nname = \"test-project\"\nversion = \"1.0.0\"\n";
        assert!(parse_manifest_dependencies(raw).unwrap().is_empty());
    }

    #[test]
    fn invalid_toml_is_a_discovery_error() {
        let err = parse_manifest_dependencies("[project").unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
    }

    #[test]
    fn only_registered_mcp_packages_are_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST);
        std::fs::write(
            &path,
            r#"
            [project]
            dependencies = [
                "calc_mcp_server==1.2.0",
                "unregistered-mcp-server",
                "requests",
            ]
            "#,
        )
        .unwrap();
        let registry = EmbeddedRegistry::new()
            .with("calc_mcp_server", ServerDescriptor::new)
            .with("requests", ServerDescriptor::new);

        let found = discover_from_manifest(&path, &registry).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["calc-mcp-server"], DiscoveredServer {
            package: "calc_mcp_server".into(),
            version: Some("1.2.0".into()),
        });
    }

    #[test]
    fn missing_manifest_is_a_discovery_error() {
        let err = discover_from_manifest(
            Path::new("/nonexistent/pyproject.toml"),
            &EmbeddedRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }));
    }
}
