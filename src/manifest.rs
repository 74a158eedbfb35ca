use serde_json::Value;

use crate::error::Result;

/// Where a dependency was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Runtime,
    Dev,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    pub kind: DependencyKind,
}

/// The parts of a `package.json` detection cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageManifest {
    pub dependencies: Vec<Dependency>,
    /// `(name, command)` pairs from `scripts`.
    pub scripts: Vec<(String, String)>,
}

impl PackageManifest {
    /// Parse `package.json` text. Only `dependencies`, `devDependencies` and
    /// `scripts` are read; everything else is ignored.
    pub fn parse(content: &str) -> Result<Self> {
        let package: Value = serde_json::from_str(content)?;
        let mut dependencies = Vec::new();

        for (section, kind) in [
            ("dependencies", DependencyKind::Runtime),
            ("devDependencies", DependencyKind::Dev),
        ] {
            if let Some(deps) = package.get(section).and_then(|v| v.as_object()) {
                for (name, value) in deps {
                    dependencies.push(Dependency {
                        name: name.clone(),
                        version: value.as_str().unwrap_or("*").to_string(),
                        kind,
                    });
                }
            }
        }

        let scripts = package
            .get("scripts")
            .and_then(|v| v.as_object())
            .map(|scripts| {
                scripts
                    .iter()
                    .filter_map(|(name, cmd)| cmd.as_str().map(|c| (name.clone(), c.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            dependencies,
            scripts,
        })
    }

    pub fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d.name == name)
    }

    pub fn has_any_dependency(&self, names: &[String]) -> bool {
        names.iter().any(|n| self.has_dependency(n))
    }

    /// True when any script command mentions `program`, e.g. `"test": "jest --ci"`.
    pub fn script_invokes(&self, program: &str) -> bool {
        self.scripts.iter().any(|(_, cmd)| cmd.contains(program))
    }
}
