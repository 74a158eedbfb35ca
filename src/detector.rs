//! Layered technology detection.
//!
//! Each [`DetectionLayer`] is an independent probe that reports
//! [`Evidence`] per signal. Layers run in [`DetectionLayer::ORDER`]; a layer
//! is skipped when every signal it can decide is already present, and a
//! present signal is never downgraded by a later layer.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::manifest::PackageManifest;
use crate::models::{RepositoryCandidate, TechnologySignals};

/// Directories below a scan root are followed while their depth is below this.
const MAX_SCAN_DEPTH: u32 = 3;

/// Upper bound on files opened by one source scan.
const DEFAULT_MAX_SCAN_FILES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
}

/// Read-only access to a repository's metadata and files.
///
/// `Ok(None)` means the resource does not exist.
#[async_trait]
pub trait RepoInspector: Send + Sync {
    async fn languages(&self, owner: &str, name: &str) -> Result<Option<HashMap<String, u64>>>;
    async fn topics(&self, owner: &str, name: &str) -> Result<Vec<String>>;
    async fn file_text(&self, owner: &str, name: &str, path: &str) -> Result<Option<String>>;
    async fn list_dir(&self, owner: &str, name: &str, path: &str) -> Result<Option<Vec<DirEntry>>>;
    async fn readme(&self, owner: &str, name: &str) -> Result<Option<String>>;
}

/// The language, framework and test tooling a run is looking for.
#[derive(Debug, Clone)]
pub struct TechnologyProfile {
    /// Key in the language byte-count breakdown.
    pub language: String,
    pub language_packages: Vec<String>,
    pub language_config_files: Vec<String>,
    /// Canonical framework name, also matched against topic tags.
    pub framework: String,
    pub framework_packages: Vec<String>,
    /// Test runner binary name, matched inside `scripts` commands.
    pub test_runner: String,
    pub test_runner_packages: Vec<String>,
    pub test_runner_config_files: Vec<String>,
    /// Test helpers worth reporting in the output.
    pub test_utility_packages: Vec<String>,
    /// Packages that render framework components under test.
    pub frontend_test_packages: Vec<String>,
    pub frontend_test_package_prefixes: Vec<String>,
    /// Module a test file imports to render components.
    pub testing_entry_point: String,
    /// Older enzyme-style usage markers.
    pub legacy_test_markers: Vec<String>,
    pub scan_directories: Vec<String>,
    pub test_file_markers: Vec<String>,
    pub test_file_extensions: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for TechnologyProfile {
    fn default() -> Self {
        Self {
            language: "TypeScript".to_string(),
            language_packages: strings(&["typescript"]),
            language_config_files: strings(&["tsconfig.json", "tsconfig.base.json", "tsconfig.app.json"]),
            framework: "react".to_string(),
            framework_packages: strings(&["react", "react-dom"]),
            test_runner: "jest".to_string(),
            test_runner_packages: strings(&[
                "jest",
                "ts-jest",
                "babel-jest",
                "@types/jest",
                "jest-environment-jsdom",
            ]),
            test_runner_config_files: strings(&[
                "jest.config.js",
                "jest.config.ts",
                "jest.config.mjs",
                "jest.config.cjs",
                "jest.config.json",
            ]),
            test_utility_packages: strings(&[
                "@testing-library/react",
                "@testing-library/jest-dom",
                "@testing-library/user-event",
                "@testing-library/react-hooks",
                "enzyme",
                "react-test-renderer",
            ]),
            frontend_test_packages: strings(&[
                "@testing-library/react",
                "@testing-library/react-hooks",
                "enzyme",
                "react-test-renderer",
            ]),
            frontend_test_package_prefixes: strings(&["enzyme-adapter-", "@wojtekmaj/enzyme-adapter-"]),
            testing_entry_point: "@testing-library/react".to_string(),
            legacy_test_markers: strings(&["enzyme", "shallow", "mount"]),
            scan_directories: strings(&["src", "test", "tests", "__tests__", "app", "components"]),
            test_file_markers: strings(&[".test.", ".spec."]),
            test_file_extensions: strings(&["ts", "tsx", "js", "jsx"]),
        }
    }
}

impl TechnologyProfile {
    fn has_frontend_prefix(&self, package: &str) -> bool {
        self.frontend_test_package_prefixes
            .iter()
            .any(|p| package.starts_with(p.as_str()))
    }

    pub fn is_test_utility(&self, package: &str) -> bool {
        self.test_utility_packages.iter().any(|p| p == package) || self.has_frontend_prefix(package)
    }

    pub fn is_frontend_test_package(&self, package: &str) -> bool {
        self.frontend_test_packages.iter().any(|p| p == package) || self.has_frontend_prefix(package)
    }

    pub fn is_test_file(&self, file_name: &str) -> bool {
        let Some((_, extension)) = file_name.rsplit_once('.') else {
            return false;
        };
        self.test_file_extensions.iter().any(|e| e == extension)
            && self
                .test_file_markers
                .iter()
                .any(|m| file_name.contains(m.as_str()))
    }

    /// Does test source `text` render framework components? The runner is
    /// already established when this is asked, so its `expect` assertions are
    /// taken as given and only the rendering side is checked.
    pub fn mentions_frontend_testing(&self, text: &str) -> bool {
        let entry = &self.testing_entry_point;
        let imports_entry = text.contains(&format!("'{}'", entry))
            || text.contains(&format!("\"{}\"", entry))
            || text.contains(&format!("`{}`", entry));
        imports_entry
            || self
                .legacy_test_markers
                .iter()
                .any(|m| text.contains(m.as_str()))
    }
}

/// Three-valued outcome of one probe for one signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Evidence {
    Present,
    Absent,
    #[default]
    Unknown,
}

impl Evidence {
    pub fn from_bool(found: bool) -> Self {
        if found {
            Evidence::Present
        } else {
            Evidence::Absent
        }
    }

    pub fn is_present(self) -> bool {
        self == Evidence::Present
    }
}

/// What one layer found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub language: Evidence,
    pub framework: Evidence,
    pub test_runner: Evidence,
    pub frontend_test_library: Evidence,
    pub framework_dependency: bool,
    pub test_libraries: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionLayer {
    Languages,
    Manifest,
    Topics,
    ConfigFiles,
    SourceScan,
}

impl DetectionLayer {
    pub const ORDER: [DetectionLayer; 5] = [
        DetectionLayer::Languages,
        DetectionLayer::Manifest,
        DetectionLayer::Topics,
        DetectionLayer::ConfigFiles,
        DetectionLayer::SourceScan,
    ];

    /// Whether this layer could still change `signals`.
    pub fn is_needed(self, signals: &TechnologySignals) -> bool {
        match self {
            DetectionLayer::Languages => !signals.language,
            DetectionLayer::Manifest => {
                !(signals.language
                    && signals.framework
                    && signals.test_runner
                    && signals.frontend_test_library)
            }
            DetectionLayer::Topics => !signals.framework,
            DetectionLayer::ConfigFiles => !signals.language || !signals.test_runner,
            DetectionLayer::SourceScan => {
                signals.framework
                    && signals.test_runner
                    && signals.test_libraries.is_empty()
                    && !signals.frontend_test_library
            }
        }
    }
}

impl fmt::Display for DetectionLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionLayer::Languages => "languages",
            DetectionLayer::Manifest => "manifest",
            DetectionLayer::Topics => "topics",
            DetectionLayer::ConfigFiles => "config-files",
            DetectionLayer::SourceScan => "source-scan",
        };
        f.write_str(name)
    }
}

/// OR `findings` into `signals`, recording which layer set what.
pub fn absorb(signals: &mut TechnologySignals, layer: DetectionLayer, findings: Findings) {
    let updates = [
        (&mut signals.language, findings.language, "language"),
        (&mut signals.framework, findings.framework, "framework"),
        (&mut signals.test_runner, findings.test_runner, "test-runner"),
        (
            &mut signals.frontend_test_library,
            findings.frontend_test_library,
            "frontend-test-library",
        ),
    ];

    let mut notes = Vec::new();
    for (flag, evidence, label) in updates {
        if evidence.is_present() && !*flag {
            *flag = true;
            notes.push(format!("{} via {}", label, layer));
        }
    }
    signals.evidence.extend(notes);

    signals.framework_dependency |= findings.framework_dependency;
    for library in findings.test_libraries {
        if !signals.test_libraries.contains(&library) {
            signals.test_libraries.push(library);
        }
    }
}

/// Per-repository state shared between layers.
struct ProbeContext<'a, R: ?Sized> {
    inspector: &'a R,
    candidate: &'a RepositoryCandidate,
    root: Option<Vec<DirEntry>>,
}

impl<'a, R: RepoInspector + ?Sized> ProbeContext<'a, R> {
    fn owner(&self) -> &str {
        &self.candidate.owner
    }

    fn name(&self) -> &str {
        &self.candidate.name
    }

    /// Root directory listing, fetched at most once.
    async fn root(&mut self) -> &[DirEntry] {
        if self.root.is_none() {
            let entries = match self
                .inspector
                .list_dir(&self.candidate.owner, &self.candidate.name, "")
                .await
            {
                Ok(entries) => entries.unwrap_or_default(),
                Err(e) => {
                    warn!(
                        "Could not list root of {}: {}",
                        self.candidate.full_name(),
                        e
                    );
                    Vec::new()
                }
            };
            self.root = Some(entries);
        }
        self.root.as_deref().unwrap_or_default()
    }
}

/// Decides which technologies a repository uses. Never fails: probe errors
/// are logged and leave the affected signals unknown.
#[derive(Debug, Clone)]
pub struct TechnologyDetector {
    profile: TechnologyProfile,
    max_scan_files: usize,
}

impl Default for TechnologyDetector {
    fn default() -> Self {
        Self::new(TechnologyProfile::default())
    }
}

impl TechnologyDetector {
    pub fn new(profile: TechnologyProfile) -> Self {
        Self {
            profile,
            max_scan_files: DEFAULT_MAX_SCAN_FILES,
        }
    }

    pub fn with_max_scan_files(mut self, max: usize) -> Self {
        self.max_scan_files = max;
        self
    }

    pub fn profile(&self) -> &TechnologyProfile {
        &self.profile
    }

    pub async fn detect<R>(&self, inspector: &R, candidate: &RepositoryCandidate) -> TechnologySignals
    where
        R: RepoInspector + ?Sized,
    {
        let mut ctx = ProbeContext {
            inspector,
            candidate,
            root: None,
        };
        let mut signals = TechnologySignals::default();

        for layer in DetectionLayer::ORDER {
            if !layer.is_needed(&signals) {
                continue;
            }
            let findings = self.probe(layer, &mut ctx).await;
            absorb(&mut signals, layer, findings);
        }

        debug!(
            "{}: language={} framework={} runner={} frontend={} [{}]",
            candidate.full_name(),
            signals.language,
            signals.framework,
            signals.test_runner,
            signals.frontend_test_library,
            signals.evidence.join(", ")
        );
        signals
    }

    async fn probe<R>(&self, layer: DetectionLayer, ctx: &mut ProbeContext<'_, R>) -> Findings
    where
        R: RepoInspector + ?Sized,
    {
        match layer {
            DetectionLayer::Languages => self.probe_languages(ctx).await,
            DetectionLayer::Manifest => self.probe_manifest(ctx).await,
            DetectionLayer::Topics => self.probe_topics(ctx).await,
            DetectionLayer::ConfigFiles => self.probe_config_files(ctx).await,
            DetectionLayer::SourceScan => self.probe_sources(ctx).await,
        }
    }

    async fn probe_languages<R>(&self, ctx: &mut ProbeContext<'_, R>) -> Findings
    where
        R: RepoInspector + ?Sized,
    {
        let language = match ctx.inspector.languages(ctx.owner(), ctx.name()).await {
            Ok(Some(breakdown)) => Evidence::from_bool(
                breakdown
                    .iter()
                    .any(|(lang, bytes)| lang.eq_ignore_ascii_case(&self.profile.language) && *bytes > 0),
            ),
            Ok(None) => Evidence::Unknown,
            Err(e) => {
                warn!("Language lookup failed for {}: {}", ctx.candidate.full_name(), e);
                Evidence::Unknown
            }
        };
        Findings {
            language,
            ..Default::default()
        }
    }

    async fn probe_manifest<R>(&self, ctx: &mut ProbeContext<'_, R>) -> Findings
    where
        R: RepoInspector + ?Sized,
    {
        let text = match ctx
            .inspector
            .file_text(ctx.owner(), ctx.name(), "package.json")
            .await
        {
            Ok(Some(text)) => text,
            Ok(None) => return Findings::default(),
            Err(e) => {
                warn!("Could not fetch package.json for {}: {}", ctx.candidate.full_name(), e);
                return Findings::default();
            }
        };

        let manifest = match PackageManifest::parse(&text) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Malformed package.json in {}: {}", ctx.candidate.full_name(), e);
                return Findings::default();
            }
        };

        let profile = &self.profile;
        let framework = manifest.has_any_dependency(&profile.framework_packages);
        Findings {
            language: Evidence::from_bool(manifest.has_any_dependency(&profile.language_packages)),
            framework: Evidence::from_bool(framework),
            test_runner: Evidence::from_bool(
                manifest.has_any_dependency(&profile.test_runner_packages)
                    || manifest.script_invokes(&profile.test_runner),
            ),
            frontend_test_library: Evidence::from_bool(
                manifest
                    .dependencies
                    .iter()
                    .any(|d| profile.is_frontend_test_package(&d.name)),
            ),
            framework_dependency: framework,
            test_libraries: manifest
                .dependencies
                .iter()
                .filter(|d| profile.is_test_utility(&d.name))
                .map(|d| d.name.clone())
                .collect(),
        }
    }

    async fn probe_topics<R>(&self, ctx: &mut ProbeContext<'_, R>) -> Findings
    where
        R: RepoInspector + ?Sized,
    {
        let fetched;
        let topics: &[String] = if ctx.candidate.topics.is_empty() {
            fetched = match ctx.inspector.topics(ctx.owner(), ctx.name()).await {
                Ok(topics) => topics,
                Err(e) => {
                    warn!("Topic lookup failed for {}: {}", ctx.candidate.full_name(), e);
                    return Findings::default();
                }
            };
            &fetched
        } else {
            &ctx.candidate.topics
        };

        Findings {
            framework: Evidence::from_bool(
                topics
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&self.profile.framework)),
            ),
            ..Default::default()
        }
    }

    async fn probe_config_files<R>(&self, ctx: &mut ProbeContext<'_, R>) -> Findings
    where
        R: RepoInspector + ?Sized,
    {
        let root = ctx.root().await;
        let present = |names: &[String]| {
            root.iter()
                .any(|e| e.kind == EntryKind::File && names.contains(&e.name))
        };

        Findings {
            language: Evidence::from_bool(present(&self.profile.language_config_files)),
            test_runner: Evidence::from_bool(present(&self.profile.test_runner_config_files)),
            ..Default::default()
        }
    }

    async fn probe_sources<R>(&self, ctx: &mut ProbeContext<'_, R>) -> Findings
    where
        R: RepoInspector + ?Sized,
    {
        let mut queue: VecDeque<(String, u32)> = ctx
            .root()
            .await
            .iter()
            .filter(|e| e.kind == EntryKind::Dir && self.profile.scan_directories.contains(&e.name))
            .map(|e| (e.path.clone(), 0))
            .collect();
        let mut opened = 0usize;

        // Breadth-first walk of the scan directories
        while let Some((dir, depth)) = queue.pop_front() {
            let entries = match ctx.inspector.list_dir(ctx.owner(), ctx.name(), &dir).await {
                Ok(Some(entries)) => entries,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Could not list {} in {}: {}", dir, ctx.candidate.full_name(), e);
                    continue;
                }
            };

            for entry in entries {
                match entry.kind {
                    EntryKind::Dir if depth + 1 < MAX_SCAN_DEPTH => {
                        queue.push_back((entry.path, depth + 1));
                    }
                    EntryKind::File if self.profile.is_test_file(&entry.name) => {
                        // Budget spent: give up without a verdict
                        if opened >= self.max_scan_files {
                            debug!("Scan budget spent for {}", ctx.candidate.full_name());
                            return Findings::default();
                        }
                        opened += 1;

                        match ctx.inspector.file_text(ctx.owner(), ctx.name(), &entry.path).await {
                            Ok(Some(text)) if self.profile.mentions_frontend_testing(&text) => {
                                debug!("Frontend test usage found in {}", entry.path);
                                return Findings {
                                    frontend_test_library: Evidence::Present,
                                    ..Default::default()
                                };
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Could not read {}: {}", entry.path, e),
                        }
                    }
                    _ => {}
                }
            }
        }

        // Every test file in reach was read and none renders components
        Findings {
            frontend_test_library: Evidence::Absent,
            ..Default::default()
        }
    }
}
