use std::fmt;

/// A repository returned by a search query, not yet evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryCandidate {
    pub owner: String,
    pub name: String,
    pub stars: u64,
    pub description: Option<String>,
    pub topics: Vec<String>,
    pub url: String,
}

impl RepositoryCandidate {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let name = name.into();
        let url = format!("https://github.com/{}/{}", owner, name);
        Self {
            owner,
            name,
            stars: 0,
            description: None,
            topics: Vec::new(),
            url,
        }
    }

    /// Case-insensitive `owner/name` identity used for run-wide dedup.
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.name).to_lowercase()
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Technology facts derived for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TechnologySignals {
    pub language: bool,
    pub framework: bool,
    pub test_runner: bool,
    /// Stricter than `test_runner`: a framework-specific rendering test library.
    pub frontend_test_library: bool,
    /// The framework was found as a manifest dependency (not via topics).
    pub framework_dependency: bool,
    /// Recognized test-utility packages from the manifest: runtime before
    /// dev dependencies, each group sorted by name.
    pub test_libraries: Vec<String>,
    /// Human-readable notes on which layer set which signal.
    pub evidence: Vec<String>,
}

/// Which signals a candidate must carry to be written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualificationRule {
    /// language, framework, test runner and a frontend test library.
    #[default]
    Strict,
    /// language, framework and test runner.
    RunnerOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    Noise(String),
    MissingLanguage,
    MissingFramework,
    MissingTestRunner,
    MissingFrontendTestLibrary,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Noise(keyword) => write!(f, "noise (matched '{}')", keyword),
            RejectionReason::MissingLanguage => write!(f, "target language not detected"),
            RejectionReason::MissingFramework => write!(f, "UI framework not detected"),
            RejectionReason::MissingTestRunner => write!(f, "test runner not detected"),
            RejectionReason::MissingFrontendTestLibrary => {
                write!(f, "no frontend test library detected")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualificationDecision {
    Qualified,
    Rejected(RejectionReason),
}

impl QualificationDecision {
    /// Apply `rule` to `signals`. Language is checked first, so a candidate
    /// without it can never qualify.
    pub fn evaluate(signals: &TechnologySignals, rule: QualificationRule) -> Self {
        if !signals.language {
            return Self::Rejected(RejectionReason::MissingLanguage);
        }
        if !signals.framework {
            return Self::Rejected(RejectionReason::MissingFramework);
        }
        if !signals.test_runner {
            return Self::Rejected(RejectionReason::MissingTestRunner);
        }
        if rule == QualificationRule::Strict && !signals.frontend_test_library {
            return Self::Rejected(RejectionReason::MissingFrontendTestLibrary);
        }
        Self::Qualified
    }

    pub fn is_qualified(&self) -> bool {
        matches!(self, Self::Qualified)
    }
}

/// One CSV line for a qualifying repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub repository: String,
    pub url: String,
    pub stars: u64,
    pub language: bool,
    pub framework: bool,
    pub test_runner: bool,
    pub test_libraries: Vec<String>,
    pub framework_dependency: bool,
    pub frontend_test_library: bool,
}

impl OutputRow {
    pub fn from_signals(candidate: &RepositoryCandidate, signals: &TechnologySignals) -> Self {
        Self {
            repository: candidate.full_name(),
            url: candidate.url.clone(),
            stars: candidate.stars,
            language: signals.language,
            framework: signals.framework,
            test_runner: signals.test_runner,
            test_libraries: signals.test_libraries.clone(),
            framework_dependency: signals.framework_dependency,
            frontend_test_library: signals.frontend_test_library,
        }
    }
}

/// Quota information read from a single response's headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Unix timestamp (seconds) at which the quota window resets.
    pub reset: Option<i64>,
    /// Seconds from `Retry-After`, used by secondary limits.
    pub retry_after: Option<u64>,
}

impl RateLimitState {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Absolute time at which a retry is allowed, if the headers say.
    pub fn reset_at(&self, now: i64) -> Option<i64> {
        match (self.reset, self.retry_after) {
            (Some(reset), _) => Some(reset),
            (None, Some(after)) => Some(now + after as i64),
            (None, None) => None,
        }
    }
}
