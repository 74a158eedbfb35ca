//! Keyword heuristics for tutorial, course and template repositories.
//!
//! Deliberately coarse: a case-insensitive substring test. Expect false
//! positives ("learn" inside a product name) and misses.

/// README characters considered by the deep check.
pub const README_PREFIX_CHARS: usize = 2000;

const COURSE_KEYWORDS: &[&str] = &[
    "tutorial",
    "course",
    "bootcamp",
    "lesson",
    "learn",
    "learning",
    "workshop",
    "udemy",
    "coursera",
    "freecodecamp",
    "codecademy",
    "homework",
    "assignment",
    "exercise",
    "practice",
    "training",
    "100-days",
    "study",
];

const BOILERPLATE_KEYWORDS: &[&str] = &[
    "boilerplate",
    "template",
    "starter",
    "scaffold",
    "skeleton",
    "seed",
    "starter-kit",
    "create-react-app",
    "cra-template",
    "example",
    "demo",
    "sample",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseCategory {
    Course,
    Boilerplate,
    ExcludedTopic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseMatch {
    pub category: NoiseCategory,
    pub keyword: String,
}

#[derive(Debug, Clone)]
pub struct NoiseFilter {
    course: Vec<String>,
    boilerplate: Vec<String>,
    excluded_topics: Vec<String>,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(&[], &[], &[])
    }
}

fn normalized(words: &[String]) -> impl Iterator<Item = String> + '_ {
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
}

impl NoiseFilter {
    /// Default keyword lists extended with the given extras.
    pub fn new(extra_course: &[String], extra_boilerplate: &[String], excluded_topics: &[String]) -> Self {
        let mut course: Vec<String> = COURSE_KEYWORDS.iter().map(|s| s.to_string()).collect();
        course.extend(normalized(extra_course));
        let mut boilerplate: Vec<String> = BOILERPLATE_KEYWORDS.iter().map(|s| s.to_string()).collect();
        boilerplate.extend(normalized(extra_boilerplate));

        Self {
            course,
            boilerplate,
            excluded_topics: normalized(excluded_topics).collect(),
        }
    }

    /// First keyword hit in name, description or topics.
    pub fn classify(&self, name: &str, description: Option<&str>, topics: &[String]) -> Option<NoiseMatch> {
        if let Some(topic) = topics
            .iter()
            .find(|t| self.excluded_topics.contains(&t.to_lowercase()))
        {
            return Some(NoiseMatch {
                category: NoiseCategory::ExcludedTopic,
                keyword: topic.to_lowercase(),
            });
        }

        let haystack = format!(
            "{}\n{}\n{}",
            name,
            description.unwrap_or_default(),
            topics.join(" ")
        );
        self.classify_text(&haystack)
    }

    pub fn is_noise(&self, name: &str, description: Option<&str>, topics: &[String]) -> bool {
        self.classify(name, description, topics).is_some()
    }

    /// Keyword test over free text, e.g. the start of a README.
    pub fn classify_text(&self, text: &str) -> Option<NoiseMatch> {
        let text = text.to_lowercase();
        let hit = |keywords: &[String], category| {
            keywords
                .iter()
                .find(|k| text.contains(k.as_str()))
                .map(|k| NoiseMatch {
                    category,
                    keyword: k.clone(),
                })
        };
        hit(&self.course, NoiseCategory::Course).or_else(|| hit(&self.boilerplate, NoiseCategory::Boilerplate))
    }

    /// Same test over the first [`README_PREFIX_CHARS`] characters.
    pub fn classify_readme(&self, readme: &str) -> Option<NoiseMatch> {
        let prefix: String = readme.chars().take(README_PREFIX_CHARS).collect();
        self.classify_text(&prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootcamp_is_noise() {
        let filter = NoiseFilter::default();
        let hit = filter.classify("react-bootcamp-2023", None, &[]).unwrap();
        assert_eq!(hit.category, NoiseCategory::Course);
        assert_eq!(hit.keyword, "bootcamp");
    }

    #[test]
    fn test_plain_product_is_not_noise() {
        let filter = NoiseFilter::default();
        assert!(!filter.is_noise(
            "acme-dashboard",
            Some("Internal metrics dashboard for Acme"),
            &["react".to_string(), "typescript".to_string()]
        ));
    }

    #[test]
    fn test_matches_description_and_topics_case_insensitively() {
        let filter = NoiseFilter::default();
        assert!(filter.is_noise("widgets", Some("A Vite STARTER for React"), &[]));
        assert_eq!(
            filter
                .classify("widgets", None, &["Boilerplate".to_string()])
                .map(|m| m.category),
            Some(NoiseCategory::Boilerplate)
        );
    }

    #[test]
    fn test_extra_keywords_and_topics() {
        let filter = NoiseFilter::new(
            &["Kata".to_string()],
            &[" ".to_string()],
            &["Portfolio".to_string()],
        );
        assert!(filter.is_noise("tdd-kata-react", None, &[]));
        assert_eq!(
            filter
                .classify("me", None, &["portfolio".to_string()])
                .map(|m| m.category),
            Some(NoiseCategory::ExcludedTopic)
        );
        // Blank extras must not match everything.
        assert!(!filter.is_noise("acme-dashboard", None, &[]));
    }

    #[test]
    fn test_readme_check_uses_prefix_only() {
        let filter = NoiseFilter::default();
        let mut readme = "a".repeat(README_PREFIX_CHARS);
        readme.push_str(" tutorial");
        assert!(filter.classify_readme(&readme).is_none());
        assert!(filter.classify_readme("# Udemy course project").is_some());
    }
}
