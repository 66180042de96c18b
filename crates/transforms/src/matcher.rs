//! Include-pattern evaluation.

/// Decides which classes a run touches, from a list of dotted patterns.
///
/// * `com.example.*` matches every class under `com.example`, sub-packages included.
/// * `com.example` matches classes directly in that package, or the class of that exact name.
/// * `Foo` matches only the class `Foo` in the default package.
///
/// An empty list matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeMatcher {
    patterns: Vec<String>,
}

impl IncludeMatcher {
    /// Patterns are dotted: `com.example.*`, `com.example` or `Main`.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_string())
                .collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// An empty matcher matches nothing.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// `class_name` is in internal (slash-separated) form.
    pub fn matches(&self, class_name: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let dotted = class_name.replace('/', ".");
        self.patterns.iter().any(|p| matches_pattern(&dotted, p))
    }
}

fn package_of(dotted: &str) -> Option<&str> {
    dotted.rfind('.').map(|i| &dotted[..i])
}

fn matches_pattern(class: &str, pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".*") {
        if prefix.is_empty() {
            return true;
        }
        let under = class
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'));
        return under || package_of(class) == Some(prefix);
    }
    if pattern.contains('.') {
        return class == pattern || package_of(class) == Some(pattern);
    }
    package_of(class).is_none() && class == pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_covers_subpackages() {
        let m = IncludeMatcher::new(["com.example.*"]);
        assert!(m.matches("com/example/Foo"));
        assert!(m.matches("com/example/sub/Bar"));
        assert!(!m.matches("com/other/Foo"));
        assert!(!m.matches("com/examples/Foo"));
    }

    #[test]
    fn plain_package_excludes_subpackages() {
        let m = IncludeMatcher::new(["com.test"]);
        assert!(m.matches("com/test/Foo"));
        assert!(!m.matches("com/test/sub/Bar"));
    }

    #[test]
    fn exact_class_and_trimmed_patterns() {
        let m = IncludeMatcher::new(["  com.example.Main "]);
        assert!(m.matches("com/example/Main"));
        assert!(!m.matches("com/example/Main2"));
    }

    #[test]
    fn empty_list_matches_nothing() {
        let m = IncludeMatcher::new(Vec::<String>::new());
        assert!(!m.matches("Foo"));
        assert!(!m.matches("com/example/Foo"));
    }

    #[test]
    fn bare_name_needs_default_package() {
        let m = IncludeMatcher::new(["Foo"]);
        assert!(m.matches("Foo"));
        assert!(!m.matches("com/example/Foo"));
    }

    #[test]
    fn lone_wildcard_matches_all() {
        let m = IncludeMatcher::new([".*"]);
        assert!(m.matches("Foo"));
        assert!(m.matches("a/b/C"));
    }
}
