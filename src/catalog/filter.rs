//! Session content filters (grade levels and themes).

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use super::item::Tags;
use super::normalize::normalize_content;

/// How requested themes are matched against an item's themes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThemeMatchMode {
    /// At least one requested theme is present.
    #[default]
    Any,
    /// Every requested theme is present.
    All,
}

/// Per-room filter applied to the catalog before assignment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Accepted grade levels (empty = any).
    #[serde(default)]
    pub grade_levels: BTreeSet<u8>,
    /// Requested themes (empty = no theme filter).
    #[serde(default)]
    pub themes: BTreeSet<String>,
    /// Theme matching mode.
    #[serde(default)]
    pub theme_match_mode: ThemeMatchMode,
    /// Whether items without themes pass an active theme filter.
    #[serde(default)]
    pub include_untagged_when_theme_filter_active: bool,
}

impl FilterConfig {
    /// Builder: accept a grade level.
    pub fn with_grade(mut self, grade: u8) -> Self {
        self.grade_levels.insert(grade);
        self
    }

    /// Builder: request a theme.
    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.themes.insert(theme.into());
        self
    }

    /// Builder: set match mode.
    pub fn with_mode(mut self, mode: ThemeMatchMode) -> Self {
        self.theme_match_mode = mode;
        self
    }

    /// Builder: let untagged items through an active theme filter.
    pub fn including_untagged(mut self) -> Self {
        self.include_untagged_when_theme_filter_active = true;
        self
    }

    /// Whether this filter restricts anything at all.
    pub fn is_active(&self) -> bool {
        !self.grade_levels.is_empty() || !self.themes.is_empty()
    }

    /// Grade rule: ungraded passes, empty request passes, else membership.
    pub fn passes_grade(&self, grade: Option<u8>) -> bool {
        match grade {
            None => true,
            Some(_) if self.grade_levels.is_empty() => true,
            Some(g) => self.grade_levels.contains(&g),
        }
    }

    /// Theme rule. Themes compare case- and whitespace-insensitively.
    pub fn passes_themes(&self, themes: &BTreeSet<String>) -> bool {
        if self.themes.is_empty() {
            return true;
        }
        if themes.is_empty() {
            return self.include_untagged_when_theme_filter_active;
        }

        let have: BTreeSet<String> = themes.iter().map(|t| normalize_content(t)).collect();
        let mut wanted = self.themes.iter().map(|t| normalize_content(t));
        match self.theme_match_mode {
            ThemeMatchMode::Any => wanted.any(|t| have.contains(&t)),
            ThemeMatchMode::All => wanted.all(|t| have.contains(&t)),
        }
    }

    /// Both rules applied to a tag set.
    pub fn passes(&self, tags: &Tags) -> bool {
        self.passes_grade(tags.grade_level) && self.passes_themes(&tags.themes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(grade: Option<u8>, themes: &[&str]) -> Tags {
        Tags {
            grade_level: grade,
            themes: themes.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_filter_passes_everything() {
        let filter = FilterConfig::default();
        assert!(!filter.is_active());
        assert!(filter.passes(&tags(Some(3), &["space"])));
        assert!(filter.passes(&tags(None, &[])));
    }

    #[test]
    fn test_grade_filter() {
        let filter = FilterConfig::default().with_grade(2).with_grade(3);
        assert!(filter.passes_grade(None));
        assert!(filter.passes_grade(Some(2)));
        assert!(!filter.passes_grade(Some(5)));
    }

    #[test]
    fn test_theme_any_and_all() {
        let any = FilterConfig::default().with_theme("animals").with_theme("ocean");
        let all = any.clone().with_mode(ThemeMatchMode::All);

        let item = tags(None, &["Animals"]);
        assert!(any.passes(&item));
        assert!(!all.passes(&item));

        let both = tags(None, &["animals", "ocean", "colors"]);
        assert!(all.passes(&both));
    }

    #[test]
    fn test_untagged_items_under_theme_filter() {
        let strict = FilterConfig::default().with_theme("animals");
        let lenient = strict.clone().including_untagged();

        let untagged = tags(None, &[]);
        assert!(!strict.passes(&untagged));
        assert!(lenient.passes(&untagged));

        // Lenient mode does not admit items tagged with other themes.
        assert!(!lenient.passes(&tags(None, &["space"])));
    }

    #[test]
    fn test_filter_json() {
        let json = r#"{"gradeLevels":[1,2],"themes":["space"],"themeMatchMode":"all"}"#;
        let filter: FilterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(filter.theme_match_mode, ThemeMatchMode::All);
        assert!(!filter.include_untagged_when_theme_filter_active);
        assert!(filter.grade_levels.contains(&2));
    }
}
