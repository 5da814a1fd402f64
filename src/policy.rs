//! Freshness policy: which operations are cached, and for how long.
//!
//! A [`FreshnessPolicy`] is a static table of [`PolicyRule`]s loaded once at
//! startup. Rules are `/`-separated patterns in which `*` matches exactly one
//! segment; the most specific matching rule decides the window.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// A `(fresh_for, stale_for)` pair. `stale_for > fresh_for` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    fresh_for: Duration,
    stale_for: Duration,
}

impl FreshnessWindow {
    /// Create a window, rejecting `stale_for <= fresh_for`.
    pub fn new(fresh_for: Duration, stale_for: Duration) -> Option<Self> {
        (stale_for > fresh_for).then_some(FreshnessWindow {
            fresh_for,
            stale_for,
        })
    }

    /// Derive the stale window from the fresh one.
    ///
    /// Up to one hour the stale window is twice the fresh window; beyond that
    /// staleness is capped at one extra day.
    pub fn from_fresh(fresh_for: Duration) -> Option<Self> {
        let stale_for = if fresh_for <= Duration::from_secs(HOUR) {
            fresh_for.saturating_mul(2)
        } else {
            fresh_for.saturating_add(Duration::from_secs(DAY))
        };
        Self::new(fresh_for, stale_for)
    }

    const fn derived_secs(fresh_secs: u64) -> Self {
        let stale_secs = if fresh_secs <= HOUR {
            fresh_secs * 2
        } else {
            fresh_secs + DAY
        };
        FreshnessWindow {
            fresh_for: Duration::from_secs(fresh_secs),
            stale_for: Duration::from_secs(stale_secs),
        }
    }

    /// Period during which an envelope is served with no upstream activity.
    pub fn fresh_for(&self) -> Duration {
        self.fresh_for
    }

    /// Hard TTL handed to the backing store.
    pub fn stale_for(&self) -> Duration {
        self.stale_for
    }
}

/// How a rule's pattern is compared with an operation id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// The pattern must cover every segment of the operation id.
    #[default]
    Exact,
    /// The pattern must cover a leading run of segments.
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// One entry of the policy table. `window == None` means "never cache".
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pattern: String,
    segments: Vec<Segment>,
    kind: MatchKind,
    window: Option<FreshnessWindow>,
}

impl PolicyRule {
    pub fn new(pattern: &str, kind: MatchKind, window: Option<FreshnessWindow>) -> Self {
        let segments = split_segments(pattern)
            .into_iter()
            .map(|s| match s {
                "*" => Segment::Any,
                lit => Segment::Literal(lit.to_string()),
            })
            .collect();

        PolicyRule {
            pattern: pattern.to_string(),
            segments,
            kind,
            window,
        }
    }

    pub fn exact(pattern: &str, window: Option<FreshnessWindow>) -> Self {
        Self::new(pattern, MatchKind::Exact, window)
    }

    pub fn prefix(pattern: &str, window: Option<FreshnessWindow>) -> Self {
        Self::new(pattern, MatchKind::Prefix, window)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn window(&self) -> Option<FreshnessWindow> {
        self.window
    }

    fn matches(&self, op: &[&str]) -> bool {
        let len_ok = match self.kind {
            MatchKind::Exact => op.len() == self.segments.len(),
            MatchKind::Prefix => op.len() >= self.segments.len(),
        };

        len_ok
            && self.segments.iter().zip(op).all(|(seg, part)| match seg {
                Segment::Any => true,
                Segment::Literal(lit) => lit == part,
            })
    }

    /// Ordering key: literal segments, then total segments, then exact over prefix.
    fn specificity(&self) -> (usize, usize, bool) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (literals, self.segments.len(), self.kind == MatchKind::Exact)
    }
}

/// Static lookup table from operation ids to freshness windows.
#[derive(Debug, Clone)]
pub struct FreshnessPolicy {
    rules: Vec<PolicyRule>,
    default_window: Option<FreshnessWindow>,
}

impl FreshnessPolicy {
    /// An empty policy. Unmatched operations get `default_window`.
    pub fn new(default_window: Option<FreshnessWindow>) -> Self {
        FreshnessPolicy {
            rules: Vec::new(),
            default_window,
        }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replace the window used for operations no rule matches.
    pub fn with_default_window(mut self, default_window: Option<FreshnessWindow>) -> Self {
        self.default_window = default_window;
        self
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn default_window(&self) -> Option<FreshnessWindow> {
        self.default_window
    }

    /// The table used in front of the recipe API.
    pub fn recipe_api() -> Self {
        let search = Some(FreshnessWindow::derived_secs(30 * MINUTE));
        let detail = Some(FreshnessWindow::derived_secs(7 * DAY));
        let catalog = Some(FreshnessWindow::derived_secs(30 * DAY));
        let similar = Some(FreshnessWindow::derived_secs(DAY));

        FreshnessPolicy::new(Some(FreshnessWindow::derived_secs(HOUR)))
            // Random endpoints exist to be non-deterministic.
            .with_rule(PolicyRule::exact("/recipes/random", None))
            .with_rule(PolicyRule::exact("/food/*/random", None))
            .with_rule(PolicyRule::exact("/recipes/complexSearch", search))
            .with_rule(PolicyRule::exact("/recipes/findByIngredients", search))
            .with_rule(PolicyRule::exact("/recipes/autocomplete", search))
            .with_rule(PolicyRule::exact("/food/ingredients/search", search))
            .with_rule(PolicyRule::exact("/recipes/*/information", detail))
            .with_rule(PolicyRule::exact("/recipes/informationBulk", detail))
            .with_rule(PolicyRule::exact("/recipes/*/nutritionWidget.json", detail))
            .with_rule(PolicyRule::prefix("/food/ingredients", catalog))
            .with_rule(PolicyRule::exact("/recipes/*/similar", similar))
    }

    /// Look up the window for an operation id; `None` means bypass the cache.
    pub fn window_for(&self, operation_id: &str) -> Option<FreshnessWindow> {
        let op = split_segments(operation_id);

        self.rules
            .iter()
            .filter(|rule| rule.matches(&op))
            .max_by_key(|rule| rule.specificity())
            .map_or(self.default_window, |rule| rule.window)
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::recipe_api()
    }
}

/// Split an operation id into path segments, ignoring any query string.
fn split_segments(operation_id: &str) -> Vec<&str> {
    let path = operation_id
        .split_once('?')
        .map_or(operation_id, |(path, _)| path);
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(n: u64) -> Duration {
        Duration::from_secs(n * DAY)
    }

    fn hours(n: u64) -> Duration {
        Duration::from_secs(n * HOUR)
    }

    #[test]
    fn test_window_requires_stale_after_fresh() {
        assert!(FreshnessWindow::new(hours(1), hours(2)).is_some());
        assert!(FreshnessWindow::new(hours(2), hours(2)).is_none());
        assert!(FreshnessWindow::new(hours(2), hours(1)).is_none());
    }

    #[test]
    fn test_derived_stale_window() {
        let short = FreshnessWindow::from_fresh(Duration::from_secs(30 * MINUTE)).unwrap();
        assert_eq!(short.stale_for(), hours(1));

        let hour = FreshnessWindow::from_fresh(hours(1)).unwrap();
        assert_eq!(hour.stale_for(), hours(2));

        let six_hours = FreshnessWindow::from_fresh(hours(6)).unwrap();
        assert_eq!(six_hours.stale_for(), hours(30));

        let month = FreshnessWindow::from_fresh(days(30)).unwrap();
        assert_eq!(month.stale_for(), days(31));

        assert!(FreshnessWindow::from_fresh(Duration::ZERO).is_none());
    }

    #[test]
    fn test_recipe_information_window() {
        let policy = FreshnessPolicy::recipe_api();
        let window = policy.window_for("/recipes/42/information").unwrap();
        assert_eq!(window.fresh_for(), days(7));
        assert_eq!(window.stale_for(), days(8));
    }

    #[test]
    fn test_random_endpoints_are_never_cached() {
        let policy = FreshnessPolicy::recipe_api();
        assert!(policy.window_for("/recipes/random").is_none());
        assert!(policy.window_for("/recipes/random?number=3").is_none());
        assert!(policy.window_for("/food/jokes/random").is_none());
        assert!(policy.window_for("/food/trivia/random").is_none());
    }

    #[test]
    fn test_search_and_similar_windows() {
        let policy = FreshnessPolicy::recipe_api();

        let search = policy.window_for("/recipes/complexSearch").unwrap();
        assert_eq!(search.fresh_for(), Duration::from_secs(30 * MINUTE));
        assert_eq!(search.stale_for(), hours(1));

        let similar = policy.window_for("/recipes/715538/similar").unwrap();
        assert_eq!(similar.fresh_for(), days(1));
        assert_eq!(similar.stale_for(), days(2));
    }

    #[test]
    fn test_most_specific_rule_wins() {
        let policy = FreshnessPolicy::recipe_api();

        // Exact search rule beats the ingredient catalog prefix.
        let search = policy.window_for("/food/ingredients/search").unwrap();
        assert_eq!(search.fresh_for(), Duration::from_secs(30 * MINUTE));

        let catalog = policy.window_for("/food/ingredients/9266/information").unwrap();
        assert_eq!(catalog.fresh_for(), days(30));
        assert_eq!(catalog.stale_for(), days(31));
    }

    #[test]
    fn test_unclassified_falls_back_to_default() {
        let policy = FreshnessPolicy::recipe_api();
        let window = policy.window_for("/mealplanner/generate").unwrap();
        assert_eq!(window.fresh_for(), hours(1));
        assert_eq!(window.stale_for(), hours(2));

        let strict = FreshnessPolicy::new(None);
        assert!(strict.window_for("/anything").is_none());
    }

    #[test]
    fn test_wildcard_matches_exactly_one_segment() {
        let rule = PolicyRule::exact("/recipes/*/information", None);
        assert!(rule.matches(&split_segments("/recipes/1/information")));
        assert!(!rule.matches(&split_segments("/recipes/information")));
        assert!(!rule.matches(&split_segments("/recipes/1/2/information")));
    }
}
