use crate::config::PipelineOptions;
use crate::rule::builtin;
use crate::rule::{Category, Rule};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("rule `{0}` is already registered")]
    Duplicate(String),

    #[error("invalid rule pattern: {0}")]
    Pattern(#[from] regex::Error),
}

struct Registered {
    rule: Box<dyn Rule>,
    enabled: bool,
}

/// Rules of one category, in declaration order.
struct CategoryGroup {
    category: Category,
    rules: Vec<Registered>,
}

/// Ordered catalog of rules grouped by category.
///
/// Categories run in [`Category`] order; within a category rules keep
/// insertion order unless [`RuleRegistry::apply_order`] rearranges them.
pub struct RuleRegistry {
    groups: Vec<CategoryGroup>,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            groups: Category::ALL
                .into_iter()
                .map(|category| CategoryGroup {
                    category,
                    rules: Vec::new(),
                })
                .collect(),
        }
    }

    /// A registry holding the built-in rule set.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for rule in builtin::all()? {
            registry.register_boxed(rule)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, rule: impl Rule + 'static) -> Result<(), RegistryError> {
        self.register_boxed(Box::new(rule))
    }

    pub fn register_boxed(&mut self, rule: Box<dyn Rule>) -> Result<(), RegistryError> {
        if self.get(rule.id()).is_some() {
            return Err(RegistryError::Duplicate(rule.id().to_string()));
        }
        let category = rule.category();
        let group = self.group_mut(category);
        group.rules.push(Registered {
            rule,
            enabled: true,
        });
        Ok(())
    }

    fn group_mut(&mut self, category: Category) -> &mut CategoryGroup {
        let idx = Category::ALL
            .iter()
            .position(|c| *c == category)
            .unwrap_or_default();
        &mut self.groups[idx]
    }

    fn entries(&self) -> impl Iterator<Item = &Registered> {
        self.groups.iter().flat_map(|g| g.rules.iter())
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut Registered> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.rules.iter_mut())
            .find(|r| r.rule.id() == id)
    }

    pub fn get(&self, id: &str) -> Option<&dyn Rule> {
        self.entries()
            .find(|r| r.rule.id() == id)
            .map(|r| r.rule.as_ref())
    }

    /// Returns false when no rule has that ID.
    pub fn enable(&mut self, id: &str) -> bool {
        self.set_enabled(id, true)
    }

    /// Returns false when no rule has that ID.
    pub fn disable(&mut self, id: &str) -> bool {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.entries().any(|r| r.rule.id() == id && r.enabled)
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every rule in execution order with its enable flag.
    pub fn iter(&self) -> impl Iterator<Item = (&dyn Rule, bool)> {
        self.entries().map(|r| (r.rule.as_ref(), r.enabled))
    }

    /// Rule IDs in execution order.
    pub fn ids(&self) -> Vec<String> {
        self.entries().map(|r| r.rule.id().to_string()).collect()
    }

    /// Rules that run under `options`, in execution order.
    pub fn active(&self, options: &PipelineOptions) -> Vec<&dyn Rule> {
        self.groups
            .iter()
            .filter(|g| options.category_enabled(g.category))
            .flat_map(|g| g.rules.iter())
            .filter(|r| r.enabled && !options.skip_rule_ids.contains(r.rule.id()))
            .map(|r| r.rule.as_ref())
            .collect()
    }

    /// Reorder rules within each category to follow `order`.
    ///
    /// Rules missing from `order` keep their relative position after the
    /// listed ones; unknown IDs are ignored. Categories never move.
    pub fn apply_order(&mut self, order: &[String]) {
        let rank = |id: &str| order.iter().position(|o| o == id).unwrap_or(usize::MAX);
        for group in &mut self.groups {
            // Stable sort keeps declaration order among unranked rules.
            group.rules.sort_by_key(|r| rank(r.rule.id()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::Edit;
    use crate::rule::{DetectContext, RuleError, TransformContext, Violation};

    struct Named(&'static str, Category);

    impl Rule for Named {
        fn id(&self) -> &str {
            self.0
        }
        fn category(&self) -> Category {
            self.1
        }
        fn detect(&self, _: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError> {
            Ok(Vec::new())
        }
        fn transform(
            &self,
            _: &Violation,
            _: &TransformContext<'_>,
        ) -> Result<Option<Edit>, RuleError> {
            Ok(None)
        }
    }

    fn registry() -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        registry.register(Named("style-a", Category::Style)).unwrap();
        registry.register(Named("sec-a", Category::Security)).unwrap();
        registry.register(Named("style-b", Category::Style)).unwrap();
        registry.register(Named("corr-a", Category::Correctness)).unwrap();
        registry
    }

    #[test]
    fn categories_run_in_declared_order() {
        assert_eq!(registry().ids(), ["sec-a", "corr-a", "style-a", "style-b"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = registry();
        let err = registry.register(Named("sec-a", Category::Style)).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(id) if id == "sec-a"));
    }

    #[test]
    fn active_respects_flags_and_options() {
        let mut registry = registry();
        assert!(registry.disable("corr-a"));
        assert!(!registry.disable("missing"));

        let mut options = PipelineOptions::default();
        options.skip_rule_ids.insert("style-b".to_string());
        let ids: Vec<_> = registry.active(&options).iter().map(|r| r.id()).collect();
        assert_eq!(ids, ["sec-a", "style-a"]);

        options.enabled_categories.insert(Category::Style);
        let ids: Vec<_> = registry.active(&options).iter().map(|r| r.id()).collect();
        assert_eq!(ids, ["style-a"]);
    }

    #[test]
    fn apply_order_reorders_within_categories_only() {
        let mut registry = registry();
        registry.apply_order(&[
            "style-b".to_string(),
            "corr-a".to_string(),
            "unknown".to_string(),
        ]);
        assert_eq!(registry.ids(), ["sec-a", "corr-a", "style-b", "style-a"]);
    }

    #[test]
    fn builtin_registry_loads() {
        let registry = RuleRegistry::with_builtin().unwrap();
        assert!(!registry.is_empty());
        assert!(registry.get("trailing-whitespace").is_some());
    }
}
