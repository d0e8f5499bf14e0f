use std::collections::HashMap;

use super::{
    builtin::{ClockWidget, DateWidget, PanelWidget},
    Widget,
};

pub type WidgetFactory = fn() -> Box<dyn Widget>;

/// Maps the `entry` id declared in a widget manifest to a factory.
pub struct WidgetRegistry {
    factories: HashMap<String, WidgetFactory>,
}

impl WidgetRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("clock", || Box::new(ClockWidget::new()));
        registry.register("date", || Box::new(DateWidget::new()));
        registry.register("panel", || Box::new(PanelWidget::new()));
        registry
    }

    pub fn register(&mut self, entry: &str, factory: WidgetFactory) {
        self.factories.insert(entry.trim().to_lowercase(), factory);
    }

    pub fn create(&self, entry: &str) -> Option<Box<dyn Widget>> {
        self.factories
            .get(&entry.trim().to_lowercase())
            .map(|factory| factory())
    }

    pub fn entries(&self) -> Vec<&str> {
        let mut entries: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        entries.sort_unstable();
        entries
    }
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
