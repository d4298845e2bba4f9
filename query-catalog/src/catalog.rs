use std::sync::Arc;

use indexmap::IndexMap;

use crate::query::QueryInstance;

/// An ordered set of query instances, keyed case-insensitively by name.
///
/// Instances are shared behind [`Arc`]s so that merging catalogs, or handing a catalog to a
/// scrape that runs concurrently with a catalog swap, never copies query text. Once built, a
/// catalog is never mutated: [`MetricCatalog::merged`] returns a new one.
#[derive(Debug, Clone, Default)]
pub struct MetricCatalog {
    instances: IndexMap<String, Arc<QueryInstance>>,
}

impl MetricCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `instance`, replacing in place any instance with the same name. Returns the replaced
    /// instance.
    pub fn insert(&mut self, instance: QueryInstance) -> Option<Arc<QueryInstance>> {
        self.instances
            .insert(instance.name.to_ascii_lowercase(), Arc::new(instance))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<QueryInstance>> {
        self.instances.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// All instances, in the order they were first added
    pub fn iter(&self) -> impl Iterator<Item = &Arc<QueryInstance>> + '_ {
        self.instances.values()
    }

    /// The instances that should be scraped
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<QueryInstance>> + '_ {
        self.iter().filter(|i| i.is_enabled())
    }

    /// Returns a copy of this catalog with `overrides` applied: an override with the name of an
    /// existing instance replaces it (keeping its position), and any other override is appended.
    pub fn merged<I>(&self, overrides: I) -> MetricCatalog
    where
        I: IntoIterator<Item = QueryInstance>,
    {
        let mut merged = self.clone();
        merged.extend(overrides);
        merged
    }
}

impl Extend<QueryInstance> for MetricCatalog {
    fn extend<T: IntoIterator<Item = QueryInstance>>(&mut self, iter: T) {
        for instance in iter {
            self.insert(instance);
        }
    }
}

impl FromIterator<QueryInstance> for MetricCatalog {
    fn from_iter<T: IntoIterator<Item = QueryInstance>>(iter: T) -> Self {
        let mut catalog = MetricCatalog::new();
        catalog.extend(iter);
        catalog
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::column::Column;
    use crate::query::Status;

    fn names(catalog: &MetricCatalog) -> Vec<&str> {
        catalog.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn merge_replaces_in_place_and_appends() {
        let defaults: MetricCatalog = ["a", "b", "c"].into_iter().map(QueryInstance::new).collect();
        let merged = defaults.merged([
            QueryInstance::new("B").with_column(Column::gauge("x", "")),
            QueryInstance::new("d"),
        ]);

        assert_eq!(names(&merged), vec!["a", "B", "c", "d"]);
        assert_eq!(merged.get("b").unwrap().columns.len(), 1);
        // the original is untouched
        assert_eq!(names(&defaults), vec!["a", "b", "c"]);
        assert!(defaults.get("b").unwrap().columns.is_empty());
    }

    #[test]
    fn unchanged_instances_are_shared() {
        let defaults: MetricCatalog = ["a", "b"].into_iter().map(QueryInstance::new).collect();
        let merged = defaults.merged([QueryInstance::new("b")]);
        assert!(Arc::ptr_eq(
            defaults.get("a").unwrap(),
            merged.get("a").unwrap()
        ));
        assert!(!Arc::ptr_eq(
            defaults.get("b").unwrap(),
            merged.get("b").unwrap()
        ));
    }

    #[test]
    fn enabled_skips_disabled() {
        let catalog: MetricCatalog = [
            QueryInstance::new("on"),
            QueryInstance::new("off").with_status(Status::Disabled),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            catalog.enabled().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            vec!["on"]
        );
        assert!(catalog.contains("OFF"));
    }
}
