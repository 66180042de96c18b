//! Run-scoped rename tables shared by every stage.
//!
//! Entries are append-only: once a key is mapped it keeps its value for the rest of the run.
//! All tables are keyed by original class identities and keep insertion order.

use indexmap::IndexMap;
use jarcloak_core::descriptor::remap_descriptor;
use std::collections::HashMap;

/// Original to renamed class identities, with the reverse direction kept in step.
#[derive(Debug, Clone, Default)]
pub struct ClassNameMap {
    forward: IndexMap<String, String>,
    reverse: HashMap<String, String>,
}

impl ClassNameMap {
    /// Records a rename. Returns false if `original` already has one.
    pub fn insert(&mut self, original: &str, renamed: &str) -> bool {
        if self.forward.contains_key(original) {
            return false;
        }
        self.forward.insert(original.to_string(), renamed.to_string());
        self.reverse.insert(renamed.to_string(), original.to_string());
        true
    }

    /// New name of `original`, if it was renamed.
    pub fn renamed(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    /// Original name behind `renamed`.
    pub fn original(&self, renamed: &str) -> Option<&str> {
        self.reverse.get(renamed).map(String::as_str)
    }

    /// Original identity of a possibly renamed class.
    pub fn resolve_original<'a>(&'a self, name: &'a str) -> &'a str {
        self.original(name).unwrap_or(name)
    }

    /// Pairs of original and new name, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

type PerClass<V> = IndexMap<String, IndexMap<String, V>>;

/// All renames of a run. Every table is keyed by original names.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    pub classes: ClassNameMap,
    /// class -> `name + descriptor` -> new name
    methods: PerClass<String>,
    /// class -> field name -> new name
    fields: PerClass<String>,
    /// class -> `name + descriptor` -> local name -> new name
    locals: PerClass<IndexMap<String, String>>,
}

impl MappingTable {
    /// `key` is `name + descriptor`.
    pub fn record_method(&mut self, class: &str, key: &str, renamed: &str) {
        self.methods
            .entry(class.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| renamed.to_string());
    }

    pub fn method_name(&self, class: &str, key: &str) -> Option<&str> {
        self.methods.get(class)?.get(key).map(String::as_str)
    }

    pub fn record_field(&mut self, class: &str, field: &str, renamed: &str) {
        self.fields
            .entry(class.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| renamed.to_string());
    }

    pub fn field_name(&self, class: &str, field: &str) -> Option<&str> {
        self.fields.get(class)?.get(field).map(String::as_str)
    }

    /// Records a local variable rename inside the method `method_key` of `class`.
    pub fn record_local(&mut self, class: &str, method_key: &str, local: &str, renamed: &str) {
        self.locals
            .entry(class.to_string())
            .or_default()
            .entry(method_key.to_string())
            .or_default()
            .entry(local.to_string())
            .or_insert_with(|| renamed.to_string());
    }

    pub fn local_name(&self, class: &str, method_key: &str, local: &str) -> Option<&str> {
        self.locals
            .get(class)?
            .get(method_key)?
            .get(local)
            .map(String::as_str)
    }

    pub fn methods(&self) -> &PerClass<String> {
        &self.methods
    }

    pub fn fields(&self) -> &PerClass<String> {
        &self.fields
    }

    pub fn locals(&self) -> &PerClass<IndexMap<String, String>> {
        &self.locals
    }

    /// Maps an original identity to its new one, for the descriptor rewriters.
    pub fn rename_class(&self, name: &str) -> Option<String> {
        self.classes.renamed(name).map(str::to_string)
    }

    /// Undoes class renames inside a descriptor, so member keys stay in original terms.
    /// Malformed descriptors come back unchanged.
    pub fn original_descriptor(&self, desc: &str) -> String {
        if self.classes.is_empty() {
            return desc.to_string();
        }
        remap_descriptor(desc, &|n: &str| self.classes.original(n).map(str::to_string))
            .unwrap_or_else(|_| desc.to_string())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_map_is_bidirectional_and_append_only() {
        let mut map = ClassNameMap::default();
        assert!(map.insert("com/example/Foo", "a0/b0"));
        assert!(!map.insert("com/example/Foo", "a0/c0"));
        assert_eq!(map.renamed("com/example/Foo"), Some("a0/b0"));
        assert_eq!(map.original("a0/b0"), Some("com/example/Foo"));
        assert_eq!(map.resolve_original("java/lang/String"), "java/lang/String");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn member_tables_keep_first_value() {
        let mut table = MappingTable::default();
        table.record_method("a/A", "run()V", "c0");
        table.record_method("a/A", "run()V", "c1");
        table.record_field("a/A", "count", "d0");
        table.record_local("a/A", "run()V", "i", "e0");
        assert_eq!(table.method_name("a/A", "run()V"), Some("c0"));
        assert_eq!(table.field_name("a/A", "count"), Some("d0"));
        assert_eq!(table.local_name("a/A", "run()V", "i"), Some("e0"));
        assert_eq!(table.method_name("a/B", "run()V"), None);
    }

    #[test]
    fn descriptors_map_back_to_original_identities() {
        let mut table = MappingTable::default();
        table.classes.insert("com/example/Foo", "a0/b0");
        assert_eq!(
            table.original_descriptor("(La0/b0;[La0/b0;)La0/b0;"),
            "(Lcom/example/Foo;[Lcom/example/Foo;)Lcom/example/Foo;"
        );
        assert_eq!(table.rename_class("com/example/Foo").as_deref(), Some("a0/b0"));
    }
}
