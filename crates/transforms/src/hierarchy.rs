//! Super-type graph of the classes seen in a run.
//!
//! Nodes are original class identities. Classes that are only referenced (library types) get a
//! node too, but no [`ClassInfo`]; they count as outside the run.

use jarcloak_core::class_ir::{access, ClassUnit};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

const OBJECT: &str = "java/lang/Object";
const OVERRIDE: &str = "Ljava/lang/Override;";

/// Edge kind from a class to one of its super types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Relation {
    Extends,
    Implements,
}

/// What the hierarchy keeps of a declared method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    pub access: u16,
    /// Carries the `@Override` marker annotation.
    pub override_marker: bool,
}

/// What the run knows about one of its own classes.
#[derive(Debug, Clone, Default)]
pub struct ClassInfo {
    pub access: u16,
    /// Keyed by `name + descriptor`.
    pub methods: HashMap<String, MethodInfo>,
    /// Declared field names.
    pub fields: HashSet<String>,
}

impl ClassInfo {
    pub const fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }
}

/// Super-type graph of the classes in the archive. Library types appear only as
/// leaf nodes.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    graph: DiGraph<String, Relation>,
    nodes: HashMap<String, NodeIndex>,
    classes: HashMap<String, ClassInfo>,
}

impl ClassHierarchy {
    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    /// Registers a decoded class under its current name. Registering the same class twice is a
    /// no-op.
    pub fn add_class(&mut self, unit: &ClassUnit) {
        if self.classes.contains_key(&unit.name) {
            return;
        }
        let this = self.node(&unit.name);
        if let Some(super_name) = &unit.super_name {
            let parent = self.node(super_name);
            self.graph.add_edge(this, parent, Relation::Extends);
        }
        for iface in &unit.interfaces {
            let parent = self.node(iface);
            self.graph.add_edge(this, parent, Relation::Implements);
        }
        let info = ClassInfo {
            access: unit.access,
            methods: unit
                .methods
                .iter()
                .map(|m| {
                    let info = MethodInfo {
                        access: m.access,
                        override_marker: m.annotations.has(OVERRIDE),
                    };
                    (m.key(), info)
                })
                .collect(),
            fields: unit.fields.iter().map(|f| f.name.clone()).collect(),
        };
        self.classes.insert(unit.name.clone(), info);
    }

    /// True for classes registered in this run.
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Members of a class in the run, or `None` for library types.
    pub fn info(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// False for unknown classes.
    pub fn is_interface(&self, name: &str) -> bool {
        self.classes.get(name).is_some_and(ClassInfo::is_interface)
    }

    pub fn declares_method(&self, class: &str, key: &str) -> bool {
        self.classes
            .get(class)
            .is_some_and(|c| c.methods.contains_key(key))
    }

    pub fn declares_field(&self, class: &str, field: &str) -> bool {
        self.classes.get(class).is_some_and(|c| c.fields.contains(field))
    }

    fn walk(&self, start: &str, direction: Direction) -> Vec<&str> {
        let Some(&root) = self.nodes.get(start) else {
            return Vec::new();
        };
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut out = Vec::new();
        while let Some(node) = queue.pop_front() {
            let mut edges: Vec<_> = self.graph.edges_directed(node, direction).collect();
            edges.sort_by_key(|e| (*e.weight(), e.id()));
            for edge in edges {
                let next = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                if seen.insert(next) {
                    out.push(self.graph[next].as_str());
                    queue.push_back(next);
                }
            }
        }
        out
    }

    /// Every super-type of `name`, nearest first, superclasses before interfaces.
    pub fn ancestors(&self, name: &str) -> Vec<&str> {
        self.walk(name, Direction::Outgoing)
    }

    /// Every class that extends or implements `name`, directly or not.
    pub fn descendants(&self, name: &str) -> Vec<&str> {
        self.walk(name, Direction::Incoming)
    }

    /// `name` followed by its ancestors: the order member references resolve in.
    pub fn lookup_chain<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let mut chain = vec![name];
        chain.extend(self.ancestors(name));
        chain
    }

    /// The superclass links of `name`, nearest first, ending at the first class the graph does
    /// not know the parent of.
    pub fn superclass_chain(&self, name: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(name).copied();
        while let Some(node) = current {
            current = self
                .graph
                .edges_directed(node, Direction::Outgoing)
                .find(|e| *e.weight() == Relation::Extends)
                .map(|e| e.target());
            if let Some(parent) = current {
                if chain.len() > self.graph.node_count() {
                    break;
                }
                chain.push(self.graph[parent].as_str());
            }
        }
        chain
    }

    /// True if some super-type other than `java/lang/Object` is not part of the run.
    pub fn leaves_run(&self, name: &str) -> bool {
        self.ancestors(name)
            .into_iter()
            .any(|a| a != OBJECT && !self.contains(a))
    }

    /// Number of classes in the run.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::class_ir::{FieldUnit, MethodUnit};

    fn class(name: &str, super_name: &str, interfaces: &[&str]) -> ClassUnit {
        let mut unit = ClassUnit::new(52, access::PUBLIC, name, Some(super_name));
        unit.interfaces = interfaces.iter().map(|s| s.to_string()).collect();
        unit
    }

    #[test]
    fn ancestors_put_superclass_first() {
        let mut h = ClassHierarchy::default();
        h.add_class(&class("a/Base", OBJECT, &[]));
        h.add_class(&class("a/Mid", "a/Base", &["a/Api"]));
        h.add_class(&class("a/Leaf", "a/Mid", &[]));
        assert_eq!(h.ancestors("a/Leaf"), vec!["a/Mid", "a/Base", "a/Api", OBJECT]);
        assert_eq!(h.superclass_chain("a/Leaf"), vec!["a/Mid", "a/Base", OBJECT]);
        assert_eq!(h.descendants("a/Base"), vec!["a/Mid", "a/Leaf"]);
        assert!(!h.leaves_run("a/Leaf"));
        assert!(!h.contains("a/Api"));
    }

    #[test]
    fn library_parents_leave_the_run() {
        let mut h = ClassHierarchy::default();
        h.add_class(&class("a/Task", OBJECT, &["java/lang/Runnable"]));
        assert!(h.leaves_run("a/Task"));
    }

    #[test]
    fn records_members() {
        let mut unit = class("a/A", OBJECT, &[]);
        let mut run = MethodUnit::new(access::PUBLIC, "run", "()V");
        run.annotations.invisible.push(jarcloak_core::class_ir::Annotation {
            desc: OVERRIDE.into(),
            values: Vec::new(),
        });
        unit.methods.push(run);
        unit.fields.push(FieldUnit::new(access::PRIVATE, "count", "I"));
        let mut h = ClassHierarchy::default();
        h.add_class(&unit);
        h.add_class(&unit);
        assert_eq!(h.len(), 1);
        assert!(h.declares_method("a/A", "run()V"));
        assert!(h.declares_field("a/A", "count"));
        assert!(h.info("a/A").unwrap().methods["run()V"].override_marker);
    }
}
