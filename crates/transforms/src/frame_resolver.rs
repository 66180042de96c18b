//! Common-superclass answers for frame computation.
//!
//! Renamed classes are not loadable under their new names while the archive is being written,
//! so anything involving them, or any class the run cannot see, widens to `java/lang/Object`.

use crate::hierarchy::ClassHierarchy;
use crate::mapping::MappingTable;
use jarcloak_core::frames::CommonSuperResolver;
use std::collections::HashMap;
use std::sync::OnceLock;

const OBJECT: &str = "java/lang/Object";

/// Superclass links of frequently merged library classes.
const LIBRARY_SUPERS: &[(&str, &str)] = &[
    ("java/lang/Throwable", OBJECT),
    ("java/lang/Exception", "java/lang/Throwable"),
    ("java/lang/Error", "java/lang/Throwable"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/NumberFormatException", "java/lang/IllegalArgumentException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/StringIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/InterruptedException", "java/lang/Exception"),
    ("java/lang/ReflectiveOperationException", "java/lang/Exception"),
    ("java/lang/ClassNotFoundException", "java/lang/ReflectiveOperationException"),
    ("java/lang/NoSuchMethodException", "java/lang/ReflectiveOperationException"),
    ("java/lang/NoSuchFieldException", "java/lang/ReflectiveOperationException"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/OutOfMemoryError", "java/lang/VirtualMachineError"),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
    ("java/lang/AssertionError", "java/lang/Error"),
    ("java/io/IOException", "java/lang/Exception"),
    ("java/io/FileNotFoundException", "java/io/IOException"),
    ("java/io/EOFException", "java/io/IOException"),
    ("java/io/UncheckedIOException", "java/lang/RuntimeException"),
    ("java/util/NoSuchElementException", "java/lang/RuntimeException"),
    ("java/util/ConcurrentModificationException", "java/lang/RuntimeException"),
    ("java/lang/String", OBJECT),
    ("java/lang/Number", OBJECT),
    ("java/lang/Integer", "java/lang/Number"),
    ("java/lang/Long", "java/lang/Number"),
    ("java/lang/Short", "java/lang/Number"),
    ("java/lang/Byte", "java/lang/Number"),
    ("java/lang/Float", "java/lang/Number"),
    ("java/lang/Double", "java/lang/Number"),
    ("java/math/BigInteger", "java/lang/Number"),
    ("java/math/BigDecimal", "java/lang/Number"),
    ("java/lang/Boolean", OBJECT),
    ("java/lang/Character", OBJECT),
    ("java/lang/AbstractStringBuilder", OBJECT),
    ("java/lang/StringBuilder", "java/lang/AbstractStringBuilder"),
    ("java/lang/StringBuffer", "java/lang/AbstractStringBuilder"),
    ("java/util/AbstractCollection", OBJECT),
    ("java/util/AbstractList", "java/util/AbstractCollection"),
    ("java/util/AbstractSequentialList", "java/util/AbstractList"),
    ("java/util/ArrayList", "java/util/AbstractList"),
    ("java/util/LinkedList", "java/util/AbstractSequentialList"),
    ("java/util/AbstractSet", "java/util/AbstractCollection"),
    ("java/util/HashSet", "java/util/AbstractSet"),
    ("java/util/LinkedHashSet", "java/util/HashSet"),
    ("java/util/TreeSet", "java/util/AbstractSet"),
    ("java/util/AbstractMap", OBJECT),
    ("java/util/HashMap", "java/util/AbstractMap"),
    ("java/util/LinkedHashMap", "java/util/HashMap"),
    ("java/util/TreeMap", "java/util/AbstractMap"),
    ("java/util/concurrent/ConcurrentHashMap", "java/util/AbstractMap"),
    ("java/io/InputStream", OBJECT),
    ("java/io/FileInputStream", "java/io/InputStream"),
    ("java/io/FilterInputStream", "java/io/InputStream"),
    ("java/io/BufferedInputStream", "java/io/FilterInputStream"),
    ("java/io/ByteArrayInputStream", "java/io/InputStream"),
    ("java/io/OutputStream", OBJECT),
    ("java/io/FileOutputStream", "java/io/OutputStream"),
    ("java/io/FilterOutputStream", "java/io/OutputStream"),
    ("java/io/BufferedOutputStream", "java/io/FilterOutputStream"),
    ("java/io/PrintStream", "java/io/FilterOutputStream"),
    ("java/io/ByteArrayOutputStream", "java/io/OutputStream"),
    ("java/io/Reader", OBJECT),
    ("java/io/BufferedReader", "java/io/Reader"),
    ("java/io/InputStreamReader", "java/io/Reader"),
    ("java/io/Writer", OBJECT),
    ("java/io/BufferedWriter", "java/io/Writer"),
    ("java/io/PrintWriter", "java/io/Writer"),
    ("java/awt/Component", OBJECT),
    ("java/awt/Container", "java/awt/Component"),
    ("javax/swing/JComponent", "java/awt/Container"),
    ("javax/swing/JPanel", "javax/swing/JComponent"),
    ("javax/swing/JLabel", "javax/swing/JComponent"),
    ("javax/swing/AbstractButton", "javax/swing/JComponent"),
    ("javax/swing/JButton", "javax/swing/AbstractButton"),
    ("javax/swing/JToggleButton", "javax/swing/AbstractButton"),
    ("javax/swing/JCheckBox", "javax/swing/JToggleButton"),
    ("javax/swing/text/JTextComponent", "javax/swing/JComponent"),
    ("javax/swing/JTextField", "javax/swing/text/JTextComponent"),
    ("javax/swing/JTextArea", "javax/swing/text/JTextComponent"),
];

/// Library interfaces; merging with one of them yields `java/lang/Object`.
const LIBRARY_INTERFACES: &[&str] = &[
    "java/lang/Runnable",
    "java/lang/Comparable",
    "java/lang/CharSequence",
    "java/lang/Iterable",
    "java/lang/AutoCloseable",
    "java/lang/Cloneable",
    "java/io/Serializable",
    "java/io/Closeable",
    "java/util/Collection",
    "java/util/List",
    "java/util/Set",
    "java/util/Map",
    "java/util/Iterator",
    "java/util/function/Function",
    "java/util/function/Supplier",
    "java/util/function/Consumer",
];

fn library_supers() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| LIBRARY_SUPERS.iter().copied().collect())
}

/// A [`CommonSuperResolver`] that never needs to load a class.
#[derive(Debug, Clone, Copy)]
pub struct SafeFrameResolver<'a> {
    mappings: &'a MappingTable,
    hierarchy: &'a ClassHierarchy,
}

impl<'a> SafeFrameResolver<'a> {
    pub const fn new(mappings: &'a MappingTable, hierarchy: &'a ClassHierarchy) -> Self {
        Self { mappings, hierarchy }
    }

    fn is_renamed(&self, name: &str) -> bool {
        self.mappings.classes.original(name).is_some()
            || self.mappings.classes.renamed(name).is_some()
    }

    fn is_interface(&self, name: &str) -> bool {
        LIBRARY_INTERFACES.contains(&name) || self.hierarchy.is_interface(name)
    }

    /// `name` and its superclasses, or `None` if some link is unknown.
    fn lineage(&self, name: &str) -> Option<Vec<String>> {
        let table = library_supers();
        let mut chain = vec![name.to_string()];
        let mut current = name.to_string();
        while current != OBJECT {
            let parent = if let Some(parent) = table.get(current.as_str()) {
                (*parent).to_string()
            } else if self.hierarchy.contains(&current) {
                self.hierarchy.superclass_chain(&current).first()?.to_string()
            } else {
                return None;
            };
            if chain.len() > 64 || self.is_renamed(&parent) {
                return None;
            }
            chain.push(parent.clone());
            current = parent;
        }
        Some(chain)
    }
}

impl CommonSuperResolver for SafeFrameResolver<'_> {
    fn common_super_class(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        if self.is_renamed(a) || self.is_renamed(b) {
            return OBJECT.to_string();
        }
        if self.is_interface(a) || self.is_interface(b) {
            return OBJECT.to_string();
        }
        let (Some(left), Some(right)) = (self.lineage(a), self.lineage(b)) else {
            return OBJECT.to_string();
        };
        left.into_iter()
            .find(|ancestor| right.contains(ancestor))
            .unwrap_or_else(|| OBJECT.to_string())
    }
}
