use serde::Serialize;
use std::fmt;

/// Per-feature counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Matched class entries seen.
    pub classes_processed: usize,
    /// Classes written transformed.
    pub classes_obfuscated: usize,
    /// Fields plus local variables.
    pub variables_obfuscated: usize,
    pub class_names_obfuscated: usize,
    pub strings_obfuscated: usize,
    pub classes_with_obfuscated_strings: usize,
    pub method_names_obfuscated: usize,
    pub methods_reordered: usize,
    pub methods_flow_obfuscated: usize,
    /// Instructions added by control-flow insertion.
    pub instructions_added: usize,
    /// Classes retried with flow obfuscation off.
    pub flow_skipped: usize,
    /// Matched classes written unchanged.
    pub classes_failed: usize,
}

impl Stats {
    /// Adds the counters of `other` (a single class) to this aggregate.
    pub fn merge(&mut self, other: &Self) {
        self.classes_processed += other.classes_processed;
        self.classes_obfuscated += other.classes_obfuscated;
        self.variables_obfuscated += other.variables_obfuscated;
        self.class_names_obfuscated += other.class_names_obfuscated;
        self.strings_obfuscated += other.strings_obfuscated;
        self.classes_with_obfuscated_strings += other.classes_with_obfuscated_strings;
        self.method_names_obfuscated += other.method_names_obfuscated;
        self.methods_reordered += other.methods_reordered;
        self.methods_flow_obfuscated += other.methods_flow_obfuscated;
        self.instructions_added += other.instructions_added;
        self.flow_skipped += other.flow_skipped;
        self.classes_failed += other.classes_failed;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Classes processed: {}, Obfuscated: {}, Variables obfuscated: {}, \
             Class names obfuscated: {}, Strings obfuscated: {}, Method names obfuscated: {}, \
             Methods reordered: {}, Flow obfuscated: {}",
            self.classes_processed,
            self.classes_obfuscated,
            self.variables_obfuscated,
            self.class_names_obfuscated,
            self.strings_obfuscated,
            self.method_names_obfuscated,
            self.methods_reordered,
            self.methods_flow_obfuscated,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_counters_in_order() {
        let stats = Stats {
            classes_processed: 3,
            classes_obfuscated: 2,
            strings_obfuscated: 7,
            ..Stats::default()
        };
        assert_eq!(
            stats.to_string(),
            "Classes processed: 3, Obfuscated: 2, Variables obfuscated: 0, Class names obfuscated: 0, \
             Strings obfuscated: 7, Method names obfuscated: 0, Methods reordered: 0, Flow obfuscated: 0"
        );
    }

    #[test]
    fn merge_adds_and_serializes_camel_case() {
        let mut total = Stats::default();
        let one = Stats {
            methods_reordered: 4,
            instructions_added: 10,
            ..Stats::default()
        };
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.methods_reordered, 8);
        let json = serde_json::to_value(total).unwrap();
        assert_eq!(json["instructionsAdded"], 20);
    }
}
