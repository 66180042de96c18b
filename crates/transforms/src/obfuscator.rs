use crate::chain::TransformChainBuilder;
use crate::class_identity::ClassIdentityTransform;
use crate::context::{ClassContext, RunContext};
use crate::control_flow::FlowLevel;
use crate::mapping::MappingTable;
use crate::matcher::IncludeMatcher;
use crate::member_name::MemberNameTransform;
use crate::method_identity::MethodIdentityTransform;
use crate::stats::Stats;
use jarcloak_core::{decode_class, encode_class, ClassUnit};
use jarcloak_utils::errors::{EncodeError, EngineError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Configuration for one obfuscation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObfuscationConfig {
    /// Dotted class patterns; only matching classes are touched
    pub include: Vec<String>,
    /// Rename class simple names.
    pub obfuscate_class_names: bool,
    /// Rename package segments.
    pub obfuscate_packages: bool,
    /// Fields and local variables
    pub obfuscate_variables: bool,
    /// Route string literals through a generated decoder.
    pub obfuscate_strings: bool,
    pub obfuscate_method_names: bool,
    /// Shuffle declared methods.
    pub change_methods_orders: bool,
    /// Append the decompiler trap class to the output
    pub crash_class: bool,
    /// Write `<output>_mappings.json` next to the output
    pub generate_mappings: bool,
    pub flow_obfuscation: FlowLevel,
    /// Prefix of every generated name
    pub watermark: String,
    /// Seed for deterministic runs; entropy-seeded when absent
    pub seed: Option<u64>,
}

impl ObfuscationConfig {
    fn with_include<I, S>(include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Renaming only, no body rewriting.
    pub fn light<I, S>(include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            obfuscate_class_names: true,
            obfuscate_packages: true,
            obfuscate_variables: true,
            flow_obfuscation: FlowLevel::None,
            ..Self::with_include(include)
        }
    }

    /// Every feature on, heavy flow.
    pub fn full<I, S>(include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            obfuscate_strings: true,
            obfuscate_method_names: true,
            change_methods_orders: true,
            crash_class: true,
            generate_mappings: true,
            flow_obfuscation: FlowLevel::Heavy,
            ..Self::light(include)
        }
    }

    /// Reads a settings file; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Whether any class or package renaming is on.
    pub fn renames_classes(&self) -> bool {
        self.obfuscate_class_names || self.obfuscate_packages
    }
}

/// One transformed class entry.
#[derive(Debug, Clone)]
pub struct ObfuscatedClass {
    /// Name before any renaming.
    pub original_name: String,
    /// Internal name after renaming
    pub name: String,
    /// Encoded class file.
    pub bytes: Vec<u8>,
    /// What the chain did to this class alone
    pub stats: Stats,
}

impl ObfuscatedClass {
    /// Archive entry name of the transformed class.
    pub fn entry_name(&self) -> String {
        format!("{}.class", self.name)
    }
}

/// Runs the stage chain over single classes while owning the state of one run.
#[derive(Debug)]
pub struct ObfuscationEngine {
    config: ObfuscationConfig,
    run: RunContext,
}

impl ObfuscationEngine {
    /// An engine with an empty run for `config`.
    pub fn new(config: ObfuscationConfig) -> Self {
        let run = RunContext::new(
            IncludeMatcher::new(&config.include),
            &config.watermark,
            config.seed,
        );
        Self { config, run }
    }

    pub fn config(&self) -> &ObfuscationConfig {
        &self.config
    }

    pub fn run_context(&self) -> &RunContext {
        &self.run
    }

    /// Forgets every name, mapping and counter of the previous run.
    pub fn reset(&mut self) {
        self.run.reset();
    }

    /// Renames recorded so far.
    pub fn mappings(&self) -> &MappingTable {
        &self.run.mappings
    }

    /// Totals of committed classes.
    pub fn stats(&self) -> &Stats {
        &self.run.stats
    }

    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.run.stats
    }

    /// Whether `class_name` matches the include patterns.
    pub fn matches(&self, class_name: &str) -> bool {
        self.run.matcher.matches(class_name)
    }

    /// Adds a class of the archive to the run's hierarchy, matched or not.
    pub fn register_class(&mut self, unit: &ClassUnit) {
        self.run.hierarchy.add_class(unit);
    }

    /// Runs the naming decisions for `unit`. Every class of the archive must be registered
    /// before the first scan.
    pub fn scan_class(&mut self, unit: &ClassUnit) {
        if !self.matches(&unit.name) {
            return;
        }
        if self.config.renames_classes() {
            ClassIdentityTransform::new(
                self.config.obfuscate_packages,
                self.config.obfuscate_class_names,
            )
            .scan(unit, &mut self.run);
        }
        if self.config.obfuscate_variables {
            MemberNameTransform::new().scan(unit, &mut self.run);
        }
        if self.config.obfuscate_method_names {
            MethodIdentityTransform::new().scan(unit, &mut self.run);
        }
    }

    /// Transforms one class at the configured flow level. Call [`Self::commit`] once the
    /// result is written.
    pub fn obfuscate_class(&mut self, bytes: &[u8]) -> Result<ObfuscatedClass, EngineError> {
        self.obfuscate_class_with_flow(bytes, self.config.flow_obfuscation)
    }

    /// Decodes, transforms and re-encodes one class with the given flow level.
    pub fn obfuscate_class_with_flow(
        &mut self,
        bytes: &[u8],
        flow: FlowLevel,
    ) -> Result<ObfuscatedClass, EngineError> {
        let mut unit = decode_class(bytes)?;
        let original_name = unit.name.clone();
        self.register_class(&unit);
        self.scan_class(&unit);

        let chain = TransformChainBuilder::new(&self.config).with_flow(flow).build();
        let mut cx = ClassContext::new(&mut self.run, original_name.as_str());
        let mut flow_applied = false;
        for transform in &chain {
            let outcome = transform.apply(&mut unit, &mut cx)?;
            if outcome.recovered > 0 {
                warn!(
                    "{}: kept {} unrewritable references in {}",
                    transform.name(),
                    outcome.recovered,
                    original_name
                );
            }
            debug!(
                "{} on {}: changed={}",
                transform.name(),
                original_name,
                outcome.changed
            );
            flow_applied |= transform.name() == "ControlFlow" && outcome.changed;
        }
        let stats = cx.stats;

        let encoded = encode_class(&unit, &self.run.resolver()).map_err(|e| {
            if flow_applied && is_flow_failure(&e) {
                EngineError::FlowSkipped {
                    class: original_name.clone(),
                    reason: e.to_string(),
                }
            } else {
                EngineError::Encode(e)
            }
        })?;

        Ok(ObfuscatedClass {
            original_name,
            name: unit.name,
            bytes: encoded,
            stats,
        })
    }

    /// Folds a written class into the run totals.
    pub fn commit(&mut self, class: &ObfuscatedClass) {
        self.run.stats.merge(&class.stats);
        self.run.stats.classes_obfuscated += 1;
    }
}

fn is_flow_failure(e: &EncodeError) -> bool {
    matches!(
        e,
        EncodeError::Frames { .. } | EncodeError::CodeTooLarge { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarcloak_core::class_ir::{access, MethodUnit};
    use jarcloak_core::insn::{Code, Insn, Loadable};
    use jarcloak_core::opcode;

    fn sample_class(name: &str) -> Vec<u8> {
        let mut unit = ClassUnit::new(52, access::PUBLIC | access::SUPER, name, Some("java/lang/Object"));
        let mut m = MethodUnit::new(access::PUBLIC | access::STATIC, "greet", "()Ljava/lang/String;");
        let mut code = Code::new(1);
        code.insns = vec![
            Insn::Ldc(Loadable::String("hello".into())),
            Insn::Var { op: opcode::ASTORE, var: 0 },
            Insn::Var { op: opcode::ALOAD, var: 0 },
            Insn::Simple(opcode::ARETURN),
        ];
        m.code = Some(code);
        unit.methods.push(m);
        encode_class(&unit, &jarcloak_core::frames::ObjectSuperResolver).unwrap()
    }

    #[test]
    fn config_reads_settings_layout() {
        let json = r#"{
            "include": ["com.example.*"],
            "obfuscateClassNames": true,
            "obfuscateStrings": true,
            "flowObfuscation": "EASY",
            "watermark": "x"
        }"#;
        let config = ObfuscationConfig::from_json(json).unwrap();
        assert_eq!(config.include, vec!["com.example.*"]);
        assert!(config.obfuscate_class_names && config.obfuscate_strings);
        assert!(!config.obfuscate_packages);
        assert_eq!(config.flow_obfuscation, FlowLevel::Light);
        assert_eq!(config.watermark, "x");
        assert_eq!(config.seed, None);
    }

    #[test]
    fn config_json_round_trips() {
        let mut config = ObfuscationConfig::full(["a.*"]);
        config.seed = Some(5);
        let back = ObfuscationConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn engine_renames_and_reencodes() {
        let mut config = ObfuscationConfig::full(["com.example.*"]);
        config.seed = Some(21);
        let mut engine = ObfuscationEngine::new(config);
        let out = engine.obfuscate_class(&sample_class("com/example/A")).unwrap();
        assert_eq!(out.original_name, "com/example/A");
        assert_ne!(out.name, "com/example/A");
        assert_eq!(engine.mappings().classes.renamed("com/example/A"), Some(out.name.as_str()));
        assert_eq!(out.stats.strings_obfuscated, 1);

        let decoded = decode_class(&out.bytes).unwrap();
        assert_eq!(decoded.name, out.name);
        assert!(decoded.methods.iter().any(|m| m.desc == "([BI)Ljava/lang/String;"));

        engine.commit(&out);
        assert_eq!(engine.stats().classes_obfuscated, 1);
        engine.reset();
        assert!(engine.mappings().classes.is_empty());
    }

    #[test]
    fn unmatched_class_keeps_its_identity() {
        let mut engine = ObfuscationEngine::new(ObfuscationConfig::full(["com.example.*"]));
        let out = engine.obfuscate_class(&sample_class("com/other/B")).unwrap();
        assert_eq!(out.name, "com/other/B");
        assert_eq!(out.stats, Stats::default());
    }
}
