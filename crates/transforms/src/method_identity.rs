//! Method renaming.
//!
//! Runs in two phases. The scan decides, for every included class, which methods get which new
//! names; it needs the whole run's hierarchy, so it happens before any class is rewritten. The
//! transform then rewrites call sites, method handles and declarations from those decisions.
//!
//! Methods that override one another must keep sharing a name, so every method is named after
//! its family root: the topmost superclass that declares the same name and descriptor. A family
//! is left alone as soon as one member cannot be renamed (excluded class, interface, library
//! super-type, marker annotation, synthetic or bridge method).

use crate::context::{ClassContext, RunContext};
use crate::hierarchy::{ClassHierarchy, ClassInfo, MethodInfo};
use crate::mapping::MappingTable;
use crate::util::visit_code_handles;
use crate::{StageOutcome, Transform};
use jarcloak_core::class_ir::access;
use jarcloak_core::insn::{Handle, Insn};
use jarcloak_core::ClassUnit;
use jarcloak_utils::errors::TransformError;
use tracing::debug;

/// `java/lang/Object` members a class may override.
const OBJECT_METHODS: &[&str] = &[
    "toString()Ljava/lang/String;",
    "equals(Ljava/lang/Object;)Z",
    "hashCode()I",
    "clone()Ljava/lang/Object;",
    "finalize()V",
];

/// Looked up reflectively by `java/lang/Enum`.
const ENUM_METHODS: &[&str] = &["values", "valueOf"];

/// Renames methods one override family at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodIdentityTransform;

fn method_name_of(key: &str) -> &str {
    key.split('(').next().unwrap_or(key)
}

/// True if this declaration must keep its name whatever its family looks like.
fn pinned(class: &ClassInfo, key: &str, method: &MethodInfo) -> bool {
    let name = method_name_of(key);
    name.starts_with('<')
        || method.override_marker
        || method.access & (access::SYNTHETIC | access::BRIDGE) != 0
        || OBJECT_METHODS.contains(&key)
        || (class.access & access::ENUM != 0 && ENUM_METHODS.contains(&name))
}

/// Name key shared by the family `key` belongs to in `class`, or `None` if the family must keep
/// its original name.
fn family_root(run: &RunContext, class: &str, key: &str) -> Option<String> {
    let hierarchy = &run.hierarchy;
    let info = hierarchy.info(class)?;
    let method = info.methods.get(key)?;
    if method.access & access::PRIVATE != 0 {
        return (!pinned(info, key, method)).then(|| class.to_string());
    }

    let root = hierarchy
        .superclass_chain(class)
        .into_iter()
        .filter(|c| hierarchy.declares_method(c, key))
        .last()
        .unwrap_or(class)
        .to_string();
    let mut family = vec![root.clone()];
    family.extend(
        hierarchy
            .descendants(&root)
            .into_iter()
            .filter(|c| hierarchy.declares_method(c, key))
            .map(str::to_string),
    );

    let is_static = method.access & access::STATIC != 0;
    for member in &family {
        if !member_renameable(run, hierarchy, member, key, is_static) {
            debug!("keeping {}.{}: family member {} is pinned", class, key, member);
            return None;
        }
    }
    Some(root)
}

fn member_renameable(
    run: &RunContext,
    hierarchy: &ClassHierarchy,
    member: &str,
    key: &str,
    is_static: bool,
) -> bool {
    let Some(info) = hierarchy.info(member) else {
        return false;
    };
    let Some(method) = info.methods.get(key) else {
        return false;
    };
    if !run.matcher.matches(member) || info.is_interface() || pinned(info, key, method) {
        return false;
    }
    if !is_static && hierarchy.leaves_run(member) {
        return false;
    }
    !hierarchy
        .ancestors(member)
        .into_iter()
        .any(|a| hierarchy.is_interface(a) && hierarchy.declares_method(a, key))
}

/// New name for a call to `key` on `owner`, resolved like the JVM resolves methods.
fn resolve_method<'a>(
    mappings: &'a MappingTable,
    hierarchy: &ClassHierarchy,
    owner: &str,
    key: &str,
) -> Option<&'a str> {
    let owner = mappings.classes.resolve_original(owner);
    for class in hierarchy.lookup_chain(owner) {
        if hierarchy.declares_method(class, key) {
            return mappings.method_name(class, key);
        }
    }
    mappings.method_name(owner, key)
}

impl MethodIdentityTransform {
    pub const fn new() -> Self {
        Self
    }

    /// Decides the new method names of an included class. Must see the class under its
    /// original identity.
    pub fn scan(&self, unit: &ClassUnit, run: &mut RunContext) {
        if !run.matcher.matches(&unit.name) || unit.is_interface() {
            return;
        }
        run.hierarchy.add_class(unit);
        for method in &unit.methods {
            let key = method.key();
            if run.mappings.method_name(&unit.name, &key).is_some()
                || run.names.looks_generated(&method.name)
            {
                continue;
            }
            let Some(root) = family_root(run, &unit.name, &key) else {
                continue;
            };
            let renamed = run.names.get_or_allocate(&format!("{root}.{key}"));
            run.mappings.record_method(&unit.name, &key, &renamed);
        }
    }
}

impl Transform for MethodIdentityTransform {
    fn name(&self) -> &'static str {
        "MethodIdentity"
    }

    fn apply(
        &self,
        unit: &mut ClassUnit,
        cx: &mut ClassContext<'_>,
    ) -> Result<StageOutcome, TransformError> {
        if !cx.is_included() {
            return Ok(StageOutcome::unchanged());
        }
        let mut outcome = StageOutcome::default();
        let run = &*cx.run;
        let (mappings, hierarchy) = (&run.mappings, &run.hierarchy);

        for method in &mut unit.methods {
            let Some(code) = &mut method.code else {
                continue;
            };
            for insn in &mut code.insns {
                let Insn::Method { owner, name, desc, .. } = insn else {
                    continue;
                };
                if owner.starts_with('[') || name.starts_with('<') {
                    continue;
                }
                let key = format!("{name}{}", mappings.original_descriptor(desc));
                if let Some(renamed) = resolve_method(mappings, hierarchy, owner, &key) {
                    *name = renamed.to_string();
                    outcome.changed = true;
                }
            }
            visit_code_handles(code, &mut |handle: &mut Handle| {
                if handle.is_field() || handle.name.starts_with('<') {
                    return;
                }
                let key = format!("{}{}", handle.name, mappings.original_descriptor(&handle.desc));
                if let Some(renamed) = resolve_method(mappings, hierarchy, &handle.owner, &key) {
                    handle.name = renamed.to_string();
                    outcome.changed = true;
                }
            });
        }

        if let Some(enclosing) = &mut unit.enclosing_method {
            if let Some((name, desc)) = &mut enclosing.method {
                let key = format!("{name}{}", mappings.original_descriptor(desc));
                if let Some(renamed) = resolve_method(mappings, hierarchy, &enclosing.owner, &key) {
                    *name = renamed.to_string();
                    outcome.changed = true;
                }
            }
        }

        let mut renamed_count = 0;
        for method in &mut unit.methods {
            let key = format!("{}{}", method.name, mappings.original_descriptor(&method.desc));
            if let Some(renamed) = mappings.method_name(&cx.original_name, &key) {
                method.name = renamed.to_string();
                renamed_count += 1;
                outcome.changed = true;
            }
        }
        cx.stats.method_names_obfuscated += renamed_count;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::IncludeMatcher;
    use jarcloak_core::class_ir::{Annotation, MethodUnit};
    use jarcloak_core::insn::Code;
    use jarcloak_core::opcode;

    fn class(name: &str, super_name: &str, methods: &[(&str, &str, u16)]) -> ClassUnit {
        let mut unit = ClassUnit::new(52, access::PUBLIC, name, Some(super_name));
        for (m, desc, acc) in methods {
            unit.methods.push(MethodUnit::new(*acc, *m, *desc));
        }
        unit
    }

    fn scan_all(run: &mut RunContext, units: &[ClassUnit]) {
        for u in units {
            run.hierarchy.add_class(u);
        }
        for u in units {
            MethodIdentityTransform::new().scan(u, run);
        }
    }

    #[test]
    fn overriding_methods_share_one_name() {
        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(3));
        let base = class("a/Base", "java/lang/Object", &[("work", "()V", access::PUBLIC)]);
        let sub = class("a/Sub", "a/Base", &[("work", "()V", access::PUBLIC), ("extra", "()V", access::PUBLIC)]);
        scan_all(&mut run, &[base, sub]);
        let on_base = run.mappings.method_name("a/Base", "work()V").unwrap();
        assert_eq!(run.mappings.method_name("a/Sub", "work()V"), Some(on_base));
        assert!(run.mappings.method_name("a/Sub", "extra()V").is_some());
    }

    #[test]
    fn pinned_members_keep_their_names() {
        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(3));
        let mut unit = class(
            "a/A",
            "java/lang/Object",
            &[
                ("<init>", "()V", access::PUBLIC),
                ("toString", "()Ljava/lang/String;", access::PUBLIC),
                ("bridge", "()V", access::PUBLIC | access::BRIDGE),
                ("marked", "()V", access::PUBLIC),
                ("a0", "()V", access::PUBLIC),
                ("helper", "()V", access::PRIVATE),
            ],
        );
        unit.methods[3].annotations.invisible.push(Annotation {
            desc: "Ljava/lang/Override;".into(),
            values: Vec::new(),
        });
        scan_all(&mut run, &[unit]);
        for key in ["<init>()V", "toString()Ljava/lang/String;", "bridge()V", "marked()V", "a0()V"] {
            assert_eq!(run.mappings.method_name("a/A", key), None, "{key}");
        }
        assert!(run.mappings.method_name("a/A", "helper()V").is_some());
    }

    #[test]
    fn families_touching_excluded_or_library_types_are_left_alone() {
        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(3));
        let outside = class("b/Base", "java/lang/Object", &[("work", "()V", access::PUBLIC)]);
        let inside = class("a/Sub", "b/Base", &[("work", "()V", access::PUBLIC)]);
        let mut task = class("a/Task", "java/lang/Object", &[("run", "()V", access::PUBLIC)]);
        task.interfaces.push("java/lang/Runnable".into());
        let mut iface = class("a/Api", "java/lang/Object", &[("call", "()V", access::PUBLIC | access::ABSTRACT)]);
        iface.access = access::PUBLIC | access::INTERFACE | access::ABSTRACT;
        let mut impl_ = class("a/Impl", "java/lang/Object", &[("call", "()V", access::PUBLIC)]);
        impl_.interfaces.push("a/Api".into());
        scan_all(&mut run, &[outside, inside, task, iface, impl_]);
        assert_eq!(run.mappings.method_name("a/Sub", "work()V"), None);
        assert_eq!(run.mappings.method_name("a/Task", "run()V"), None);
        assert_eq!(run.mappings.method_name("a/Impl", "call()V"), None);
    }

    #[test]
    fn call_sites_follow_renames() {
        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(3));
        let base = class("a/Base", "java/lang/Object", &[("work", "()V", access::PUBLIC)]);
        let mut caller = class("a/Caller", "java/lang/Object", &[]);
        let mut m = MethodUnit::new(access::PUBLIC | access::STATIC, "go", "(La/Sub;)V");
        let mut code = Code::new(1);
        code.insns = vec![
            Insn::Var { op: opcode::ALOAD, var: 0 },
            Insn::Method {
                op: opcode::INVOKEVIRTUAL,
                owner: "a/Sub".into(),
                name: "work".into(),
                desc: "()V".into(),
                interface: false,
            },
            Insn::Simple(opcode::RETURN),
        ];
        m.code = Some(code);
        caller.methods.push(m);
        let sub = class("a/Sub", "a/Base", &[]);
        scan_all(&mut run, &[base, sub, caller.clone()]);

        let expected = run.mappings.method_name("a/Base", "work()V").unwrap().to_string();
        let mut cx = ClassContext::new(&mut run, "a/Caller");
        let outcome = MethodIdentityTransform::new().apply(&mut caller, &mut cx).unwrap();
        assert!(outcome.changed);
        let code = caller.methods[0].code.as_ref().unwrap();
        assert!(matches!(&code.insns[1], Insn::Method { name, .. } if *name == expected));
        // the declaration itself was renamed too
        assert_ne!(caller.methods[0].name, "go");
        assert_eq!(cx.stats.method_names_obfuscated, 1);
    }
}
