//! Class and package renaming, plus the fix-up of every reference to a renamed class.

use crate::context::{ClassContext, RunContext};
use crate::mapping::MappingTable;
use crate::naming::NamePool;
use crate::util::apply_rewrite;
use crate::{StageOutcome, Transform};
use jarcloak_core::class_ir::{Annotation, Annotations, ElementValue};
use jarcloak_core::descriptor::{
    package_of, remap_class_constant, remap_descriptor, remap_signature, simple_name,
};
use jarcloak_core::insn::{Code, FrameType, Handle, Insn, Loadable};
use jarcloak_core::ClassUnit;
use jarcloak_utils::errors::TransformError;
use tracing::debug;

/// Simple names the JVM gives meaning to; such classes keep their identity.
const RESERVED: &[&str] = &["package-info", "module-info"];

/// Renames included classes and their packages, and rewrites class references everywhere.
#[derive(Debug, Clone, Copy)]
pub struct ClassIdentityTransform {
    packages: bool,
    classes: bool,
}

impl ClassIdentityTransform {
    /// `packages` renames package segments, `classes` renames simple names.
    pub const fn new(packages: bool, classes: bool) -> Self {
        Self { packages, classes }
    }

    /// New identity of `name`. Package segments and simple names share one token per distinct
    /// original text across the whole run.
    pub fn renamed_identity(&self, name: &str, names: &mut NamePool) -> String {
        let package = package_of(name).map(|pkg| {
            if self.packages {
                pkg.split('/')
                    .map(|segment| names.get_or_allocate(&format!("pkg.{segment}")))
                    .collect::<Vec<_>>()
                    .join("/")
            } else {
                pkg.to_string()
            }
        });
        let simple = simple_name(name);
        let simple = if self.classes {
            names.get_or_allocate(&format!("cls.{simple}"))
        } else {
            simple.to_string()
        };
        match package {
            Some(pkg) => format!("{pkg}/{simple}"),
            None => simple,
        }
    }

    /// Records the new identity of an included class. Returns true if the class gets renamed.
    pub fn scan(&self, unit: &ClassUnit, run: &mut RunContext) -> bool {
        if !(self.packages || self.classes) || !run.matcher.matches(&unit.name) {
            return false;
        }
        if let Some(existing) = run.mappings.classes.renamed(&unit.name) {
            return existing != unit.name;
        }
        if RESERVED.contains(&simple_name(&unit.name)) {
            return false;
        }
        let renamed = self.renamed_identity(&unit.name, &mut run.names);
        if renamed == unit.name {
            return false;
        }
        debug!("{} -> {}", unit.name, renamed);
        run.mappings.classes.insert(&unit.name, &renamed)
    }
}

impl Transform for ClassIdentityTransform {
    fn name(&self) -> &'static str {
        "ClassIdentity"
    }

    fn apply(
        &self,
        unit: &mut ClassUnit,
        cx: &mut ClassContext<'_>,
    ) -> Result<StageOutcome, TransformError> {
        if !cx.is_included() {
            return Ok(StageOutcome::unchanged());
        }
        self.scan(unit, cx.run);
        if cx.run.mappings.classes.is_empty() {
            return Ok(StageOutcome::unchanged());
        }

        let before = unit.name.clone();
        let mut renamer = Renamer {
            mappings: &cx.run.mappings,
            outcome: StageOutcome::default(),
            classes: self.classes,
        };
        renamer.class(unit);
        if unit.name != before {
            cx.stats.class_names_obfuscated += 1;
        }
        Ok(renamer.outcome)
    }
}

/// Walks a class and rewrites every class identity through the run's class map.
struct Renamer<'a> {
    mappings: &'a MappingTable,
    outcome: StageOutcome,
    /// Simple names changed too, so `InnerClasses` names follow.
    classes: bool,
}

impl Renamer<'_> {
    fn class_ref(&mut self, name: &mut String) {
        let mappings = self.mappings;
        let rewritten = remap_class_constant(name, &|n: &str| mappings.rename_class(n));
        apply_rewrite(name, rewritten, &mut self.outcome);
    }

    fn descriptor(&mut self, desc: &mut String) {
        let mappings = self.mappings;
        let rewritten = remap_descriptor(desc, &|n: &str| mappings.rename_class(n));
        apply_rewrite(desc, rewritten, &mut self.outcome);
    }

    fn signature(&mut self, signature: &mut Option<String>) {
        if let Some(sig) = signature {
            let mappings = self.mappings;
            let rewritten = remap_signature(sig, &|n: &str| mappings.rename_class(n));
            apply_rewrite(sig, rewritten, &mut self.outcome);
        }
    }

    fn handle(&mut self, handle: &mut Handle) {
        self.class_ref(&mut handle.owner);
        self.descriptor(&mut handle.desc);
    }

    fn loadable(&mut self, value: &mut Loadable) {
        match value {
            Loadable::Class(name) => self.class_ref(name),
            Loadable::MethodType(desc) => self.descriptor(desc),
            Loadable::MethodHandle(handle) => self.handle(handle),
            Loadable::Dynamic(condy) => {
                self.descriptor(&mut condy.desc);
                self.handle(&mut condy.bsm);
                for arg in &mut condy.args {
                    self.loadable(arg);
                }
            }
            _ => {}
        }
    }

    fn element(&mut self, value: &mut ElementValue) {
        match value {
            ElementValue::Enum { desc, .. } => self.descriptor(desc),
            ElementValue::Class(desc) if desc != "V" => self.descriptor(desc),
            ElementValue::Annotation(nested) => self.annotation(nested),
            ElementValue::Array(values) => values.iter_mut().for_each(|v| self.element(v)),
            _ => {}
        }
    }

    fn annotation(&mut self, annotation: &mut Annotation) {
        self.descriptor(&mut annotation.desc);
        for (_, value) in &mut annotation.values {
            self.element(value);
        }
    }

    fn annotations(&mut self, annotations: &mut Annotations) {
        for a in annotations
            .visible
            .iter_mut()
            .chain(annotations.invisible.iter_mut())
        {
            self.annotation(a);
        }
        for ta in annotations
            .visible_type
            .iter_mut()
            .chain(annotations.invisible_type.iter_mut())
        {
            self.annotation(&mut ta.annotation);
        }
    }

    fn code(&mut self, code: &mut Code) {
        for insn in &mut code.insns {
            match insn {
                Insn::Type { class, .. } => self.class_ref(class),
                Insn::Field { owner, desc, .. } => {
                    self.class_ref(owner);
                    self.descriptor(desc);
                }
                Insn::Method { owner, desc, .. } => {
                    self.class_ref(owner);
                    self.descriptor(desc);
                }
                Insn::InvokeDynamic { desc, bsm, args, .. } => {
                    self.descriptor(desc);
                    self.handle(bsm);
                    for arg in args {
                        self.loadable(arg);
                    }
                }
                Insn::Ldc(value) => self.loadable(value),
                Insn::MultiANewArray { desc, .. } => self.class_ref(desc),
                _ => {}
            }
        }
        for tc in &mut code.try_catches {
            if let Some(catch_type) = &mut tc.catch_type {
                self.class_ref(catch_type);
            }
        }
        for local in &mut code.local_vars {
            self.descriptor(&mut local.desc);
            self.signature(&mut local.signature);
        }
        for (_, frame) in &mut code.frames {
            for ty in frame.locals.iter_mut().chain(frame.stack.iter_mut()) {
                if let FrameType::Object(name) = ty {
                    self.class_ref(name);
                }
            }
        }
    }

    fn class(&mut self, unit: &mut ClassUnit) {
        self.class_ref(&mut unit.name);
        if let Some(super_name) = &mut unit.super_name {
            self.class_ref(super_name);
        }
        for iface in &mut unit.interfaces {
            self.class_ref(iface);
        }
        self.signature(&mut unit.signature);
        self.annotations(&mut unit.annotations);

        for field in &mut unit.fields {
            self.descriptor(&mut field.desc);
            self.signature(&mut field.signature);
            self.annotations(&mut field.annotations);
        }

        for method in &mut unit.methods {
            self.descriptor(&mut method.desc);
            self.signature(&mut method.signature);
            for exception in &mut method.exceptions {
                self.class_ref(exception);
            }
            self.annotations(&mut method.annotations);
            for params in [
                &mut method.visible_parameter_annotations,
                &mut method.invisible_parameter_annotations,
            ]
            .into_iter()
            .flatten()
            {
                for a in params.iter_mut().flatten() {
                    self.annotation(a);
                }
            }
            if let Some(default) = &mut method.annotation_default {
                self.element(default);
            }
            if let Some(code) = &mut method.code {
                self.code(code);
            }
        }

        for inner in &mut unit.inner_classes {
            let before = inner.inner.clone();
            self.class_ref(&mut inner.inner);
            if self.classes && inner.inner != before && inner.name.is_some() {
                inner.name = Some(simple_name(&inner.inner).to_string());
            }
            if let Some(outer) = &mut inner.outer {
                self.class_ref(outer);
            }
        }
        if let Some(enclosing) = &mut unit.enclosing_method {
            self.class_ref(&mut enclosing.owner);
            if let Some((_, desc)) = &mut enclosing.method {
                self.descriptor(desc);
            }
        }
        if let Some(host) = &mut unit.nest_host {
            self.class_ref(host);
        }
        for member in unit
            .nest_members
            .iter_mut()
            .chain(unit.permitted_subclasses.iter_mut())
        {
            self.class_ref(member);
        }
        if let Some(components) = &mut unit.record {
            for component in components {
                self.descriptor(&mut component.desc);
                self.signature(&mut component.signature);
                self.annotations(&mut component.annotations);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::IncludeMatcher;
    use jarcloak_core::class_ir::{access, InnerClass, MethodUnit};
    use jarcloak_core::insn::{DeclaredFrame, TryCatch};
    use jarcloak_core::opcode;

    fn run(patterns: &[&str]) -> RunContext {
        RunContext::new(IncludeMatcher::new(patterns), "", Some(1))
    }

    #[test]
    fn shared_simple_name_gets_shared_token() {
        let stage = ClassIdentityTransform::new(true, true);
        let mut names = NamePool::default();
        let a = stage.renamed_identity("a/Foo", &mut names);
        let b = stage.renamed_identity("b/Foo", &mut names);
        let (pa, sa) = a.split_once('/').unwrap();
        let (pb, sb) = b.split_once('/').unwrap();
        assert_ne!(pa, pb);
        assert_eq!(sa, sb);
    }

    #[test]
    fn strategy_follows_flags() {
        let mut names = NamePool::default();
        let packages_only = ClassIdentityTransform::new(true, false);
        assert_eq!(packages_only.renamed_identity("com/x/Foo", &mut names), "a0/a1/Foo");
        assert_eq!(packages_only.renamed_identity("Foo", &mut names), "Foo");
        let classes_only = ClassIdentityTransform::new(false, true);
        assert_eq!(classes_only.renamed_identity("com/x/Foo", &mut names), "com/x/a2");
        assert_eq!(classes_only.renamed_identity("Bar", &mut names), "a3");
    }

    #[test]
    fn scan_skips_excluded_and_reserved_classes() {
        let stage = ClassIdentityTransform::new(true, true);
        let mut cx = run(&["com.example.*"]);
        let other = ClassUnit::new(52, access::PUBLIC, "com/other/B", Some("java/lang/Object"));
        let info = ClassUnit::new(52, access::INTERFACE, "com/example/package-info", None);
        let main = ClassUnit::new(52, access::PUBLIC, "com/example/A", Some("java/lang/Object"));
        assert!(!stage.scan(&other, &mut cx));
        assert!(!stage.scan(&info, &mut cx));
        assert!(stage.scan(&main, &mut cx));
        assert!(stage.scan(&main, &mut cx));
        assert_eq!(cx.mappings.classes.len(), 1);
    }

    #[test]
    fn rewrites_references_throughout_the_class() {
        let stage = ClassIdentityTransform::new(true, true);
        let mut run = run(&["com.example.*"]);
        let helper = ClassUnit::new(52, access::PUBLIC, "com/example/Helper", Some("java/lang/Object"));
        stage.scan(&helper, &mut run);

        let mut unit = ClassUnit::new(52, access::PUBLIC, "com/example/A", Some("com/example/Helper"));
        unit.signature = Some("Lcom/example/Helper;Ljava/util/List<Lcom/example/Helper;>;".into());
        unit.inner_classes.push(InnerClass {
            inner: "com/example/Helper".into(),
            outer: Some("com/example/A".into()),
            name: Some("Helper".into()),
            access: access::PUBLIC,
        });
        let mut m = MethodUnit::new(access::PUBLIC, "make", "(Lcom/example/Helper;)[Lcom/example/Helper;");
        let mut code = Code::new(2);
        let handler = code.new_label();
        let (start, end) = (code.new_label(), code.new_label());
        code.insns = vec![
            Insn::Label(start),
            Insn::Type { op: opcode::NEW, class: "com/example/Helper".into() },
            Insn::Ldc(Loadable::Class("[Lcom/example/Helper;".into())),
            Insn::Label(end),
            Insn::Label(handler),
        ];
        code.try_catches.push(TryCatch {
            start,
            end,
            handler,
            catch_type: Some("com/example/Helper".into()),
        });
        code.frames.push((
            handler,
            DeclaredFrame {
                locals: vec![FrameType::Object("com/example/Helper".into())],
                stack: Vec::new(),
            },
        ));
        m.code = Some(code);
        unit.methods.push(m);

        let mut cx = ClassContext::new(&mut run, "com/example/A");
        let outcome = stage.apply(&mut unit, &mut cx).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.recovered, 0);
        assert_eq!(cx.stats.class_names_obfuscated, 1);

        let helper = cx.run.mappings.classes.renamed("com/example/Helper").unwrap().to_string();
        let a = cx.run.mappings.classes.renamed("com/example/A").unwrap().to_string();
        assert_eq!(unit.name, a);
        assert_eq!(unit.super_name.as_deref(), Some(helper.as_str()));
        assert_eq!(
            unit.signature.as_deref(),
            Some(format!("L{helper};Ljava/util/List<L{helper};>;").as_str())
        );
        assert_eq!(unit.methods[0].desc, format!("(L{helper};)[L{helper};"));
        assert_eq!(unit.inner_classes[0].name.as_deref(), Some(simple_name(&helper)));
        let code = unit.methods[0].code.as_ref().unwrap();
        assert_eq!(code.insns[1], Insn::Type { op: opcode::NEW, class: helper.clone() });
        assert_eq!(code.insns[2], Insn::Ldc(Loadable::Class(format!("[L{helper};"))));
        assert_eq!(code.try_catches[0].catch_type.as_deref(), Some(helper.as_str()));
        assert_eq!(code.frames[0].1.locals[0], FrameType::Object(helper));
    }

    #[test]
    fn malformed_signature_is_recovered() {
        let stage = ClassIdentityTransform::new(false, true);
        let mut run = run(&["x.*"]);
        let mut unit = ClassUnit::new(52, access::PUBLIC, "x/A", Some("java/lang/Object"));
        unit.signature = Some("<T:".into());
        let mut cx = ClassContext::new(&mut run, "x/A");
        let outcome = stage.apply(&mut unit, &mut cx).unwrap();
        assert_eq!(outcome.recovered, 1);
        assert_eq!(unit.signature.as_deref(), Some("<T:"));
        assert_eq!(unit.name, "x/a0");
    }
}
