//! Field and local-variable renaming.

use crate::context::{ClassContext, RunContext};
use crate::hierarchy::ClassHierarchy;
use crate::mapping::MappingTable;
use crate::naming::NamePool;
use crate::util::visit_code_handles;
use crate::{StageOutcome, Transform};
use jarcloak_core::class_ir::{access, FieldUnit};
use jarcloak_core::insn::{Handle, Insn};
use jarcloak_core::ClassUnit;
use jarcloak_utils::errors::TransformError;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const SERIAL_VERSION_UID: &str = "serialVersionUID";

/// Upper bound on fresh-name retries for one local; the pool only holds 260 names.
const MAX_LOCAL_ATTEMPTS: usize = 260;

/// Renames fields and local variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemberNameTransform;

impl MemberNameTransform {
    pub const fn new() -> Self {
        Self
    }

    fn field_renameable(field: &FieldUnit, names: &NamePool) -> bool {
        !field.is_synthetic()
            && field.access & access::ENUM == 0
            && field.name != SERIAL_VERSION_UID
            && !names.looks_generated(&field.name)
    }

    fn plan_fields(class: &str, fields: &[FieldUnit], run: &mut RunContext) {
        for field in fields {
            if run.mappings.field_name(class, &field.name).is_some()
                || !Self::field_renameable(field, &run.names)
            {
                continue;
            }
            let renamed = run.names.get_or_allocate(&format!("{class}.{}", field.name));
            run.mappings.record_field(class, &field.name, &renamed);
        }
    }

    /// Records the field renames of an included class, so other classes can follow them.
    pub fn scan(&self, unit: &ClassUnit, run: &mut RunContext) {
        if run.matcher.matches(&unit.name) {
            Self::plan_fields(&unit.name, &unit.fields, run);
        }
    }
}

/// New name of a field reference, following the JVM's field lookup through known super-types.
fn resolve_field<'a>(
    mappings: &'a MappingTable,
    hierarchy: &ClassHierarchy,
    owner: &str,
    name: &str,
) -> Option<&'a str> {
    let owner = mappings.classes.resolve_original(owner);
    for class in hierarchy.lookup_chain(owner) {
        if hierarchy.declares_field(class, name) {
            return mappings.field_name(class, name);
        }
    }
    mappings.field_name(owner, name)
}

impl Transform for MemberNameTransform {
    fn name(&self) -> &'static str {
        "MemberName"
    }

    fn apply(
        &self,
        unit: &mut ClassUnit,
        cx: &mut ClassContext<'_>,
    ) -> Result<StageOutcome, TransformError> {
        if !cx.is_included() {
            return Ok(StageOutcome::unchanged());
        }
        let original = cx.original_name.clone();
        Self::plan_fields(&original, &unit.fields, cx.run);
        let mut outcome = StageOutcome::default();

        for field in &mut unit.fields {
            if let Some(renamed) = cx.run.mappings.field_name(&original, &field.name) {
                field.name = renamed.to_string();
                cx.stats.variables_obfuscated += 1;
                outcome.changed = true;
            }
        }

        for method in &mut unit.methods {
            let Some(code) = &mut method.code else {
                continue;
            };
            let run = &*cx.run;
            for insn in &mut code.insns {
                if let Insn::Field { owner, name, .. } = insn {
                    if let Some(renamed) = resolve_field(&run.mappings, &run.hierarchy, owner, name) {
                        *name = renamed.to_string();
                        outcome.changed = true;
                    }
                }
            }
            visit_code_handles(code, &mut |handle: &mut Handle| {
                if !handle.is_field() {
                    return;
                }
                if let Some(renamed) =
                    resolve_field(&run.mappings, &run.hierarchy, &handle.owner, &handle.name)
                {
                    handle.name = renamed.to_string();
                    outcome.changed = true;
                }
            });
        }

        for method in &mut unit.methods {
            if method.name == "<clinit>" {
                continue;
            }
            let Some(code) = &mut method.code else {
                continue;
            };
            if code.local_vars.is_empty() {
                continue;
            }
            let method_key = format!(
                "{}{}",
                method.name,
                cx.run.mappings.original_descriptor(&method.desc)
            );
            let mut table: HashMap<String, String> = HashMap::new();
            let mut issued: HashSet<String> = HashSet::new();
            for local in &mut code.local_vars {
                if local.name.is_empty()
                    || local.name == "this"
                    || cx.run.names.looks_generated(&local.name)
                {
                    continue;
                }
                if let Some(renamed) = table.get(&local.name) {
                    local.name = renamed.clone();
                    continue;
                }
                // a retried class reuses the names it got the first time
                let recorded = cx
                    .run
                    .mappings
                    .local_name(&original, &method_key, &local.name)
                    .filter(|name| !issued.contains(*name))
                    .map(str::to_string);
                let fresh = recorded.or_else(|| {
                    (0..MAX_LOCAL_ATTEMPTS)
                        .map(|_| cx.run.names.allocate())
                        .find(|candidate| !issued.contains(candidate))
                });
                let Some(fresh) = fresh else {
                    debug!("no free local name left in {}.{}", original, method_key);
                    continue;
                };
                issued.insert(fresh.clone());
                cx.run
                    .mappings
                    .record_local(&original, &method_key, &local.name, &fresh);
                table.insert(std::mem::replace(&mut local.name, fresh.clone()), fresh);
                cx.stats.variables_obfuscated += 1;
                outcome.changed = true;
            }
        }

        Ok(outcome)
    }
}
