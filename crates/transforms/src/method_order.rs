use crate::context::ClassContext;
use crate::{StageOutcome, Transform};
use jarcloak_core::ClassUnit;
use jarcloak_utils::errors::TransformError;
use rand::seq::SliceRandom;

/// Shuffles the declaration order of ordinary methods; initializers stay first.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodOrderTransform;

impl MethodOrderTransform {
    pub const fn new() -> Self {
        Self
    }
}

impl Transform for MethodOrderTransform {
    fn name(&self) -> &'static str {
        "MethodOrder"
    }

    fn apply(
        &self,
        unit: &mut ClassUnit,
        cx: &mut ClassContext<'_>,
    ) -> Result<StageOutcome, TransformError> {
        if !cx.is_included() {
            return Ok(StageOutcome::unchanged());
        }
        let (mut ordered, mut rest): (Vec<_>, Vec<_>) = std::mem::take(&mut unit.methods)
            .into_iter()
            .partition(|m| m.is_initializer());
        if rest.len() < 2 {
            ordered.extend(rest);
            unit.methods = ordered;
            return Ok(StageOutcome::unchanged());
        }
        rest.shuffle(&mut cx.run.rng);
        cx.stats.methods_reordered += rest.len();
        ordered.extend(rest);
        unit.methods = ordered;
        Ok(StageOutcome {
            changed: true,
            recovered: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::matcher::IncludeMatcher;
    use jarcloak_core::class_ir::{access, MethodUnit};

    fn names(unit: &ClassUnit) -> Vec<String> {
        unit.methods.iter().map(|m| m.key()).collect()
    }

    #[test]
    fn initializers_lead_and_output_is_a_permutation() {
        let mut unit = ClassUnit::new(52, access::PUBLIC, "a/A", Some("java/lang/Object"));
        for i in 0..12 {
            unit.methods.push(MethodUnit::new(access::PUBLIC, format!("m{i}"), "()V"));
        }
        unit.methods.insert(3, MethodUnit::new(access::PUBLIC, "<init>", "()V"));
        unit.methods.insert(7, MethodUnit::new(access::STATIC, "<clinit>", "()V"));
        unit.methods.push(MethodUnit::new(access::PUBLIC, "<init>", "(I)V"));
        let before = names(&unit);

        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(99));
        let mut cx = ClassContext::new(&mut run, "a/A");
        let outcome = MethodOrderTransform::new().apply(&mut unit, &mut cx).unwrap();
        assert!(outcome.changed);
        assert_eq!(cx.stats.methods_reordered, 12);

        let after = names(&unit);
        assert_eq!(&after[..3], &["<init>()V", "<clinit>()V", "<init>(I)V"]);
        let mut sorted_before = before.clone();
        let mut sorted_after = after.clone();
        sorted_before.sort();
        sorted_after.sort();
        assert_eq!(sorted_before, sorted_after);
    }

    #[test]
    fn single_method_is_left_alone() {
        let mut unit = ClassUnit::new(52, access::PUBLIC, "a/A", Some("java/lang/Object"));
        unit.methods.push(MethodUnit::new(access::PUBLIC, "<init>", "()V"));
        unit.methods.push(MethodUnit::new(access::PUBLIC, "run", "()V"));
        let mut run = RunContext::new(IncludeMatcher::new(["a.*"]), "", Some(99));
        let mut cx = ClassContext::new(&mut run, "a/A");
        let outcome = MethodOrderTransform::new().apply(&mut unit, &mut cx).unwrap();
        assert!(!outcome.changed);
        assert_eq!(names(&unit), vec!["<init>()V", "run()V"]);
    }
}
