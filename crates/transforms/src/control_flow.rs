//! Dead-branch insertion after local-variable stores.

use crate::context::ClassContext;
use crate::frame_resolver::SafeFrameResolver;
use crate::frame_safety::FrameSafetyRepairer;
use crate::{StageOutcome, Transform};
use jarcloak_core::frames::{self, CommonSuperResolver, MethodContext};
use jarcloak_core::insn::{Code, Insn};
use jarcloak_core::opcode;
use jarcloak_core::ClassUnit;
use jarcloak_utils::errors::{FrameError, TransformError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How much dead control flow to add.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowLevel {
    #[default]
    None,
    #[serde(alias = "EASY")]
    Light,
    Heavy,
}

impl FromStr for FlowLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "light" | "easy" => Ok(Self::Light),
            "heavy" => Ok(Self::Heavy),
            other => Err(format!("unknown flow level `{other}`")),
        }
    }
}

impl fmt::Display for FlowLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Light => "LIGHT",
            Self::Heavy => "HEAVY",
        })
    }
}

/// One sampling pass over a body.
struct Pass {
    min_insns: usize,
    nops: usize,
    count: fn(usize) -> usize,
}

fn light_count(points: usize) -> usize {
    (points / 8).clamp(1, 5)
}

fn heavy_count(points: usize) -> usize {
    (points / 4).clamp(3, 15)
}

const LIGHT: Pass = Pass {
    min_insns: 3,
    nops: 1,
    count: light_count,
};

const HEAVY: Pass = Pass {
    min_insns: 5,
    nops: 3,
    count: heavy_count,
};

/// Inserts never-taken branches after local stores.
#[derive(Debug, Clone, Copy)]
pub struct ControlFlowTransform {
    level: FlowLevel,
}

impl ControlFlowTransform {
    pub const fn new(level: FlowLevel) -> Self {
        Self { level }
    }

    pub const fn level(&self) -> FlowLevel {
        self.level
    }

    const fn passes(&self) -> &'static [Pass] {
        match self.level {
            FlowLevel::None => &[],
            FlowLevel::Light => &[LIGHT],
            FlowLevel::Heavy => &[LIGHT, HEAVY],
        }
    }
}

/// Positions right after every reachable local store that is followed by more code.
fn insertion_points(
    code: &Code,
    ctx: &MethodContext<'_>,
    resolver: &dyn CommonSuperResolver,
) -> Result<Vec<usize>, FrameError> {
    let heights = frames::stack_heights(code, ctx, resolver)?;
    Ok(code
        .insns
        .iter()
        .enumerate()
        .filter(|(i, insn)| {
            matches!(insn, Insn::Var { op, .. } if opcode::is_store(*op))
                && heights[*i].is_some()
                && code.insns[i + 1..].iter().any(Insn::is_real)
        })
        .map(|(i, _)| i + 1)
        .collect())
}

/// `iconst_1; dup; ifeq skip; nop*n; skip: pop`. Leaves the stack as it found it on both paths.
fn dead_block(code: &mut Code, nops: usize) -> Vec<Insn> {
    let skip = code.new_label();
    let mut block = vec![
        Insn::Simple(opcode::ICONST_1),
        Insn::Simple(opcode::DUP),
        Insn::Jump {
            op: opcode::IFEQ,
            target: skip,
        },
    ];
    block.extend(std::iter::repeat_n(Insn::Simple(opcode::NOP), nops));
    block.push(Insn::Label(skip));
    block.push(Insn::Simple(opcode::POP));
    block
}

/// Runs one pass over `code`; returns the number of real instructions added.
fn run_pass(
    pass: &Pass,
    code: &mut Code,
    ctx: &MethodContext<'_>,
    resolver: &dyn CommonSuperResolver,
    rng: &mut StdRng,
) -> Result<usize, FrameError> {
    if code.instruction_count() < pass.min_insns {
        return Ok(0);
    }
    let mut points = insertion_points(code, ctx, resolver)?;
    if points.is_empty() {
        return Ok(0);
    }
    let count = (pass.count)(points.len()).min(points.len());
    points.shuffle(rng);
    points.truncate(count);
    points.sort_unstable_by(|a, b| b.cmp(a));

    let mut added = 0;
    for at in points {
        let block = dead_block(code, pass.nops);
        added += block.iter().filter(|i| i.is_real()).count();
        code.insns.splice(at..at, block);
    }
    Ok(added)
}

fn skipped(unit: &ClassUnit, reason: impl fmt::Display) -> TransformError {
    TransformError::FlowSkipped {
        class: unit.name.clone(),
        reason: reason.to_string(),
    }
}

impl Transform for ControlFlowTransform {
    fn name(&self) -> &'static str {
        "ControlFlow"
    }

    fn apply(
        &self,
        unit: &mut ClassUnit,
        cx: &mut ClassContext<'_>,
    ) -> Result<StageOutcome, TransformError> {
        let passes = self.passes();
        if passes.is_empty() || !cx.is_included() {
            return Ok(StageOutcome::unchanged());
        }
        FrameSafetyRepairer::repair(unit).map_err(|e| skipped(unit, e))?;

        let mut outcome = StageOutcome::default();
        let class_name = unit.name.clone();
        for method in &mut unit.methods {
            if method.name.starts_with('<') {
                continue;
            }
            let Some(code) = &mut method.code else {
                continue;
            };
            if code.instruction_count() == 0 {
                continue;
            }
            let ctx = MethodContext {
                class_name: &class_name,
                name: &method.name,
                desc: &method.desc,
                access: method.access,
            };
            let mut added = 0;
            let run = &mut *cx.run;
            let resolver = SafeFrameResolver::new(&run.mappings, &run.hierarchy);
            for pass in passes {
                added += run_pass(pass, code, &ctx, &resolver, &mut run.rng).map_err(|e| {
                    TransformError::FlowSkipped {
                        class: class_name.clone(),
                        reason: format!("{}{}: {e}", method.name, method.desc),
                    }
                })?;
            }
            if added == 0 {
                continue;
            }
            code.invalidate();
            code.local_vars.clear();
            cx.stats.methods_flow_obfuscated += 1;
            cx.stats.instructions_added += added;
            outcome.changed = true;
            debug!("added {} instructions to {}.{}", added, class_name, method.name);
        }

        if outcome.changed {
            FrameSafetyRepairer::repair(unit).map_err(|e| skipped(unit, e))?;
        }
        Ok(outcome)
    }
}
