//! Sealing: the validation pass that freezes a function.
//!
//! A function can be sealed when every block ends in exactly one
//! terminator, every operand is defined by an instruction that dominates
//! its use, every branch target exists, and every `return` matches the
//! declared return type. Dominators are computed with the iterative
//! Cooper-Harvey-Kennedy algorithm over the reverse postorder.

use crate::Module;
use crate::arena::Handle;
use crate::error::IrError;
use crate::func::{Function, FunctionState};
use crate::instruction::{Block, Op, ValueDef};
use crate::types::Type;

const UNDEFINED: usize = usize::MAX;

/// Immediate dominators of the reachable blocks of a function.
#[derive(Clone, Debug)]
pub struct DominatorTree {
    rpo: Vec<Handle<Block>>,
    /// Position of each block in `rpo`, indexed by block handle.
    order: Vec<Option<usize>>,
    /// Immediate dominator of each `rpo` position.
    idom: Vec<usize>,
}

impl DominatorTree {
    pub fn new(function: &Function) -> Self {
        let rpo = function.reverse_postorder();
        let mut order = vec![None; function.blocks.len()];
        for (i, block) in rpo.iter().enumerate() {
            order[block.index()] = Some(i);
        }

        let mut preds = vec![Vec::new(); rpo.len()];
        for (i, &block) in rpo.iter().enumerate() {
            for succ in function.successors(block) {
                if let Some(Some(j)) = order.get(succ.index()) {
                    preds[*j].push(i);
                }
            }
        }

        let mut idom = vec![UNDEFINED; rpo.len()];
        if !rpo.is_empty() {
            idom[0] = 0;
        }
        let mut changed = true;
        while changed {
            changed = false;
            for b in 1..rpo.len() {
                let mut new_idom = UNDEFINED;
                for &p in &preds[b] {
                    if idom[p] == UNDEFINED {
                        continue;
                    }
                    new_idom = if new_idom == UNDEFINED {
                        p
                    } else {
                        intersect(&idom, p, new_idom)
                    };
                }
                if new_idom != UNDEFINED && idom[b] != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        Self { rpo, order, idom }
    }

    fn position(&self, block: Handle<Block>) -> Option<usize> {
        self.order.get(block.index()).copied().flatten()
    }

    pub fn is_reachable(&self, block: Handle<Block>) -> bool {
        self.position(block).is_some()
    }

    /// Returns `true` if every path from the entry to `b` passes through `a`.
    pub fn dominates(&self, a: Handle<Block>, b: Handle<Block>) -> bool {
        let (Some(a), Some(mut b)) = (self.position(a), self.position(b)) else {
            return false;
        };
        while b > a {
            b = self.idom[b];
        }
        a == b
    }

    pub fn immediate_dominator(&self, block: Handle<Block>) -> Option<Handle<Block>> {
        match self.position(block)? {
            0 => None,
            i => Some(self.rpo[self.idom[i]]),
        }
    }
}

fn intersect(idom: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a > b {
            a = idom[a];
        }
        while b > a {
            b = idom[b];
        }
    }
    a
}

struct Checker<'a> {
    module: &'a Module,
    function: &'a Function,
}

impl Checker<'_> {
    fn malformed(
        &self,
        block: Option<Handle<Block>>,
        instruction: Option<usize>,
        reason: impl Into<String>,
    ) -> IrError {
        IrError::MalformedFunction {
            function: self.function.name.clone(),
            block: block.map(Handle::index),
            instruction,
            reason: reason.into(),
        }
    }

    fn check(&self) -> Result<(), IrError> {
        let func = self.function;
        match func.state {
            FunctionState::Failed => {
                return Err(IrError::FunctionFailed {
                    function: func.name.clone(),
                });
            }
            FunctionState::Empty => return Err(self.malformed(None, None, "function has no body")),
            FunctionState::InProgress | FunctionState::Sealed => {}
        }
        if func.entry.is_none() {
            return Err(self.malformed(None, None, "function has no entry block"));
        }

        self.check_terminators()?;
        self.check_dominance()?;
        self.check_returns()
    }

    fn check_terminators(&self) -> Result<(), IrError> {
        let func = self.function;
        for (block, data) in func.blocks.iter() {
            if data.instructions.is_empty() {
                return Err(self.malformed(Some(block), None, "block has no terminator"));
            }
            let last = data.instructions.len() - 1;
            for (pos, &inst) in data.instructions.iter().enumerate() {
                let Some(instruction) = func.instructions.try_get(inst) else {
                    return Err(self.malformed(Some(block), Some(pos), "dangling instruction"));
                };
                if instruction.block != block {
                    return Err(self.malformed(
                        Some(block),
                        Some(pos),
                        "instruction is recorded in another block",
                    ));
                }
                let is_terminator = instruction.op.is_terminator();
                if is_terminator && pos != last {
                    return Err(self.malformed(
                        Some(block),
                        Some(pos),
                        "terminator in the middle of a block",
                    ));
                }
                if !is_terminator && pos == last {
                    return Err(self.malformed(
                        Some(block),
                        Some(pos),
                        "block does not end with a terminator",
                    ));
                }
                if is_terminator {
                    for target in instruction.op.structured_successors() {
                        if !func.blocks.contains(target) {
                            return Err(self.malformed(
                                Some(block),
                                Some(pos),
                                format!("branch to missing block {}", target.index()),
                            ));
                        }
                    }
                }
                if let Some(result) = instruction.result {
                    let defined_here = func
                        .values
                        .try_get(result)
                        .is_some_and(|v| v.def == ValueDef::Instruction(inst));
                    if !defined_here {
                        return Err(self.malformed(
                            Some(block),
                            Some(pos),
                            "result value does not point back at its instruction",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_dominance(&self) -> Result<(), IrError> {
        let func = self.function;
        let tree = DominatorTree::new(func);

        let mut positions = vec![None; func.instructions.len()];
        for (block, data) in func.blocks.iter() {
            for (pos, inst) in data.instructions.iter().enumerate() {
                positions[inst.index()] = Some((block, pos));
            }
        }

        for (block, data) in func.blocks.iter() {
            let reachable = tree.is_reachable(block);
            for (pos, &inst) in data.instructions.iter().enumerate() {
                for operand in func.instructions[inst].op.operands() {
                    let Some(value) = func.values.try_get(operand) else {
                        return Err(self.malformed(
                            Some(block),
                            Some(pos),
                            format!("operand %{} does not exist", operand.index()),
                        ));
                    };
                    match value.def {
                        ValueDef::Parameter(i) => {
                            if i as usize >= func.parameters.len() {
                                return Err(self.malformed(
                                    Some(block),
                                    Some(pos),
                                    format!("parameter {i} does not exist"),
                                ));
                            }
                        }
                        ValueDef::Constant(c) => {
                            if self.module.constants.try_get(c).is_none() {
                                return Err(self.malformed(
                                    Some(block),
                                    Some(pos),
                                    "operand refers to a missing constant",
                                ));
                            }
                        }
                        ValueDef::Global(g) => {
                            if !self.module.global_variables.contains(g) {
                                return Err(self.malformed(
                                    Some(block),
                                    Some(pos),
                                    "operand refers to a missing global",
                                ));
                            }
                        }
                        ValueDef::Instruction(def) => {
                            let Some((def_block, def_pos)) =
                                positions.get(def.index()).copied().flatten()
                            else {
                                return Err(self.malformed(
                                    Some(block),
                                    Some(pos),
                                    "operand is defined outside any block",
                                ));
                            };
                            if !reachable {
                                continue;
                            }
                            let dominated = if def_block == block {
                                def_pos < pos
                            } else {
                                tree.dominates(def_block, block)
                            };
                            if !dominated {
                                return Err(self.malformed(
                                    Some(block),
                                    Some(pos),
                                    "use is not dominated by its definition",
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_returns(&self) -> Result<(), IrError> {
        let func = self.function;
        let types = &self.module.types;
        let is_void = matches!(types.try_get(func.return_type), Some(Type::Void));
        for (block, data) in func.blocks.iter() {
            let Some(&last) = data.instructions.last() else {
                continue;
            };
            let Op::Return { value } = func.instructions[last].op else {
                continue;
            };
            let pos = Some(data.instructions.len() - 1);
            match value {
                Some(_) if is_void => {
                    return Err(self.malformed(
                        Some(block),
                        pos,
                        "returns a value from a void function",
                    ));
                }
                None if !is_void => {
                    return Err(self.malformed(
                        Some(block),
                        pos,
                        format!(
                            "missing return value of type {}",
                            types.type_name(func.return_type)
                        ),
                    ));
                }
                Some(v) => {
                    let ty = func.values[v].ty;
                    if ty != func.return_type {
                        return Err(self.malformed(
                            Some(block),
                            pos,
                            format!(
                                "returns {}, expected {}",
                                types.type_name(ty),
                                types.type_name(func.return_type)
                            ),
                        ));
                    }
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Validates `function` against the sealing invariants.
pub(crate) fn check_function(module: &Module, function: &Function) -> Result<(), IrError> {
    Checker { module, function }.check()
}
