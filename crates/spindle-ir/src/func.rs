//! Functions, pipeline stages and block layout.

use std::collections::HashMap;

use crate::arena::{Arena, Handle};
use crate::constant::Constant;
use crate::global::{Binding, GlobalVariable};
use crate::instruction::{Block, Instruction, Op, Value, ValueDef};
use crate::types::Type;

/// Pipeline stage of an entry-point function.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum PipelineStage {
    Vertex,
    Fragment,
    Compute { workgroup_size: [u32; 3] },
}

impl PipelineStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute { .. } => "compute",
        }
    }
}

/// Construction state of a function.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum FunctionState {
    /// Declared, no body yet.
    Empty,
    /// A builder has created the entry block.
    InProgress,
    /// Validated and ready for translation.
    Sealed,
    /// An instruction failed type checking; the function can't be finished.
    Failed,
}

/// A formal parameter.
#[derive(Clone, Debug)]
pub struct FunctionParameter {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    /// Stage input binding, for entry points.
    pub binding: Option<Binding>,
}

/// Signature used to declare a function.
#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Handle<Type>,
    pub result_binding: Option<Binding>,
    pub stage: Option<PipelineStage>,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, return_type: Handle<Type>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            return_type,
            result_binding: None,
            stage: None,
        }
    }

    pub fn parameter(
        mut self,
        name: impl Into<String>,
        ty: Handle<Type>,
        binding: Option<Binding>,
    ) -> Self {
        self.parameters.push(FunctionParameter {
            name: Some(name.into()),
            ty,
            binding,
        });
        self
    }

    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn result_binding(mut self, binding: Binding) -> Self {
        self.result_binding = Some(binding);
        self
    }
}

/// An IR function: a control-flow graph of blocks.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    pub return_type: Handle<Type>,
    pub result_binding: Option<Binding>,
    pub stage: Option<PipelineStage>,
    pub values: Arena<Value>,
    pub instructions: Arena<Instruction>,
    pub blocks: Arena<Block>,
    pub entry: Option<Handle<Block>>,
    pub(crate) state: FunctionState,
    pub(crate) parameter_values: Vec<Handle<Value>>,
    pub(crate) cursor: Option<Handle<Block>>,
    pub(crate) variable_count: usize,
    pub(crate) constant_values: HashMap<Handle<Constant>, Handle<Value>>,
    pub(crate) global_values: HashMap<Handle<GlobalVariable>, Handle<Value>>,
    pub(crate) pure_values: HashMap<(Handle<Block>, Op, Handle<Type>), Handle<Value>>,
}

impl Function {
    pub(crate) fn from_decl(decl: FunctionDecl) -> Self {
        let mut values = Arena::new();
        let parameter_values = decl
            .parameters
            .iter()
            .enumerate()
            .map(|(i, p)| {
                values.append(Value {
                    ty: p.ty,
                    def: ValueDef::Parameter(i as u32),
                    name: p.name.clone(),
                })
            })
            .collect();
        Self {
            name: decl.name,
            parameters: decl.parameters,
            return_type: decl.return_type,
            result_binding: decl.result_binding,
            stage: decl.stage,
            values,
            instructions: Arena::new(),
            blocks: Arena::new(),
            entry: None,
            state: FunctionState::Empty,
            parameter_values,
            cursor: None,
            variable_count: 0,
            constant_values: HashMap::new(),
            global_values: HashMap::new(),
            pure_values: HashMap::new(),
        }
    }

    pub fn state(&self) -> FunctionState {
        self.state
    }

    pub fn is_entry_point(&self) -> bool {
        self.stage.is_some()
    }

    /// Value of the `index`-th parameter.
    pub fn parameter_value(&self, index: usize) -> Option<Handle<Value>> {
        self.parameter_values.get(index).copied()
    }

    /// The terminating instruction of `block`, if it has one.
    pub fn terminator(&self, block: Handle<Block>) -> Option<&Instruction> {
        let last = *self.blocks.try_get(block)?.instructions.last()?;
        self.instructions
            .try_get(last)
            .filter(|inst| inst.op.is_terminator())
    }

    /// Control-flow successors of `block`.
    pub fn successors(&self, block: Handle<Block>) -> Vec<Handle<Block>> {
        self.terminator(block)
            .map(|inst| inst.op.successors())
            .unwrap_or_default()
    }

    fn structured_successors(&self, block: Handle<Block>) -> Vec<Handle<Block>> {
        self.terminator(block)
            .map(|inst| inst.op.structured_successors())
            .unwrap_or_default()
    }

    /// Depth-first postorder from `entry`, visiting children in the order
    /// `children` returns them.
    pub(crate) fn postorder(
        &self,
        entry: Handle<Block>,
        children: impl Fn(&Self, Handle<Block>) -> Vec<Handle<Block>>,
    ) -> Vec<Handle<Block>> {
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::new();
        if !self.blocks.contains(entry) {
            return order;
        }
        visited[entry.index()] = true;
        let mut stack = vec![(entry, children(self, entry), 0usize)];
        while let Some((block, next_children, next)) = stack.last_mut() {
            if let Some(&child) = next_children.get(*next) {
                *next += 1;
                if self.blocks.contains(child) && !visited[child.index()] {
                    visited[child.index()] = true;
                    let grandchildren = children(self, child);
                    stack.push((child, grandchildren, 0));
                }
            } else {
                order.push(*block);
                stack.pop();
            }
        }
        order
    }

    /// Reverse postorder of the blocks reachable along control-flow edges.
    pub fn reverse_postorder(&self) -> Vec<Handle<Block>> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut order = self.postorder(entry, Self::successors);
        order.reverse();
        order
    }

    /// Emission order of the blocks.
    ///
    /// Reverse postorder over edges and merge annotations, visiting merge
    /// and continuing blocks first so that every construct stays
    /// contiguous, followed by the remaining blocks in creation order.
    pub fn layout(&self) -> Vec<Handle<Block>> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut order = self.postorder(entry, Self::structured_successors);
        order.reverse();
        let mut placed = vec![false; self.blocks.len()];
        for block in &order {
            placed[block.index()] = true;
        }
        order.extend(self.blocks.handles().filter(|b| !placed[b.index()]));
        order
    }
}
