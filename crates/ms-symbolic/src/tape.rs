//! Flattened evaluation tape for a set of output expressions.

use crate::error::{ModelError, ModelResult};
use crate::expr::{BinaryOp, Expr, Node, UnaryOp, pow_const};
use ms_core::VarId;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Instr {
    Const(f64),
    Input(usize),
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    Powf(usize, f64),
}

/// Topologically ordered instructions; shared subexpressions appear once.
#[derive(Clone, Debug)]
pub(crate) struct Tape {
    instrs: Vec<Instr>,
    outputs: Vec<usize>,
}

struct Compiler<'a> {
    slots: &'a HashMap<VarId, usize>,
    function: &'a str,
    instrs: Vec<Instr>,
    seen: HashMap<*const Node, usize>,
}

impl Compiler<'_> {
    fn visit(&mut self, e: &Expr) -> ModelResult<usize> {
        if let Some(&slot) = self.seen.get(&e.key()) {
            return Ok(slot);
        }
        let instr = match e.node() {
            Node::Const(c) => Instr::Const(*c),
            Node::Var(info) => {
                let input = self.slots.get(&info.id()).ok_or_else(|| ModelError::FreeVariable {
                    name: info.name().to_string(),
                    function: self.function.to_string(),
                })?;
                Instr::Input(*input)
            }
            Node::Unary(op, a) => Instr::Unary(*op, self.visit(a)?),
            Node::Binary(op, a, b) => {
                let ia = self.visit(a)?;
                let ib = self.visit(b)?;
                Instr::Binary(*op, ia, ib)
            }
            Node::Powf(a, p) => Instr::Powf(self.visit(a)?, *p),
        };
        self.instrs.push(instr);
        let slot = self.instrs.len() - 1;
        self.seen.insert(e.key(), slot);
        Ok(slot)
    }
}

impl Tape {
    /// Compile `outputs`, mapping each variable to its flat input position.
    pub(crate) fn compile(
        function: &str,
        outputs: &[Expr],
        slots: &HashMap<VarId, usize>,
    ) -> ModelResult<Self> {
        let mut compiler = Compiler {
            slots,
            function,
            instrs: Vec::new(),
            seen: HashMap::new(),
        };
        let outputs = outputs
            .iter()
            .map(|e| compiler.visit(e))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Self {
            instrs: compiler.instrs,
            outputs,
        })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.instrs.len()
    }

    /// Evaluate on flat `inputs`, writing one value per output.
    pub(crate) fn eval(&self, inputs: &[f64], out: &mut [f64]) {
        let mut work = Vec::with_capacity(self.instrs.len());
        for instr in &self.instrs {
            let v = match *instr {
                Instr::Const(c) => c,
                Instr::Input(i) => inputs[i],
                Instr::Unary(op, a) => op.apply(work[a]),
                Instr::Binary(op, a, b) => op.apply(work[a], work[b]),
                Instr::Powf(a, p) => pow_const(work[a], p),
            };
            work.push(v);
        }
        for (o, &slot) in out.iter_mut().zip(&self.outputs) {
            *o = work[slot];
        }
    }
}
