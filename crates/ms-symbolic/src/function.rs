//! Functions: ordered typed input groups mapped to ordered outputs.

use crate::error::{ModelError, ModelResult};
use crate::expr::Expr;
use crate::model::{Role, VarInfo};
use crate::tape::Tape;
use ms_core::VarId;
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

/// Capability interface of a symbolic/AD engine.
pub trait SymbolicEngine {
    /// Build a function from typed input groups and output expressions.
    fn make_function(
        &self,
        name: &str,
        inputs: Vec<InputGroup>,
        outputs: Vec<Expr>,
        diff_order: u8,
    ) -> ModelResult<Function>;

    /// Jacobian of all outputs of `function` with respect to input group `group`.
    fn differentiate(&self, function: &Function, group: usize) -> ModelResult<Jacobian>;
}

/// Ordered variables sharing one role.
#[derive(Clone, Debug)]
pub struct InputGroup {
    role: Role,
    vars: Vec<Arc<VarInfo>>,
}

impl InputGroup {
    /// Build a group; every expression must be a bare variable of `role`.
    pub fn new(role: Role, exprs: &[Expr]) -> ModelResult<Self> {
        let vars = exprs
            .iter()
            .map(|e| {
                let info = e.var_info().ok_or_else(|| ModelError::NotAVariable {
                    expr: e.to_string(),
                })?;
                if info.role() != role {
                    return Err(ModelError::RoleMismatch {
                        name: info.name().to_string(),
                        expected: role,
                        found: info.role(),
                    });
                }
                Ok(Arc::clone(info))
            })
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Self { role, vars })
    }

    pub fn empty(role: Role) -> Self {
        Self {
            role,
            vars: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = VarId> + '_ {
        self.vars.iter().map(|v| v.id())
    }

    pub(crate) fn variables(&self) -> impl Iterator<Item = &Arc<VarInfo>> {
        self.vars.iter()
    }
}

/// Immutable compiled function.
///
/// Outputs are evaluated through a tape built once at construction. A
/// differentiation order of at least 1 makes [`Function::jacobian`]
/// available.
#[derive(Clone, Debug)]
pub struct Function {
    name: String,
    inputs: Vec<InputGroup>,
    outputs: Vec<Expr>,
    diff_order: u8,
    offsets: Vec<usize>,
    tape: Tape,
}

impl Function {
    pub(crate) fn new(
        name: &str,
        inputs: Vec<InputGroup>,
        outputs: Vec<Expr>,
        diff_order: u8,
    ) -> ModelResult<Self> {
        if outputs.is_empty() {
            return Err(ModelError::EmptyOutputs {
                function: name.to_string(),
            });
        }

        let mut slots: HashMap<VarId, usize> = HashMap::new();
        let mut offsets = Vec::with_capacity(inputs.len() + 1);
        let mut position = 0;
        for group in &inputs {
            offsets.push(position);
            for info in group.variables() {
                if slots.insert(info.id(), position).is_some() {
                    return Err(ModelError::DuplicateInput {
                        name: info.name().to_string(),
                    });
                }
                position += 1;
            }
        }
        offsets.push(position);

        let tape = Tape::compile(name, &outputs, &slots)?;
        Ok(Self {
            name: name.to_string(),
            inputs,
            outputs,
            diff_order,
            offsets,
            tape,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[InputGroup] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Expr] {
        &self.outputs
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn diff_order(&self) -> u8 {
        self.diff_order
    }

    /// Number of scalars expected in input group `group`.
    pub fn input_len(&self, group: usize) -> Option<usize> {
        self.inputs.get(group).map(InputGroup::len)
    }

    fn flatten(&self, inputs: &[&[f64]]) -> ModelResult<Vec<f64>> {
        if inputs.len() != self.inputs.len() {
            return Err(ModelError::ArityMismatch {
                what: format!("input groups of '{}'", self.name),
                expected: self.inputs.len(),
                found: inputs.len(),
            });
        }
        let mut flat = Vec::with_capacity(self.offsets[self.inputs.len()]);
        for (k, (values, group)) in inputs.iter().zip(&self.inputs).enumerate() {
            if values.len() != group.len() {
                return Err(ModelError::ArityMismatch {
                    what: format!("input group {k} of '{}'", self.name),
                    expected: group.len(),
                    found: values.len(),
                });
            }
            flat.extend_from_slice(values);
        }
        Ok(flat)
    }

    /// Evaluate all outputs for one value slice per input group.
    pub fn eval(&self, inputs: &[&[f64]]) -> ModelResult<Vec<f64>> {
        let flat = self.flatten(inputs)?;
        let mut out = vec![0.0; self.outputs.len()];
        self.tape.eval(&flat, &mut out);
        Ok(out)
    }

    /// Derived function over the outputs in `range`, with the same inputs.
    pub fn select_outputs(&self, range: Range<usize>) -> ModelResult<Function> {
        if range.end > self.outputs.len() || range.start > range.end {
            return Err(ModelError::ArityMismatch {
                what: format!("output selection of '{}'", self.name),
                expected: self.outputs.len(),
                found: range.end,
            });
        }
        let name = format!("{}[{}..{}]", self.name, range.start, range.end);
        Function::new(
            &name,
            self.inputs.clone(),
            self.outputs[range].to_vec(),
            self.diff_order,
        )
    }

    /// Jacobian of every output with respect to input group `group`.
    pub fn jacobian(&self, group: usize) -> ModelResult<Jacobian> {
        if self.diff_order == 0 {
            return Err(ModelError::NotDifferentiable {
                function: self.name.clone(),
            });
        }
        let wrt = self.inputs.get(group).ok_or_else(|| ModelError::InvalidGroup {
            function: self.name.clone(),
            group,
        })?;

        let rows = self.outputs.len();
        let cols = wrt.len();
        let mut entries = Vec::with_capacity(rows * cols);
        let mut memos: Vec<HashMap<_, _>> = (0..cols).map(|_| HashMap::new()).collect();
        for output in &self.outputs {
            for (id, memo) in wrt.ids().zip(memos.iter_mut()) {
                entries.push(output.derivative_memo(id, memo));
            }
        }

        // Structurally empty Jacobians still need an output to compile.
        let (entries, empty) = if entries.is_empty() {
            (vec![Expr::zero()], true)
        } else {
            (entries, false)
        };
        let name = format!("jac_{}_{}", self.name, group);
        let function = Function::new(&name, self.inputs.clone(), entries, self.diff_order - 1)?;
        Ok(Jacobian {
            function,
            rows,
            cols,
            empty,
        })
    }
}

/// Dense Jacobian of a function with respect to one input group.
#[derive(Clone, Debug)]
pub struct Jacobian {
    function: Function,
    rows: usize,
    cols: usize,
    empty: bool,
}

impl Jacobian {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Row-major entries as a function (its own differentiation order is one lower).
    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn eval(&self, inputs: &[&[f64]]) -> ModelResult<DMatrix<f64>> {
        let values = self.function.eval(inputs)?;
        if self.empty {
            return Ok(DMatrix::zeros(self.rows, self.cols));
        }
        Ok(DMatrix::from_row_slice(self.rows, self.cols, &values))
    }
}
