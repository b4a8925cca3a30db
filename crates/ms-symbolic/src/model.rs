//! Variable registry.

use crate::error::{ModelError, ModelResult};
use crate::expr::Expr;
use crate::function::{Function, InputGroup, Jacobian, SymbolicEngine};
use crate::residual::DaeVariables;
use ms_core::VarId;
use std::sync::Arc;

/// Role of a declared variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Time,
    Differential,
    /// Time derivative of a differential state (implicit residual inputs).
    StateDerivative,
    Algebraic,
    Control,
    Parameter,
}

/// Immutable description of a declared variable.
#[derive(Debug, PartialEq, Eq)]
pub struct VarInfo {
    pub(crate) id: VarId,
    pub(crate) name: String,
    pub(crate) role: Role,
}

impl VarInfo {
    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// Owner of all variables used to build one set of functions.
///
/// Functions built from different models must not be mixed; each concurrent
/// problem gets its own model.
#[derive(Debug, Default)]
pub struct SymbolicModel {
    variables: Vec<Arc<VarInfo>>,
}

impl SymbolicModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a scalar variable and return it as an expression.
    pub fn declare(&mut self, name: impl Into<String>, role: Role) -> Expr {
        let id = VarId::from_index(self.variables.len() as u32);
        let info = Arc::new(VarInfo {
            id,
            name: name.into(),
            role,
        });
        self.variables.push(Arc::clone(&info));
        Expr::var(info)
    }

    /// Declare several variables sharing a role.
    pub fn declare_many(&mut self, names: &[&str], role: Role) -> Vec<Expr> {
        names.iter().map(|name| self.declare(*name, role)).collect()
    }

    pub fn variable(&self, id: VarId) -> Option<&VarInfo> {
        self.variables.get(id.index() as usize).map(|v| v.as_ref())
    }

    pub fn variables(&self) -> impl Iterator<Item = &VarInfo> {
        self.variables.iter().map(|v| v.as_ref())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Build a function over variables of this model.
    pub fn function(
        &self,
        name: &str,
        inputs: Vec<InputGroup>,
        outputs: Vec<Expr>,
        diff_order: u8,
    ) -> ModelResult<Function> {
        for group in &inputs {
            for info in group.variables() {
                self.ensure_owned(info)?;
            }
        }
        Function::new(name, inputs, outputs, diff_order)
    }

    /// Build a function with the canonical DAE groups `[t, x, z, u, p]`.
    pub fn dae_function(
        &self,
        name: &str,
        vars: &DaeVariables,
        outputs: Vec<Expr>,
        diff_order: u8,
    ) -> ModelResult<Function> {
        self.function(name, vars.input_groups()?, outputs, diff_order)
    }

    fn ensure_owned(&self, info: &Arc<VarInfo>) -> ModelResult<()> {
        match self.variables.get(info.id.index() as usize) {
            Some(own) if Arc::ptr_eq(own, info) => Ok(()),
            _ => Err(ModelError::UnknownVariable {
                name: info.name.clone(),
            }),
        }
    }
}

impl SymbolicEngine for SymbolicModel {
    fn make_function(
        &self,
        name: &str,
        inputs: Vec<InputGroup>,
        outputs: Vec<Expr>,
        diff_order: u8,
    ) -> ModelResult<Function> {
        self.function(name, inputs, outputs, diff_order)
    }

    fn differentiate(&self, function: &Function, group: usize) -> ModelResult<Jacobian> {
        function.jacobian(group)
    }
}
