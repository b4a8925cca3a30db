//! Scalar expression graphs.
//!
//! An [`Expr`] is a cheap-to-clone handle on an immutable node. Subgraphs are
//! shared, so building `f` once and reusing it in several functions costs
//! nothing extra. All constructors fold constants and drop additive and
//! multiplicative identities, which keeps symbolic derivatives small.

use crate::model::VarInfo;
use ms_core::VarId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
}

impl UnaryOp {
    pub(crate) fn apply(self, a: f64) -> f64 {
        match self {
            UnaryOp::Neg => -a,
            UnaryOp::Exp => a.exp(),
            UnaryOp::Ln => a.ln(),
            UnaryOp::Sqrt => a.sqrt(),
            UnaryOp::Sin => a.sin(),
            UnaryOp::Cos => a.cos(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Exp => "exp",
            UnaryOp::Ln => "ln",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub(crate) fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Raise `a` to a constant power, using integer powers where exact.
pub(crate) fn pow_const(a: f64, e: f64) -> f64 {
    if e.fract() == 0.0 && e.abs() <= i32::MAX as f64 {
        a.powi(e as i32)
    } else {
        a.powf(e)
    }
}

#[derive(Debug)]
pub(crate) enum Node {
    Const(f64),
    Var(Arc<VarInfo>),
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
    Powf(Expr, f64),
}

/// Symbolic scalar expression.
#[derive(Clone)]
pub struct Expr(Arc<Node>);

impl Expr {
    fn from_node(node: Node) -> Self {
        Self(Arc::new(node))
    }

    pub(crate) fn var(info: Arc<VarInfo>) -> Self {
        Self::from_node(Node::Var(info))
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    pub(crate) fn key(&self) -> *const Node {
        Arc::as_ptr(&self.0)
    }

    pub fn constant(value: f64) -> Self {
        Self::from_node(Node::Const(value))
    }

    pub fn zero() -> Self {
        Self::constant(0.0)
    }

    pub fn one() -> Self {
        Self::constant(1.0)
    }

    /// Constant value, if this expression is a literal.
    pub fn constant_value(&self) -> Option<f64> {
        match self.node() {
            Node::Const(c) => Some(*c),
            _ => None,
        }
    }

    fn is_const(&self, value: f64) -> bool {
        self.constant_value() == Some(value)
    }

    /// Variable description, if this expression is a bare variable.
    pub fn as_var(&self) -> Option<&VarInfo> {
        self.var_info().map(|v| v.as_ref())
    }

    pub(crate) fn var_info(&self) -> Option<&Arc<VarInfo>> {
        match self.node() {
            Node::Var(info) => Some(info),
            _ => None,
        }
    }

    /// True if both handles point at the same node.
    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn exp(&self) -> Expr {
        unary(UnaryOp::Exp, self)
    }

    pub fn ln(&self) -> Expr {
        unary(UnaryOp::Ln, self)
    }

    pub fn sqrt(&self) -> Expr {
        unary(UnaryOp::Sqrt, self)
    }

    pub fn sin(&self) -> Expr {
        unary(UnaryOp::Sin, self)
    }

    pub fn cos(&self) -> Expr {
        unary(UnaryOp::Cos, self)
    }

    pub fn powi(&self, n: i32) -> Expr {
        self.powf(n as f64)
    }

    pub fn powf(&self, exponent: f64) -> Expr {
        if exponent == 0.0 {
            return Expr::one();
        }
        if exponent == 1.0 {
            return self.clone();
        }
        if let Some(c) = self.constant_value() {
            return Expr::constant(pow_const(c, exponent));
        }
        Expr::from_node(Node::Powf(self.clone(), exponent))
    }

    /// Every variable the expression depends on, ordered by id.
    pub fn variables(&self) -> Vec<&VarInfo> {
        let mut found: BTreeMap<VarId, &VarInfo> = BTreeMap::new();
        let mut seen: HashMap<*const Node, ()> = HashMap::new();
        collect_variables(self, &mut found, &mut seen);
        found.into_values().collect()
    }

    pub fn depends_on(&self, id: VarId) -> bool {
        self.variables().iter().any(|v| v.id == id)
    }

    /// Symbolic partial derivative with respect to variable `id`.
    pub fn derivative(&self, id: VarId) -> Expr {
        let mut memo = HashMap::new();
        self.derivative_memo(id, &mut memo)
    }

    /// Derivative sharing a memo table across several outputs.
    pub(crate) fn derivative_memo(&self, id: VarId, memo: &mut HashMap<*const Node, Expr>) -> Expr {
        if let Some(d) = memo.get(&self.key()) {
            return d.clone();
        }
        let d = match self.node() {
            Node::Const(_) => Expr::zero(),
            Node::Var(info) => {
                if info.id == id {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Node::Unary(op, a) => {
                let da = a.derivative_memo(id, memo);
                if da.is_const(0.0) {
                    Expr::zero()
                } else {
                    match op {
                        UnaryOp::Neg => neg(&da),
                        UnaryOp::Exp => mul(&da, self),
                        UnaryOp::Ln => div(&da, a),
                        UnaryOp::Sqrt => div(&da, &mul(&Expr::constant(2.0), self)),
                        UnaryOp::Sin => mul(&da, &a.cos()),
                        UnaryOp::Cos => neg(&mul(&da, &a.sin())),
                    }
                }
            }
            Node::Binary(op, a, b) => {
                let da = a.derivative_memo(id, memo);
                let db = b.derivative_memo(id, memo);
                match op {
                    BinaryOp::Add => add(&da, &db),
                    BinaryOp::Sub => sub(&da, &db),
                    BinaryOp::Mul => add(&mul(&da, b), &mul(a, &db)),
                    BinaryOp::Div => {
                        if db.is_const(0.0) {
                            div(&da, b)
                        } else {
                            div(&sub(&mul(&da, b), &mul(a, &db)), &mul(b, b))
                        }
                    }
                }
            }
            Node::Powf(a, e) => {
                let da = a.derivative_memo(id, memo);
                if da.is_const(0.0) {
                    Expr::zero()
                } else {
                    mul(&mul(&Expr::constant(*e), &a.powf(e - 1.0)), &da)
                }
            }
        };
        memo.insert(self.key(), d.clone());
        d
    }
}

fn collect_variables<'a>(
    e: &'a Expr,
    found: &mut BTreeMap<VarId, &'a VarInfo>,
    seen: &mut HashMap<*const Node, ()>,
) {
    if seen.insert(e.key(), ()).is_some() {
        return;
    }
    match e.node() {
        Node::Const(_) => {}
        Node::Var(info) => {
            found.insert(info.id, info.as_ref());
        }
        Node::Unary(_, a) | Node::Powf(a, _) => collect_variables(a, found, seen),
        Node::Binary(_, a, b) => {
            collect_variables(a, found, seen);
            collect_variables(b, found, seen);
        }
    }
}

fn unary(op: UnaryOp, a: &Expr) -> Expr {
    if let Some(c) = a.constant_value() {
        return Expr::constant(op.apply(c));
    }
    Expr::from_node(Node::Unary(op, a.clone()))
}

fn neg(a: &Expr) -> Expr {
    if let Node::Unary(UnaryOp::Neg, inner) = a.node() {
        return inner.clone();
    }
    unary(UnaryOp::Neg, a)
}

fn binary(op: BinaryOp, a: &Expr, b: &Expr) -> Expr {
    if let (Some(x), Some(y)) = (a.constant_value(), b.constant_value()) {
        return Expr::constant(op.apply(x, y));
    }
    Expr::from_node(Node::Binary(op, a.clone(), b.clone()))
}

fn add(a: &Expr, b: &Expr) -> Expr {
    if a.is_const(0.0) {
        return b.clone();
    }
    if b.is_const(0.0) {
        return a.clone();
    }
    binary(BinaryOp::Add, a, b)
}

fn sub(a: &Expr, b: &Expr) -> Expr {
    if b.is_const(0.0) {
        return a.clone();
    }
    if a.is_const(0.0) {
        return neg(b);
    }
    if a.ptr_eq(b) {
        return Expr::zero();
    }
    binary(BinaryOp::Sub, a, b)
}

fn mul(a: &Expr, b: &Expr) -> Expr {
    if a.is_const(0.0) || b.is_const(0.0) {
        return Expr::zero();
    }
    if a.is_const(1.0) {
        return b.clone();
    }
    if b.is_const(1.0) {
        return a.clone();
    }
    if a.is_const(-1.0) {
        return neg(b);
    }
    if b.is_const(-1.0) {
        return neg(a);
    }
    binary(BinaryOp::Mul, a, b)
}

fn div(a: &Expr, b: &Expr) -> Expr {
    if a.is_const(0.0) {
        return Expr::zero();
    }
    if b.is_const(1.0) {
        return a.clone();
    }
    binary(BinaryOp::Div, a, b)
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $ctor:ident) => {
        impl std::ops::$trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $ctor(&self, &rhs)
            }
        }

        impl std::ops::$trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $ctor(&self, rhs)
            }
        }

        impl std::ops::$trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $ctor(self, &rhs)
            }
        }

        impl std::ops::$trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $ctor(self, rhs)
            }
        }

        impl std::ops::$trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                $ctor(&self, &Expr::constant(rhs))
            }
        }

        impl std::ops::$trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                $ctor(self, &Expr::constant(rhs))
            }
        }

        impl std::ops::$trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $ctor(&Expr::constant(self), &rhs)
            }
        }

        impl std::ops::$trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $ctor(&Expr::constant(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, add);
impl_binary_op!(Sub, sub, sub);
impl_binary_op!(Mul, mul, mul);
impl_binary_op!(Div, div, div);

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        neg(&self)
    }
}

impl std::ops::Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        neg(self)
    }
}

impl std::ops::SubAssign<Expr> for Expr {
    fn sub_assign(&mut self, rhs: Expr) {
        *self = sub(self, &rhs);
    }
}

impl std::ops::AddAssign<Expr> for Expr {
    fn add_assign(&mut self, rhs: Expr) {
        *self = add(self, &rhs);
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Node::Const(c) => write!(f, "{c}"),
            Node::Var(info) => write!(f, "{}", info.name),
            Node::Unary(UnaryOp::Neg, a) => write!(f, "(-{a})"),
            Node::Unary(op, a) => write!(f, "{}({a})", op.name()),
            Node::Binary(op, a, b) => write!(f, "({a} {} {b})", op.symbol()),
            Node::Powf(a, e) => write!(f, "({a}^{e})"),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}
