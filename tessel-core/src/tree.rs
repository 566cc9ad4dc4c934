//! Lazy operation trees.
//!
//! A tree is built bottom-up from views and scalars and does nothing until an
//! assignment root is launched. Each node evaluates as a pure function of the
//! element index:
//!
//! ```text
//! ScalarOp(c, x).eval(i)   = f(c, x.eval(i))
//! BinaryOp(l, r).eval(i)   = f(l.eval(i), r.eval(i))
//! UnaryOp(x).eval(i)       = f(x.eval(i))
//! TupleOp(x).eval(i)       = (i, x.eval(i))
//! ```
//!
//! Only the roots write: [`Assign`] stores one value per index, and
//! [`DualAssign`] evaluates both sources before storing either destination,
//! which keeps swap and plane rotation correct when the destinations are
//! also the operands.
//!
//! Composition is static: every node is generic over its children, so a tree
//! compiles down to one monomorphic kernel body.

use num_traits::{Float, Zero};

use crate::element::{DeviceValue, Element, IndexValueTuple};

/// A node that can be evaluated at any index in `[0, size)`.
pub trait Expr: Send + Sync {
    type Value: DeviceValue;

    fn eval(&self, i: usize) -> Self::Value;

    fn size(&self) -> usize;
}

/// An [`Expr`] that can also be written: the destination of an assignment.
pub trait Store: Expr {
    fn store(&self, i: usize, value: Self::Value);
}

/// An assignment root: one work-item per index, no ordering between indices.
pub trait Kernel: Send + Sync {
    fn size(&self) -> usize;

    fn run(&self, i: usize);
}

// ============================================================================
// Functors
// ============================================================================

/// Two-operand element function.
pub trait BinaryFunctor<T>: Copy + Send + Sync + 'static {
    fn apply(l: T, r: T) -> T;
}

/// One-operand element function.
pub trait UnaryFunctor<T>: Copy + Send + Sync + 'static {
    fn apply(x: T) -> T;
}

/// A commutative, associative combine with an identity, for reductions.
pub trait ReduceOp<V>: Copy + Send + Sync + 'static {
    fn identity() -> V;

    fn combine(a: V, b: V) -> V;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AddOp;

#[derive(Debug, Clone, Copy, Default)]
pub struct PrdOp;

#[derive(Debug, Clone, Copy, Default)]
pub struct AbsOp;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqrtOp;

/// `x * x`
#[derive(Debug, Clone, Copy, Default)]
pub struct SquareOp;

/// Largest absolute value; ties go to the smaller index.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxIndexOp;

/// Smallest absolute value; ties go to the smaller index.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinIndexOp;

impl<T: Element> BinaryFunctor<T> for AddOp {
    #[inline(always)]
    fn apply(l: T, r: T) -> T {
        l + r
    }
}

impl<T: Element> BinaryFunctor<T> for PrdOp {
    #[inline(always)]
    fn apply(l: T, r: T) -> T {
        l * r
    }
}

impl<T: Element> UnaryFunctor<T> for AbsOp {
    #[inline(always)]
    fn apply(x: T) -> T {
        x.abs()
    }
}

impl<T: Element> UnaryFunctor<T> for SqrtOp {
    #[inline(always)]
    fn apply(x: T) -> T {
        x.sqrt()
    }
}

impl<T: Element> UnaryFunctor<T> for SquareOp {
    #[inline(always)]
    fn apply(x: T) -> T {
        x * x
    }
}

impl<T: Element> ReduceOp<T> for AddOp {
    #[inline(always)]
    fn identity() -> T {
        T::zero()
    }

    #[inline(always)]
    fn combine(a: T, b: T) -> T {
        a + b
    }
}

/// Ordering class of an arg-max/arg-min candidate: numbers, then NaN, then
/// the identity.
#[inline(always)]
fn rank<T: Element>(t: &IndexValueTuple<T>) -> u8 {
    if t.index == usize::MAX {
        2
    } else if t.value.is_nan() {
        1
    } else {
        0
    }
}

/// The winner of `a` and `b` when `better` orders absolute values. Ties, and
/// candidates of the same non-numeric class, go to the smaller index.
#[inline(always)]
fn pick_index<T, F>(
    a: IndexValueTuple<T>,
    b: IndexValueTuple<T>,
    better: F,
) -> IndexValueTuple<T>
where
    T: Element,
    F: Fn(T, T) -> bool,
{
    let (ra, rb) = (rank(&a), rank(&b));
    if ra != rb {
        return if ra < rb { a } else { b };
    }
    if ra == 0 {
        let (va, vb) = (a.value.abs(), b.value.abs());
        if better(va, vb) {
            return a;
        }
        if better(vb, va) {
            return b;
        }
    }
    if a.index <= b.index {
        a
    } else {
        b
    }
}

impl<T: Element> ReduceOp<IndexValueTuple<T>> for MaxIndexOp {
    #[inline(always)]
    fn identity() -> IndexValueTuple<T> {
        IndexValueTuple::new(usize::MAX, T::zero())
    }

    #[inline(always)]
    fn combine(a: IndexValueTuple<T>, b: IndexValueTuple<T>) -> IndexValueTuple<T> {
        pick_index(a, b, |x, y| x > y)
    }
}

impl<T: Element> ReduceOp<IndexValueTuple<T>> for MinIndexOp {
    #[inline(always)]
    fn identity() -> IndexValueTuple<T> {
        IndexValueTuple::new(usize::MAX, T::infinity())
    }

    #[inline(always)]
    fn combine(a: IndexValueTuple<T>, b: IndexValueTuple<T>) -> IndexValueTuple<T> {
        pick_index(a, b, |x, y| x < y)
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// `f(scalar, operand[i])`
#[derive(Debug, Clone)]
pub struct ScalarOp<Op, E: Expr> {
    scalar: E::Value,
    operand: E,
    _op: Op,
}

impl<Op, E> ScalarOp<Op, E>
where
    E: Expr,
    Op: BinaryFunctor<E::Value>,
{
    pub fn new(op: Op, scalar: E::Value, operand: E) -> Self {
        Self {
            scalar,
            operand,
            _op: op,
        }
    }
}

impl<Op, E> Expr for ScalarOp<Op, E>
where
    E: Expr,
    Op: BinaryFunctor<E::Value>,
{
    type Value = E::Value;

    #[inline(always)]
    fn eval(&self, i: usize) -> E::Value {
        Op::apply(self.scalar, self.operand.eval(i))
    }

    fn size(&self) -> usize {
        self.operand.size()
    }
}

/// `f(lhs[i], rhs[i])`
#[derive(Debug, Clone)]
pub struct BinaryOp<Op, L, R> {
    lhs: L,
    rhs: R,
    _op: Op,
}

impl<Op, L, R> BinaryOp<Op, L, R>
where
    L: Expr,
    R: Expr<Value = L::Value>,
    Op: BinaryFunctor<L::Value>,
{
    pub fn new(op: Op, lhs: L, rhs: R) -> Self {
        Self { lhs, rhs, _op: op }
    }
}

impl<Op, L, R> Expr for BinaryOp<Op, L, R>
where
    L: Expr,
    R: Expr<Value = L::Value>,
    Op: BinaryFunctor<L::Value>,
{
    type Value = L::Value;

    #[inline(always)]
    fn eval(&self, i: usize) -> L::Value {
        Op::apply(self.lhs.eval(i), self.rhs.eval(i))
    }

    fn size(&self) -> usize {
        self.lhs.size()
    }
}

/// `f(operand[i])`
#[derive(Debug, Clone)]
pub struct UnaryOp<Op, E> {
    operand: E,
    _op: Op,
}

impl<Op, E> UnaryOp<Op, E>
where
    E: Expr,
    Op: UnaryFunctor<E::Value>,
{
    pub fn new(op: Op, operand: E) -> Self {
        Self { operand, _op: op }
    }
}

impl<Op, E> Expr for UnaryOp<Op, E>
where
    E: Expr,
    Op: UnaryFunctor<E::Value>,
{
    type Value = E::Value;

    #[inline(always)]
    fn eval(&self, i: usize) -> E::Value {
        Op::apply(self.operand.eval(i))
    }

    fn size(&self) -> usize {
        self.operand.size()
    }
}

/// `(i, operand[i])`
#[derive(Debug, Clone)]
pub struct TupleOp<E> {
    operand: E,
}

impl<E: Expr> TupleOp<E> {
    pub fn new(operand: E) -> Self {
        Self { operand }
    }
}

impl<E: Expr> Expr for TupleOp<E> {
    type Value = IndexValueTuple<E::Value>;

    #[inline(always)]
    fn eval(&self, i: usize) -> Self::Value {
        IndexValueTuple::new(i, self.operand.eval(i))
    }

    fn size(&self) -> usize {
        self.operand.size()
    }
}

// ============================================================================
// Roots
// ============================================================================

/// `dest[i] = src[i]` for every `i` in `[0, dest.size())`.
#[derive(Debug, Clone)]
pub struct Assign<D, S> {
    dest: D,
    src: S,
}

impl<D, S> Assign<D, S>
where
    D: Store,
    S: Expr<Value = D::Value>,
{
    pub fn new(dest: D, src: S) -> Self {
        Self { dest, src }
    }
}

impl<D, S> Kernel for Assign<D, S>
where
    D: Store,
    S: Expr<Value = D::Value>,
{
    fn size(&self) -> usize {
        self.dest.size()
    }

    #[inline(always)]
    fn run(&self, i: usize) {
        self.dest.store(i, self.src.eval(i));
    }
}

/// `(dest_a[i], dest_b[i]) = (src_a[i], src_b[i])`, reading both sources
/// before writing either destination.
#[derive(Debug, Clone)]
pub struct DualAssign<DA, DB, SA, SB> {
    dest_a: DA,
    dest_b: DB,
    src_a: SA,
    src_b: SB,
}

impl<DA, DB, SA, SB> DualAssign<DA, DB, SA, SB>
where
    DA: Store,
    DB: Store,
    SA: Expr<Value = DA::Value>,
    SB: Expr<Value = DB::Value>,
{
    pub fn new(dest_a: DA, dest_b: DB, src_a: SA, src_b: SB) -> Self {
        Self {
            dest_a,
            dest_b,
            src_a,
            src_b,
        }
    }
}

impl<DA, DB, SA, SB> Kernel for DualAssign<DA, DB, SA, SB>
where
    DA: Store,
    DB: Store,
    SA: Expr<Value = DA::Value>,
    SB: Expr<Value = DB::Value>,
{
    fn size(&self) -> usize {
        self.dest_a.size()
    }

    #[inline(always)]
    fn run(&self, i: usize) {
        let a = self.src_a.eval(i);
        let b = self.src_b.eval(i);
        self.dest_a.store(i, a);
        self.dest_b.store(i, b);
    }
}
