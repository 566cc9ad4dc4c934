//! GEMM kernel variants.
//!
//! Both variants compute `C = alpha * op(A) * op(B) + beta * C` on
//! column-major views and are specialised at compile time on the transpose
//! of each operand (`TRANS_A`, `TRANS_B`).
//!
//! - [`TiledGemm`] stages k-blocks of A and B through group-local memory.
//!   One work-group owns a block of C; each work-item accumulates its
//!   `item_rows x item_cols` sub-tile from the staged copies.
//! - [`RegisterGemm`] uses no local memory: one work-item per element of C,
//!   reading A and B straight from global memory.
//!
//! Every element of C is accumulated as `acc += a * b` over `k` in ascending
//! order in both variants, so the choice of variant or tile shape never
//! changes the result. When `beta == 0` C is written without being read.

use num_traits::Zero;
use smallvec::{smallvec, SmallVec};
use tessel_core::{Element, MatrixView};

use super::tile::TileDescriptor;
use crate::executor::LaunchConfig;

/// Operands and scalars of one GEMM launch.
///
/// `a` and `b` are the matrices as stored: `a` is `k x m` when `TRANS_A`,
/// otherwise `m x k`, and likewise for `b`.
#[derive(Debug, Clone)]
pub struct GemmArgs<T: Element> {
    pub a: MatrixView<T>,
    pub b: MatrixView<T>,
    pub c: MatrixView<T>,
    pub alpha: T,
    pub beta: T,
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl<T: Element> GemmArgs<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        a: MatrixView<T>,
        b: MatrixView<T>,
        c: MatrixView<T>,
        alpha: T,
        beta: T,
        m: usize,
        n: usize,
        k: usize,
    ) -> Self {
        Self {
            a,
            b,
            c,
            alpha,
            beta,
            m,
            n,
            k,
        }
    }

    /// `op(A)(row, kk)`
    #[inline(always)]
    fn op_a<const TRANS_A: bool>(&self, row: usize, kk: usize) -> T {
        if TRANS_A {
            self.a.get(kk, row)
        } else {
            self.a.get(row, kk)
        }
    }

    /// `op(B)(kk, col)`
    #[inline(always)]
    fn op_b<const TRANS_B: bool>(&self, kk: usize, col: usize) -> T {
        if TRANS_B {
            self.b.get(col, kk)
        } else {
            self.b.get(kk, col)
        }
    }

    #[inline(always)]
    fn write_c(&self, row: usize, col: usize, acc: T) {
        let mut out = self.alpha * acc;
        if !self.beta.is_zero() {
            out = out + self.beta * self.c.get(row, col);
        }
        self.c.set(row, col, out);
    }
}

/// A GEMM specialisation ready to launch, one work-group at a time.
pub trait GemmKernel: Send + Sync + 'static {
    fn launch(&self) -> LaunchConfig;

    fn run_group(&self, group: usize);
}

// ============================================================================
// Local-memory tiled kernel
// ============================================================================

/// Per-work-item sub-tile; up to 8 x 8 stays off the heap.
type Accumulator<T> = SmallVec<[T; 64]>;

pub struct TiledGemm<T: Element, const TRANS_A: bool, const TRANS_B: bool> {
    args: GemmArgs<T>,
    tile: TileDescriptor,
    blocks_m: usize,
    blocks_n: usize,
}

impl<T: Element, const TRANS_A: bool, const TRANS_B: bool> TiledGemm<T, TRANS_A, TRANS_B> {
    pub fn new(args: GemmArgs<T>, tile: TileDescriptor) -> Self {
        let blocks_m = args.m.div_ceil(tile.block_rows().max(1));
        let blocks_n = args.n.div_ceil(tile.block_cols().max(1));
        Self {
            args,
            tile,
            blocks_m,
            blocks_n,
        }
    }

    /// Cooperative load of k-block `kb` of the C block at `origin` into one
    /// stage. Out-of-range elements are staged as zero and never read back.
    fn load_stage(&self, local: &mut [T], origin: (usize, usize), kb: usize) {
        let t = &self.tile;
        let bk = t.block_k::<T>();
        let (a_ld, b_ld) = (t.staged_a_ld(), t.staged_b_ld::<T>());
        let (m, n, k) = (self.args.m, self.args.n, self.args.k);
        let k0 = kb * bk;
        let (row0, col0) = origin;
        let (a_tile, b_tile) = local.split_at_mut(a_ld * bk);
        for kk in 0..bk {
            for r in 0..t.block_rows() {
                let (gr, gk) = (row0 + r, k0 + kk);
                a_tile[r + kk * a_ld] = if gr < m && gk < k {
                    self.args.op_a::<TRANS_A>(gr, gk)
                } else {
                    T::zero()
                };
            }
        }
        for c in 0..t.block_cols() {
            for kk in 0..bk {
                let (gk, gc) = (k0 + kk, col0 + c);
                b_tile[kk + c * b_ld] = if gk < k && gc < n {
                    self.args.op_b::<TRANS_B>(gk, gc)
                } else {
                    T::zero()
                };
            }
        }
    }

    /// Every work-item folds k-block `kb` from `local` into its accumulator.
    fn compute_stage(&self, local: &[T], kb: usize, acc: &mut [Accumulator<T>]) {
        let t = &self.tile;
        let bk = t.block_k::<T>();
        let (a_ld, b_ld) = (t.staged_a_ld(), t.staged_b_ld::<T>());
        let depth = bk.min(self.args.k - kb * bk);
        let (a_tile, b_tile) = local.split_at(a_ld * bk);
        for (wi, sub) in acc.iter_mut().enumerate() {
            let (wr, wc) = (wi % t.group_rows, wi / t.group_rows);
            for kk in 0..depth {
                for j in 0..t.item_cols {
                    let b = b_tile[kk + (wc + j * t.group_cols) * b_ld];
                    for i in 0..t.item_rows {
                        let a = a_tile[(wr + i * t.group_rows) + kk * a_ld];
                        let slot = &mut sub[i + j * t.item_rows];
                        *slot = *slot + a * b;
                    }
                }
            }
        }
    }
}

impl<T: Element, const TRANS_A: bool, const TRANS_B: bool> GemmKernel
    for TiledGemm<T, TRANS_A, TRANS_B>
{
    fn launch(&self) -> LaunchConfig {
        let local = self.tile.items_per_group();
        LaunchConfig {
            local_size: local,
            global_size: self.blocks_m * self.blocks_n * local,
        }
    }

    fn run_group(&self, group: usize) {
        let t = &self.tile;
        let (bm, bn) = (group % self.blocks_m, group / self.blocks_m);
        let (row0, col0) = (bm * t.block_rows(), bn * t.block_cols());

        let bk = t.block_k::<T>();
        let stage_len = t.stage_elements::<T>();
        let stages = if t.double_buffer { 2 } else { 1 };
        let mut local = vec![T::zero(); stages * stage_len];
        let mut acc: Vec<Accumulator<T>> =
            vec![smallvec![T::zero(); t.item_rows * t.item_cols]; t.items_per_group()];

        let k_blocks = self.args.k.div_ceil(bk);
        if k_blocks > 0 {
            self.load_stage(&mut local[..stage_len], (row0, col0), 0);
        }
        for kb in 0..k_blocks {
            let stage = if t.double_buffer { kb % 2 } else { 0 };
            let has_next = kb + 1 < k_blocks;
            if t.double_buffer && has_next {
                let next = ((kb + 1) % 2) * stage_len;
                self.load_stage(&mut local[next..next + stage_len], (row0, col0), kb + 1);
            }
            let cur = stage * stage_len;
            self.compute_stage(&local[cur..cur + stage_len], kb, &mut acc);
            if !t.double_buffer && has_next {
                self.load_stage(&mut local[..stage_len], (row0, col0), kb + 1);
            }
        }

        for (wi, sub) in acc.iter().enumerate() {
            let (wr, wc) = (wi % t.group_rows, wi / t.group_rows);
            for j in 0..t.item_cols {
                let col = col0 + wc + j * t.group_cols;
                if col >= self.args.n {
                    continue;
                }
                for i in 0..t.item_rows {
                    let row = row0 + wr + i * t.group_rows;
                    if row < self.args.m {
                        self.args.write_c(row, col, sub[i + j * t.item_rows]);
                    }
                }
            }
        }
    }
}

// ============================================================================
// No-local-memory kernel
// ============================================================================

pub struct RegisterGemm<T: Element, const TRANS_A: bool, const TRANS_B: bool> {
    args: GemmArgs<T>,
    workgroup_size: usize,
}

impl<T: Element, const TRANS_A: bool, const TRANS_B: bool> RegisterGemm<T, TRANS_A, TRANS_B> {
    pub fn new(args: GemmArgs<T>, workgroup_size: usize) -> Self {
        Self {
            args,
            workgroup_size: workgroup_size.max(1),
        }
    }
}

impl<T: Element, const TRANS_A: bool, const TRANS_B: bool> GemmKernel
    for RegisterGemm<T, TRANS_A, TRANS_B>
{
    fn launch(&self) -> LaunchConfig {
        LaunchConfig::for_size(self.args.m * self.args.n, self.workgroup_size)
    }

    fn run_group(&self, group: usize) {
        let (m, total) = (self.args.m, self.args.m * self.args.n);
        let start = group * self.workgroup_size;
        for idx in start..(start + self.workgroup_size).min(total) {
            let (row, col) = (idx % m, idx / m);
            let mut acc = T::zero();
            for kk in 0..self.args.k {
                acc = acc + self.args.op_a::<TRANS_A>(row, kk) * self.args.op_b::<TRANS_B>(kk, col);
            }
            self.args.write_c(row, col, acc);
        }
    }
}
