//! GEMM tiling and dispatch.
//!
//! Dispatch happens in three steps:
//!
//! 1. The tile catalog ([`tile::CATALOG`]) picks a [`TileDescriptor`] from the
//!    device class and the exact problem shape.
//! 2. If the device has fast local memory and the descriptor fits its local
//!    memory and work-group limits, the local-memory tiled kernel is used;
//!    otherwise the no-local-memory kernel with the descriptor's work-group
//!    size.
//! 3. The transpose pair selects one of four compile-time specialisations.
//!
//! None of these choices affect the numbers in C, only how fast they arrive.

pub mod kernels;
pub mod tile;

use tessel_core::parallel::for_each_group;
use tessel_core::queue::Backend;
use tessel_core::{DeviceCaps, Element, Event, Transpose};

pub use kernels::{GemmArgs, GemmKernel, RegisterGemm, TiledGemm};
pub use tile::{select_tile, TileDescriptor, TileRule, CATALOG};

use crate::executor::Executor;

/// Kernel family chosen for one GEMM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmVariant {
    LocalMemory(TileDescriptor),
    NoLocalMemory { workgroup_size: usize },
}

/// Variant for element type `T` and shape `(m, n, k)` on a device.
pub fn select_variant<T>(caps: &DeviceCaps, m: usize, n: usize, k: usize) -> GemmVariant {
    let tile = select_tile(caps.device_type, m, n, k);
    if caps.fits(tile.scratch_bytes::<T>(), tile.items_per_group()) {
        GemmVariant::LocalMemory(tile)
    } else {
        GemmVariant::NoLocalMemory {
            workgroup_size: tile.workgroup_size,
        }
    }
}

impl<B: Backend> Executor<B> {
    /// `C = alpha * op(A) * op(B) + beta * C` with the variant the device and
    /// shape call for.
    pub fn gemm<T: Element>(
        &self,
        trans_a: Transpose,
        trans_b: Transpose,
        args: GemmArgs<T>,
    ) -> Event {
        let variant = select_variant::<T>(self.backend().caps(), args.m, args.n, args.k);
        log::debug!(
            "gemm<{}> {}x{}x{} on {}: {variant:?}",
            T::NAME,
            args.m,
            args.n,
            args.k,
            self.backend().device_type().name()
        );
        self.gemm_with_variant(trans_a, trans_b, args, variant)
    }

    /// Launch a specific variant, bypassing the catalog.
    pub fn gemm_with_variant<T: Element>(
        &self,
        trans_a: Transpose,
        trans_b: Transpose,
        args: GemmArgs<T>,
        variant: GemmVariant,
    ) -> Event {
        match (trans_a.is_transposed(), trans_b.is_transposed()) {
            (false, false) => self.launch_variant::<T, false, false>(args, variant),
            (true, false) => self.launch_variant::<T, true, false>(args, variant),
            (false, true) => self.launch_variant::<T, false, true>(args, variant),
            (true, true) => self.launch_variant::<T, true, true>(args, variant),
        }
    }

    fn launch_variant<T: Element, const TRANS_A: bool, const TRANS_B: bool>(
        &self,
        args: GemmArgs<T>,
        variant: GemmVariant,
    ) -> Event {
        if args.m == 0 || args.n == 0 {
            return Event::complete();
        }
        match variant {
            GemmVariant::LocalMemory(tile) => {
                self.launch_gemm(TiledGemm::<T, TRANS_A, TRANS_B>::new(args, tile))
            }
            GemmVariant::NoLocalMemory { workgroup_size } => {
                self.launch_gemm(RegisterGemm::<T, TRANS_A, TRANS_B>::new(args, workgroup_size))
            }
        }
    }

    fn launch_gemm<K: GemmKernel>(&self, kernel: K) -> Event {
        let launch = kernel.launch();
        log::trace!(
            "gemm: local {} global {}",
            launch.local_size,
            launch.global_size
        );
        self.backend().submit(
            "gemm",
            Box::new(move || {
                for_each_group(launch.num_groups(), |group| kernel.run_group(group));
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tessel_core::{DevicePtr, DeviceType, HostQueue, MatrixView, QueueConfig};

    fn executor() -> Executor<HostQueue> {
        Executor::new(HostQueue::with_config(QueueConfig::host()).unwrap())
    }

    fn upload(ex: &Executor<HostQueue>, data: &[f64]) -> DevicePtr<f64> {
        let ptr = ex.backend().allocate::<f64>(data.len()).unwrap();
        ex.backend().copy_to_device(data, &ptr).unwrap();
        ptr
    }

    fn download(ex: &Executor<HostQueue>, ptr: &DevicePtr<f64>, n: usize) -> Vec<f64> {
        let mut out = vec![0.0; n];
        ex.backend().copy_to_host(ptr, &mut out).unwrap();
        out
    }

    /// Column-major reference with the same accumulation order.
    #[allow(clippy::too_many_arguments)]
    fn reference(
        ta: bool,
        tb: bool,
        m: usize,
        n: usize,
        k: usize,
        alpha: f64,
        a: &[f64],
        lda: usize,
        b: &[f64],
        ldb: usize,
        beta: f64,
        c: &mut [f64],
        ldc: usize,
    ) {
        for col in 0..n {
            for row in 0..m {
                let mut acc = 0.0;
                for kk in 0..k {
                    let av = if ta { a[kk + row * lda] } else { a[row + kk * lda] };
                    let bv = if tb { b[col + kk * ldb] } else { b[kk + col * ldb] };
                    acc += av * bv;
                }
                let mut out = alpha * acc;
                if beta != 0.0 {
                    out += beta * c[row + col * ldc];
                }
                c[row + col * ldc] = out;
            }
        }
    }

    struct Problem {
        ta: bool,
        tb: bool,
        m: usize,
        n: usize,
        k: usize,
        a: Vec<f64>,
        b: Vec<f64>,
        c: Vec<f64>,
    }

    impl Problem {
        fn random(ta: bool, tb: bool, m: usize, n: usize, k: usize, seed: u64) -> Self {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut fill =
                |len: usize| (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f64>>();
            Self {
                ta,
                tb,
                m,
                n,
                k,
                a: fill(m * k),
                b: fill(k * n),
                c: fill(m * n),
            }
        }

        fn lda(&self) -> usize {
            (if self.ta { self.k } else { self.m }).max(1)
        }

        fn ldb(&self) -> usize {
            (if self.tb { self.n } else { self.k }).max(1)
        }

        fn expected(&self, alpha: f64, beta: f64) -> Vec<f64> {
            let mut c = self.c.clone();
            reference(
                self.ta, self.tb, self.m, self.n, self.k, alpha, &self.a, self.lda(), &self.b,
                self.ldb(), beta, &mut c, self.m.max(1),
            );
            c
        }

        fn run(
            &self,
            ex: &Executor<HostQueue>,
            alpha: f64,
            beta: f64,
            variant: Option<GemmVariant>,
        ) -> Vec<f64> {
            let (a, b, c) = (upload(ex, &self.a), upload(ex, &self.b), upload(ex, &self.c));
            let (ar, ac) = if self.ta { (self.k, self.m) } else { (self.m, self.k) };
            let (br, bc) = if self.tb { (self.n, self.k) } else { (self.k, self.n) };
            let args = GemmArgs::new(
                MatrixView::from_ptr(&a, ar, ac, self.lda()),
                MatrixView::from_ptr(&b, br, bc, self.ldb()),
                MatrixView::from_ptr(&c, self.m, self.n, self.m.max(1)),
                alpha,
                beta,
                self.m,
                self.n,
                self.k,
            );
            let trans = |t: bool| if t { Transpose::Trans } else { Transpose::NoTrans };
            let event = match variant {
                Some(v) => ex.gemm_with_variant(trans(self.ta), trans(self.tb), args, v),
                None => ex.gemm(trans(self.ta), trans(self.tb), args),
            };
            event.wait().unwrap();
            download(ex, &c, self.c.len())
        }
    }

    fn variants() -> Vec<GemmVariant> {
        let mut out: Vec<GemmVariant> = CATALOG
            .iter()
            .map(|r| GemmVariant::LocalMemory(r.tile))
            .collect();
        out.push(GemmVariant::LocalMemory(
            TileDescriptor::new(128, true, 2, 3, 4, 2).with_bank_padding(true, true),
        ));
        out.push(GemmVariant::LocalMemory(
            TileDescriptor::new(128, false, 1, 1, 1, 1).with_bank_padding(false, true),
        ));
        out.push(GemmVariant::NoLocalMemory { workgroup_size: 128 });
        out.push(GemmVariant::NoLocalMemory { workgroup_size: 7 });
        out
    }

    #[test]
    fn test_two_by_two_all_transposes() {
        let ex = executor();
        // A = [1 2; 3 4], B = [5 6; 7 8] (column-major storage)
        let a = [1.0, 3.0, 2.0, 4.0];
        let b = [5.0, 7.0, 6.0, 8.0];
        let c = [1.0, 1.0, 1.0, 1.0];
        for (ta, tb) in [(false, false), (true, false), (false, true), (true, true)] {
            let p = Problem {
                ta,
                tb,
                m: 2,
                n: 2,
                k: 2,
                a: a.to_vec(),
                b: b.to_vec(),
                c: c.to_vec(),
            };
            let expected = p.expected(2.0, 0.5);
            for v in variants() {
                assert_eq!(p.run(&ex, 2.0, 0.5, Some(v)), expected, "ta={ta} tb={tb} {v:?}");
            }
        }
        // NN by hand: A*B = [19 22; 43 50]; 2*AB + 0.5 = [38.5 44.5; 86.5 100.5]
        let p = Problem {
            ta: false,
            tb: false,
            m: 2,
            n: 2,
            k: 2,
            a: a.to_vec(),
            b: b.to_vec(),
            c: c.to_vec(),
        };
        assert_eq!(p.run(&ex, 2.0, 0.5, None), vec![38.5, 86.5, 44.5, 100.5]);
    }

    #[test]
    fn test_variants_agree_on_ragged_shapes() {
        let ex = executor();
        let mut seed = 0;
        for (ta, tb) in [(false, false), (true, false), (false, true), (true, true)] {
            for &(m, n, k) in &[(1, 1, 1), (17, 5, 33), (70, 3, 9), (3, 130, 20), (9, 9, 0)] {
                seed += 1;
                let p = Problem::random(ta, tb, m, n, k, seed);
                let expected = p.expected(1.5, -0.25);
                for v in variants() {
                    assert_eq!(p.run(&ex, 1.5, -0.25, Some(v)), expected, "{m}x{n}x{k} {v:?}");
                }
            }
        }
    }

    #[test]
    fn test_beta_zero_does_not_read_c() {
        let ex = executor();
        let mut p = Problem::random(false, true, 4, 3, 5, 99);
        p.c = vec![f64::NAN; 12];
        for v in variants() {
            let out = p.run(&ex, 1.0, 0.0, Some(v));
            assert!(out.iter().all(|x| x.is_finite()), "{v:?}");
        }
    }

    #[test]
    fn test_empty_output_is_a_no_op() {
        let ex = executor();
        let p = Problem::random(false, false, 0, 4, 4, 3);
        assert!(p.run(&ex, 1.0, 1.0, None).is_empty());
    }

    #[test]
    fn test_select_variant() {
        let mut caps = DeviceCaps::host().clone();
        caps.device_type = DeviceType::IntelGpu;
        assert_eq!(
            select_variant::<f32>(&caps, 64, 64, 64),
            GemmVariant::LocalMemory(TileDescriptor::new(128, false, 8, 8, 8, 8))
        );

        caps.has_local_memory = false;
        assert_eq!(
            select_variant::<f32>(&caps, 64, 64, 64),
            GemmVariant::NoLocalMemory { workgroup_size: 128 }
        );

        // Descriptor needs more local memory than the device has.
        caps.has_local_memory = true;
        caps.local_mem_bytes = 1024;
        assert!(matches!(
            select_variant::<f64>(&caps, 64, 64, 64),
            GemmVariant::NoLocalMemory { .. }
        ));

        // 16 x 16 work-items exceed a 128-item work-group limit.
        let mut caps = DeviceCaps::host().clone();
        caps.device_type = DeviceType::AmdGpu;
        caps.max_workgroup_size = 128;
        assert!(matches!(
            select_variant::<f32>(&caps, 64, 64, 64),
            GemmVariant::NoLocalMemory { workgroup_size: 128 }
        ));
    }

    #[test]
    fn test_dispatch_on_configured_devices() {
        let p = Problem::random(true, false, 10, 40, 30, 5);
        let expected = p.expected(1.0, 1.0);
        for config in [
            QueueConfig::host(),
            QueueConfig::host().with_platform("Intel(R) Level-Zero", true),
            QueueConfig::host().with_platform("AMD Accelerated Parallel Processing", true),
            QueueConfig::host().with_local_memory(false),
        ] {
            let ex = Executor::new(HostQueue::with_config(config).unwrap());
            assert_eq!(p.run(&ex, 1.0, 1.0, None), expected);
        }
    }
}
