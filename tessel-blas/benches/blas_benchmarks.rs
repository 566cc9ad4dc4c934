use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tessel_blas::{level1, level3, Executor};
use tessel_core::{Backend, DevicePtr, HostQueue};

fn upload(ex: &Executor<HostQueue>, data: &[f32]) -> DevicePtr<f32> {
    let ptr = ex.backend().allocate::<f32>(data.len()).unwrap();
    ex.backend().copy_to_device(data, &ptr).unwrap();
    ptr
}

fn bench_sdot(c: &mut Criterion) {
    let ex = Executor::new(HostQueue::new().unwrap());
    let mut group = c.benchmark_group("sdot");
    for &n in &[256, 4096, 65536, 1 << 20] {
        let x = upload(&ex, &(0..n).map(|i| i as f32 * 0.001).collect::<Vec<_>>());
        let y = upload(&ex, &(0..n).map(|i| i as f32 * 0.002).collect::<Vec<_>>());
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| level1::dot(&ex, n, &x, 1, &y, 1).unwrap());
        });
    }
    group.finish();
}

fn bench_saxpy(c: &mut Criterion) {
    let ex = Executor::new(HostQueue::new().unwrap());
    let mut group = c.benchmark_group("saxpy");
    for &n in &[256, 4096, 65536, 1 << 20] {
        let x = upload(&ex, &(0..n).map(|i| i as f32 * 0.001).collect::<Vec<_>>());
        let y = upload(&ex, &vec![0.0f32; n]);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| level1::axpy(&ex, n, 2.0, &x, 1, &y, 1).wait().unwrap());
        });
    }
    group.finish();
}

fn bench_sgemm(c: &mut Criterion) {
    let ex = Executor::new(HostQueue::new().unwrap());
    let mut group = c.benchmark_group("sgemm");
    for &n in &[32, 64, 128, 256] {
        let a = upload(&ex, &(0..n * n).map(|i| (i as f32 * 0.001).sin()).collect::<Vec<_>>());
        let b = upload(&ex, &(0..n * n).map(|i| (i as f32 * 0.002).cos()).collect::<Vec<_>>());
        let c_mat = upload(&ex, &vec![0.0f32; n * n]);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, &n| {
            bench.iter(|| {
                level3::gemm(&ex, 'n', 'n', n, n, n, 1.0, &a, n, &b, n, 0.0, &c_mat, n)
                    .unwrap()
                    .wait()
                    .unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sdot, bench_saxpy, bench_sgemm);
criterion_main!(benches);
