// ========================================================================================
//
//                 Kernel exponential family: fit and evaluation benchmark
//
// ========================================================================================
//
// Fitting is dominated by the O(N^2 D^2) system assembly and the cubic solve;
// evaluation is O(N D^2) per query. The sizes below bracket where assembly stops
// being negligible next to the factorization.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kexfam::KernelExpFamily;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const NUM_DIMENSIONS: usize = 3;
const SIGMA: f64 = 2.0;
const LAMBDA: f64 = 0.1;
const NUM_QUERIES: usize = 500;

fn gaussian_matrix(seed: u64, rows: usize, cols: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");
    Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut rng))
}

fn benchmark_fit(c: &mut Criterion) {
    let sizes = [25_usize, 50, 100];

    let mut group = c.benchmark_group("fit");
    group.sample_size(10);
    for &num_data in &sizes {
        let data = gaussian_matrix(0x5EED + num_data as u64, NUM_DIMENSIONS, num_data);
        group.throughput(Throughput::Elements((num_data * num_data) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(num_data), &data, |b, input| {
            b.iter(|| {
                let mut model =
                    KernelExpFamily::new(input.clone(), SIGMA, LAMBDA).expect("valid inputs");
                model.fit().expect("fit succeeds on a Gaussian sample");
                black_box(model);
            });
        });
    }
    group.finish();
}

fn benchmark_log_pdf_many(c: &mut Criterion) {
    let sizes = [25_usize, 100];
    let queries = gaussian_matrix(7, NUM_DIMENSIONS, NUM_QUERIES);

    let mut group = c.benchmark_group("log_pdf_many");
    group.throughput(Throughput::Elements(NUM_QUERIES as u64));
    for &num_data in &sizes {
        let data = gaussian_matrix(0x5EED + num_data as u64, NUM_DIMENSIONS, num_data);
        let mut model = KernelExpFamily::new(data, SIGMA, LAMBDA).expect("valid inputs");
        model.fit().expect("fit succeeds on a Gaussian sample");

        group.bench_with_input(BenchmarkId::from_parameter(num_data), &model, |b, model| {
            b.iter(|| {
                let values = model.log_pdf_many(black_box(queries.view()));
                black_box(values).expect("model is fitted");
            });
        });
    }
    group.finish();
}

criterion_group!(fit_benchmark, benchmark_fit, benchmark_log_pdf_many);
criterion_main!(fit_benchmark);
