use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dtm_3d::{
    builder::build_point_cloud,
    normals::{estimate_normals, NormalParams},
    pointcloud::PointCloud,
    poisson::{poisson_reconstruction, PoissonParams},
};
use dtm_image::Grid;

// a rolling terrain with upward facing sample normals
fn terrain(size: usize) -> PointCloud {
    let depth = Grid::from_fn([size, size].into(), |row, col| {
        let (x, y) = (col as f32 / size as f32, row as f32 / size as f32);
        20.0 * (6.0 * x).sin() * (4.0 * y).cos()
    });
    let intensity = Grid::from_size_val([size, size].into(), 0.5f32);
    match build_point_cloud(&depth, &intensity, size) {
        Ok(cloud) => cloud,
        Err(e) => panic!("failed to build the benchmark cloud: {e}"),
    }
}

fn bench_estimate_normals(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_normals");

    for size in [64, 128, 256].iter() {
        group.throughput(criterion::Throughput::Elements((size * size) as u64));
        let cloud = terrain(*size);

        group.bench_with_input(BenchmarkId::new("knn30", size), &cloud, |b, cloud| {
            b.iter(|| {
                let mut cloud = cloud.clone();
                let _ = estimate_normals(black_box(&mut cloud), &NormalParams::default());
            })
        });
    }
    group.finish();
}

fn bench_poisson(c: &mut Criterion) {
    let mut group = c.benchmark_group("poisson_reconstruction");
    group.sample_size(10);

    let mut cloud = terrain(128);
    let _ = estimate_normals(&mut cloud, &NormalParams::default());

    for depth in [4, 5, 6].iter() {
        let params = PoissonParams {
            depth: *depth,
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::new("depth", depth), &params, |b, params| {
            b.iter(|| poisson_reconstruction(black_box(cloud.clone()), params))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_estimate_normals, bench_poisson);
criterion_main!(benches);
