use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use meshbin_merge::merge::{knapsack, KnapsackItem};
use meshbin_merge::scene::{BuiltScene, IndexWidth, MeshSpec};
use meshbin_merge::{
    Endianness, FileInput, InMemoryResourceManager, LoadSession, MergeConfig, SceneBuilder,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn knapsack_items(count: usize) -> Vec<KnapsackItem> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    (0..count)
        .map(|_| KnapsackItem {
            cost: rng.random_range(1_000..200_000u64),
            value: rng.random_range(1..64u64),
        })
        .collect()
}

/// `files` mesh-bin files of `nodes` small meshes spread over 16 materials.
fn scene(files: u16, nodes: u32) -> BuiltScene {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut builder = SceneBuilder::new(Endianness::Little);
    let layout = builder.add_layout([4, 0, 7, 1, 0, 0, 0, 0]).unwrap();
    for file in 0..files {
        for _ in 0..nodes {
            let vertices = rng.random_range(24..400u32);
            let mesh = builder.add_mesh(
                file,
                MeshSpec::grid(layout, vertices, IndexWidth::for_vertex_count(vertices as u64)),
            )
            .expect("registered layout");
            builder.add_node(mesh, rng.random_range(0..16u16));
        }
    }
    builder.build()
}

fn inputs(scene: &BuiltScene) -> Vec<FileInput> {
    scene
        .files
        .iter()
        .enumerate()
        .map(|(i, bytes)| FileInput::new(i as u16, BuiltScene::file_name(i), bytes.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

fn bench_knapsack_1k(c: &mut Criterion) {
    let items = knapsack_items(1_000);
    let budget: u64 = items.iter().map(|i| i.cost).sum::<u64>() / 3;
    c.bench_function("knapsack_1k_items", |b| {
        b.iter(|| black_box(knapsack::solve(black_box(&items), budget, 262_144)));
    });
}

fn bench_knapsack_coarse(c: &mut Criterion) {
    let items = knapsack_items(10_000);
    let budget: u64 = items.iter().map(|i| i.cost).sum::<u64>() / 3;
    c.bench_function("knapsack_10k_items_1k_buckets", |b| {
        b.iter(|| black_box(knapsack::solve(black_box(&items), budget, 1_024)));
    });
}

// ---------------------------------------------------------------------------
// Full loads
// ---------------------------------------------------------------------------

fn bench_load_sync(c: &mut Criterion) {
    let scene = scene(4, 500);
    let files = inputs(&scene);
    let session = LoadSession::new(MergeConfig::default(), &scene.model_bin, scene.layouts.clone())
        .expect("valid config");
    c.bench_function("load_sync_4x500", |b| {
        b.iter_batched(
            InMemoryResourceManager::new,
            |resources| black_box(session.load_sync(&files, &resources)),
            BatchSize::SmallInput,
        );
    });
}

fn bench_load_parallel(c: &mut Criterion) {
    let scene = scene(4, 500);
    let session = LoadSession::new(
        MergeConfig::default().with_max_workers(4),
        &scene.model_bin,
        scene.layouts.clone(),
    )
    .expect("valid config");
    c.bench_function("load_parallel_4x500", |b| {
        b.iter_batched(
            || (inputs(&scene), InMemoryResourceManager::new()),
            |(files, resources)| black_box(session.load_parallel(files, &resources)),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(planning, bench_knapsack_1k, bench_knapsack_coarse);
criterion_group!(loading, bench_load_sync, bench_load_parallel);
criterion_main!(planning, loading);
