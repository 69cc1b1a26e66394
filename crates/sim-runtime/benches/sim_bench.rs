use criterion::{criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use sim_core::{
    Business, BusinessId, InMemoryCatalog, Material, MaterialId, Product, ProductId, SimConfig,
};

fn busy_catalog() -> InMemoryCatalog {
    let business = Business {
        id: BusinessId("bench".into()),
        name: "Bench Works".into(),
        production_slots_count: 8,
        delivery_time_seconds: 4,
        queue_count: 4,
    };
    let materials = (0u32..6)
        .map(|i| Material {
            id: MaterialId(format!("M{i}")),
            name: format!("Material {i}"),
            time_required: 1 + i % 3,
            stock: u32::MAX / 2,
        })
        .collect();
    let products = (0u32..6)
        .map(|i| Product {
            id: ProductId(format!("P{i}")),
            name: format!("Product {i}"),
            price: Decimal::new(5 + i64::from(i), 0),
            materials: (0..=i % 4).map(|m| MaterialId(format!("M{}", (i + m) % 6))).collect(),
        })
        .collect();
    InMemoryCatalog::new(business, materials, products).unwrap()
}

fn bench_ticks(c: &mut Criterion) {
    let mut sim = sim_runtime::Simulation::new(busy_catalog(), SimConfig::default()).unwrap();
    c.bench_function("sim_tick", |b| {
        b.iter(|| {
            sim.add_random_customer();
            let _ = sim.tick();
        })
    });
}

criterion_group!(benches, bench_ticks);
criterion_main!(benches);
