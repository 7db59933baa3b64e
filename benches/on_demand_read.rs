use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tree_chain::config::ChainOptions;
use tree_chain::data::ChainBuilder;
use tree_chain::source::{MemoryEngine, MemoryTable};

const COLUMNS: usize = 40;

fn create_wide_engine(rows: usize, files: usize) -> (MemoryEngine, Vec<String>) {
    let engine = MemoryEngine::new();
    let mut names = Vec::new();
    for f in 0..files {
        let mut table = MemoryTable::new();
        for c in 0..COLUMNS {
            let values: Vec<f64> = (0..rows).map(|r| (r * c) as f64).collect();
            table = table.with_column(&format!("var{c}"), "D", values);
        }
        let name = format!("part{f}.mem");
        engine.add_table(name.as_str(), "events", table);
        names.push(name);
    }
    (engine, names)
}

fn scan(engine: &MemoryEngine, files: &[String], read_on_demand: bool) -> f64 {
    let options = ChainOptions::default().with_read_on_demand(read_on_demand);
    let mut chain = ChainBuilder::new("events", engine.clone())
        .options(options)
        .files(files.iter().cloned())
        .unwrap();
    let mut sum = 0.0;
    while let Some(row) = chain.next_row().unwrap() {
        sum += row.get_f64("var3").unwrap();
    }
    sum
}

fn benchmark_column_reads(c: &mut Criterion) {
    let (engine, files) = create_wide_engine(5_000, 4);

    let mut group = c.benchmark_group("wide_table_one_column");

    group.bench_function("on_demand", |b| {
        b.iter(|| black_box(scan(&engine, &files, true)))
    });

    group.bench_function("eager", |b| {
        b.iter(|| black_box(scan(&engine, &files, false)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_column_reads);
criterion_main!(benches);
