#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fixlog::{Atom, Engine, RelationSymbol, Rule, Term};

fn node(i: i64) -> Term {
    Term::str(&format!("node_{i}"))
}

fn setup_large_graph() -> anyhow::Result<Engine> {
    let edge = RelationSymbol::extensional("edge", 2);
    let path = RelationSymbol::intensional("path", 2);
    let mut engine = Engine::new();

    // Create a graph with 200 nodes and 3 outgoing edges each
    for i in 0..200 {
        for j in 0..3 {
            let next = (i + j + 1) % 200;
            engine.add_fact(Atom::new(edge.clone(), vec![node(i), node(next)]))?;
        }
    }

    // Add transitive closure rules
    let pair = |rel: &RelationSymbol, a: &str, b: &str| Atom::new(rel.clone(), vec![Term::var(a), Term::var(b)]);
    engine.add_stratum(vec![
        Rule::new(pair(&path, "x", "y"), vec![pair(&edge, "x", "y").into()]),
        Rule::new(
            pair(&path, "x", "z"),
            vec![pair(&path, "x", "y").into(), pair(&edge, "y", "z").into()],
        ),
    ])?;
    engine.run()?;
    Ok(engine)
}

fn path_query(from: Term, to: Term) -> Atom {
    Atom::new(RelationSymbol::intensional("path", 2), vec![from, to])
}

fn query_specific_paths(c: &mut Criterion) {
    let engine = setup_large_graph().unwrap();

    c.bench_function("query_specific_paths", |b| {
        b.iter(|| black_box(engine.query(&path_query(node(0), Term::var("x")))));
    });
}

fn query_existence_check(c: &mut Criterion) {
    let engine = setup_large_graph().unwrap();

    c.bench_function("query_existence_check", |b| {
        b.iter(|| black_box(engine.ask(&path_query(node(0), node(100)))));
    });
}

fn query_all_paths(c: &mut Criterion) {
    let engine = setup_large_graph().unwrap();

    c.bench_function("query_all_paths", |b| {
        b.iter(|| black_box(engine.query(&path_query(Term::var("x"), Term::var("y")))));
    });
}

criterion_group!(
    benches,
    query_specific_paths,
    query_existence_check,
    query_all_paths
);
criterion_main!(benches);
