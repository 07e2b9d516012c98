use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use ncmill_interp::param::ParamTable;
use ncmill_interp::{parse_block, Interpreter, Program};

/// A movement-heavy program of `lines` blocks ending in M2.
fn movement_program(lines: usize) -> String {
    let mut src = String::new();
    src.push_str("G21 G90 G17\nF1200\n");
    for i in 0..lines {
        src.push_str(&format!(
            "G1 X{:.3} Y{:.3} Z{:.3}\n",
            (i as f64) * 0.1,
            (i as f64) * 0.2,
            (i as f64) * 0.05,
        ));
    }
    src.push_str("M2\n");
    src
}

fn bench_parse_block(c: &mut Criterion) {
    let params = {
        let mut p = ParamTable::new();
        p.set(1, 2.5);
        p
    };
    let cases = [
        ("simple_move", "G1 X10 Y20 F100"),
        ("expression", "G1 X[#1 * 2 + SIN[30]] Y[10 / 4]"),
        ("with_comment", "G0 X1 (rapid to start) Y2"),
        ("assignment", "#100 = [#1 ** 2]"),
    ];
    let mut group = c.benchmark_group("parse_block");
    for (name, line) in cases {
        group.bench_function(name, |b| {
            b.iter(|| parse_block(black_box(line), 1, &params, true))
        });
    }
    group.finish();
}

fn bench_interpret_program(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpret_program");
    for lines in [100usize, 1000] {
        let src = movement_program(lines);
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_function(format!("{lines}_blocks"), |b| {
            b.iter(|| {
                let mut interp =
                    Interpreter::new(Program::from_text("bench", black_box(&src))).unwrap();
                interp.run_to_end().unwrap().len()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse_block, bench_interpret_program);
criterion_main!(benches);
