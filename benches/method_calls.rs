use std::io;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loxvm::Vm;

/// Compare `INVOKE` against reading the method and calling the bound method.
pub fn method_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("method_calls");
    let programs = [
        ("invoke", "foo.foo();"),
        ("bound", "var m = foo.foo; m();"),
        ("field", "foo.field();"),
    ];
    for (name, call) in programs {
        let script = format!(
            "class Foo {{ foo() {{}} }}
             fun bar() {{}}
             var foo = Foo();
             foo.field = bar;
             for (var i = 0; i < 10000; i = i + 1) {{ {call} }}"
        );
        group.bench_with_input(BenchmarkId::from_parameter(name), &script, |b, script| {
            let mut vm = Vm::default().with_output(io::sink(), io::sink());
            b.iter(|| vm.interpret(black_box(script)));
        });
    }
    group.finish();
}

criterion_group!(benches, method_calls);
criterion_main!(benches);
