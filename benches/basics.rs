//! Whole-program benchmarks, each one stressing a different part of the machine.

use std::io;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use loxvm::{Config, Vm};

fn bench_program(c: &mut Criterion, name: &str, config: Config, src: &str) {
    c.bench_function(name, |b| {
        let mut vm = Vm::new(config.clone()).with_output(io::sink(), io::sink());
        b.iter(|| vm.interpret(black_box(src)));
    });
}

pub fn fib(c: &mut Criterion) {
    let src = r#"
fun fib(n) { if (n < 2) return n; return fib(n - 2) + fib(n - 1); }
fib(20);
"#;
    bench_program(c, "fib_20", Config::default(), src);
}

pub fn loops(c: &mut Criterion) {
    let src = r#"
var sum = 0;
for (var i = 0; i < 20000; i = i + 1) {
  if (i / 2 == 0 or i > 10000 and !(i <= 15000)) sum = sum - i;
  else sum = sum + i;
}
"#;
    bench_program(c, "loops", Config::default(), src);
}

pub fn closures(c: &mut Criterion) {
    let src = r#"
fun counter() {
  var n = 0;
  fun inc() { n = n + 1; return n; }
  return inc;
}
var total = 0;
for (var i = 0; i < 500; i = i + 1) {
  var c = counter();
  c(); c(); c();
  total = total + c();
}
"#;
    bench_program(c, "closures", Config::default(), src);
}

pub fn string_concat(c: &mut Criterion) {
    let src = r#"
var s = "";
for (var i = 0; i < 300; i = i + 1) {
  s = s + "x";
  var garbage = s + "y";
}
"#;
    bench_program(c, "string_concat", Config::default(), src);
}

pub fn binary_trees(c: &mut Criterion) {
    let src = r#"
class Node {
  init(depth) {
    if (depth > 0) {
      this.left = Node(depth - 1);
      this.right = Node(depth - 1);
    } else {
      this.left = nil;
      this.right = nil;
    }
  }

  count() {
    if (this.left == nil) return 1;
    return 1 + this.left.count() + this.right.count();
  }
}

var live = Node(6);
for (var i = 0; i < 20; i = i + 1) {
  Node(5).count();
}
live.count();
"#;
    bench_program(c, "binary_trees", Config::default(), src);

    let stress = Config {
        stress_gc: true,
        ..Config::default()
    };
    bench_program(c, "binary_trees_stress_gc", stress, src);
}

pub fn inheritance(c: &mut Criterion) {
    let src = r#"
class Animal {
  init(name) { this.name = name; }
  speak() { return this.name; }
}
class Dog < Animal {
  init(name) { super.init(name); this.tricks = 0; }
  speak() { return super.speak() + " barks"; }
  learn() { this.tricks = this.tricks + 1; return this; }
}
var dog = Dog("rex");
for (var i = 0; i < 2000; i = i + 1) {
  dog.learn().learn();
  dog.speak();
  var bark = dog.speak;
  bark();
}
"#;
    bench_program(c, "inheritance", Config::default(), src);
}

criterion_group!(
    benches,
    fib,
    loops,
    closures,
    string_concat,
    binary_trees,
    inheritance,
);
criterion_main!(benches);
