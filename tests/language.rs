mod common;

use common::{output, Session};

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(output("print (2 + 3) * 4;"), "20\n");
    assert_eq!(output("print 1 - 2 - 3;"), "-4\n");
    assert_eq!(output("print 10 / 4;"), "2.5\n");
    assert_eq!(output("print -(3) + 1;"), "-2\n");
    assert_eq!(output("print 2 + 3 * 4 - 6 / 2;"), "11\n");
    assert_eq!(output("print 0.1 + 0.2;"), "0.30000000000000004\n");
}

#[test]
fn comparison_and_equality() {
    assert_eq!(
        output(
            "print 1 < 2 == true;
             print 2 <= 2;
             print 3 >= 4;
             print 1 > 0;
             print nil == false;
             print 1 == 1;
             print \"a\" != \"b\";
             print !nil;
             print !0;"
        ),
        "true\ntrue\nfalse\ntrue\nfalse\ntrue\ntrue\ntrue\nfalse\n"
    );
}

#[test]
fn strings_are_interned() {
    assert_eq!(
        output(
            "print \"a\" + \"b\" == \"ab\";
             var s = \"con\";
             s = s + \"cat\";
             print s;
             print s == \"concat\";"
        ),
        "true\nconcat\ntrue\n"
    );
}

#[test]
fn logical_operators_return_operands() {
    assert_eq!(
        output(
            "print nil or \"x\";
             print 1 and 2;
             print false and undefined;
             print true or undefined;"
        ),
        "x\n2\nfalse\ntrue\n"
    );
}

#[test]
fn shadowing_in_blocks() {
    assert_eq!(
        output("var a = 1; { var a = 2; print a; } print a;"),
        "2\n1\n"
    );
    assert_eq!(
        output("var a = \"global\"; { var b = a + \"!\"; { var a = b; print a; } }"),
        "global!\n"
    );
}

#[test]
fn control_flow() {
    assert_eq!(
        output(
            "if (1 > 2) print \"then\"; else print \"else\";
             var i = 0;
             while (i < 3) { print i; i = i + 1; }
             for (var j = 10; j > 8; j = j - 1) print j;
             var k = 0;
             for (; k < 2;) k = k + 1;
             print k;"
        ),
        "else\n0\n1\n2\n10\n9\n2\n"
    );
}

#[test]
fn functions_and_recursion() {
    assert_eq!(
        output(
            "fun add(a, b) { return a + b; }
             print add(1, 2);
             fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
             print fib(15);
             fun noReturn() {}
             print noReturn();
             print add;
             print clock;"
        ),
        "3\n610\nnil\n<fn add>\n<native fn>\n"
    );
}

#[test]
fn closures_count_independently() {
    assert_eq!(
        output(
            "fun make() {
               var x = 0;
               fun inc() { x = x + 1; return x; }
               return inc;
             }
             var c1 = make();
             var c2 = make();
             print c1();
             print c1();
             print c2();"
        ),
        "1\n2\n1\n"
    );
}

#[test]
fn closures_share_captured_variables() {
    assert_eq!(
        output(
            "var show; var set;
             {
               var a = \"before\";
               fun s() { print a; }
               fun t() { a = \"after\"; }
               show = s; set = t;
             }
             set();
             show();"
        ),
        "after\n"
    );
}

#[test]
fn closures_capture_through_several_levels() {
    assert_eq!(
        output(
            "fun outer() {
               var x = \"outer\";
               fun middle() {
                 fun inner() { return x; }
                 return inner;
               }
               return middle;
             }
             print outer()()();"
        ),
        "outer\n"
    );
}

#[test]
fn each_loop_iteration_gets_a_fresh_variable() {
    assert_eq!(
        output(
            "var first; var second;
             for (var i = 0; i < 2; i = i + 1) {
               var j = i;
               fun f() { return j; }
               if (first == nil) first = f; else second = f;
             }
             print first();
             print second();"
        ),
        "0\n1\n"
    );
}

#[test]
fn classes_fields_and_methods() {
    assert_eq!(
        output(
            "class Point {
               init(x, y) { this.x = x; this.y = y; }
               sum() { return this.x + this.y; }
             }
             var p = Point(1, 2);
             print p.sum();
             print p;
             print Point;
             print p.init(3, 4).x;
             var m = p.sum;
             print m();
             print m;
             p.sum = \"field\";
             print p.sum;"
        ),
        "3\nPoint instance\nPoint\n3\n7\n<fn sum>\nfield\n"
    );
}

#[test]
fn fields_holding_functions_can_be_invoked() {
    assert_eq!(
        output(
            "class Box {}
             fun hi(name) { return \"hi \" + name; }
             var b = Box();
             b.greet = hi;
             print b.greet(\"lox\");"
        ),
        "hi lox\n"
    );
}

#[test]
fn inheritance_and_super() {
    assert_eq!(
        output(
            "class A {
               method() { print \"A method\"; }
               say() { print \"A say\"; }
             }
             class B < A {
               method() { print \"B method\"; }
               test() { super.method(); }
               getter() { var f = super.say; f(); }
             }
             class C < B {}
             C().test();
             C().method();
             B().say();
             B().getter();"
        ),
        "A method\nB method\nA say\nA say\n"
    );
}

#[test]
fn subclasses_inherit_and_override_methods() {
    assert_eq!(
        output(
            "class A { greet() { return \"A\"; } }
             class B < A {}
             print B().greet();
             class C < A {
               greet() { return \"C\"; }
               test() { return super.greet(); }
             }
             print C().greet();
             print C().test();"
        ),
        "A\nC\nA\n"
    );
}

#[test]
fn initializers_chain_through_super() {
    assert_eq!(
        output(
            "class Animal { init(name) { this.name = name; } }
             class Dog < Animal {
               init(name) { super.init(name); this.sound = \"woof\"; }
               speak() { return this.name + \" says \" + this.sound; }
             }
             print Dog(\"rex\").speak();"
        ),
        "rex says woof\n"
    );
}

#[test]
fn bound_methods_remember_their_receiver() {
    assert_eq!(
        output(
            "class Counter {
               init() { this.n = 0; }
               inc() { this.n = this.n + 1; return this.n; }
             }
             var c = Counter();
             var inc = c.inc;
             inc();
             inc();
             print c.n;"
        ),
        "2\n"
    );
}

#[test]
fn globals_persist_across_runs() {
    let mut session = Session::new();
    session.run("var a = 1;").unwrap();
    session.run("fun double(x) { return x * 2; }").unwrap();
    session.run("print double(a);").unwrap();
    assert_eq!(session.stdout(), "2\n");
}
