use rox::runner::{run, Outcome};

fn execute(source: &str) -> (String, Outcome) {
    let mut out = Vec::new();
    let outcome = run(source, &mut out);
    (String::from_utf8(out).expect("output is UTF-8"), outcome)
}

fn lines(source: &str) -> Vec<String> {
    let (out, outcome) = execute(source);
    assert!(outcome.is_success(), "program failed: {:?}", outcome);
    out.lines().map(str::to_owned).collect()
}

fn runtime_message(source: &str) -> String {
    match execute(source).1 {
        Outcome::RuntimeError(e) => e.message,
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[test]
fn class_and_instance_display() {
    assert_eq!(
        lines("class Bagel {} print Bagel; print Bagel();"),
        ["Bagel", "Bagel instance"]
    );
}

#[test]
fn fields_are_per_instance() {
    assert_eq!(
        lines(
            "class Box {}\n\
             var a = Box(); var b = Box();\n\
             a.value = 1; b.value = 2;\n\
             print a.value; print b.value;"
        ),
        ["1", "2"]
    );
}

#[test]
fn set_returns_the_assigned_value() {
    assert_eq!(lines("class P {} var p = P(); print p.x = 3;"), ["3"]);
}

#[test]
fn methods_bind_this() {
    assert_eq!(
        lines(
            "class Person {\n\
               init(name) { this.name = name; }\n\
               greet() { return \"hi \" + this.name; }\n\
             }\n\
             var m = Person(\"ann\").greet; print m();"
        ),
        ["hi ann"]
    );
}

#[test]
fn fields_shadow_methods() {
    assert_eq!(
        lines(
            "class A { m() { return \"method\"; } }\n\
             var a = A(); a.m = fun () { return \"field\"; }; print a.m();"
        ),
        ["field"]
    );
}

#[test]
fn initializer_arity_and_result() {
    assert_eq!(
        lines(
            "class Point { init(x, y) { this.x = x; this.y = y; } }\n\
             var p = Point(1, 2); print p.x + p.y;"
        ),
        ["3"]
    );
    assert_eq!(
        runtime_message("class Point { init(x, y) {} } Point(1);"),
        "Expected 2 arguments but got 1."
    );
    assert_eq!(
        runtime_message("class Empty {} Empty(1);"),
        "Expected 0 arguments but got 1."
    );
}

#[test]
fn bare_return_in_initializer_yields_instance() {
    assert_eq!(
        lines(
            "class Early { init(flag) { this.seen = true; if (flag) return; this.seen = false; } }\n\
             var e = Early(true); print e.seen; print e;"
        ),
        ["true", "Early instance"]
    );
}

#[test]
fn calling_init_directly_returns_this() {
    assert_eq!(
        lines("class C { init() { this.n = 1; } } var c = C(); print c.init() == c;"),
        ["true"]
    );
}

#[test]
fn inheritance_and_super() {
    assert_eq!(
        lines(
            "class Animal {\n\
               init(name) { this.name = name; }\n\
               speak() { return this.name + \" makes a sound\"; }\n\
             }\n\
             class Dog < Animal {\n\
               speak() { return super.speak() + \", woof\"; }\n\
             }\n\
             print Dog(\"rex\").speak();"
        ),
        ["rex makes a sound, woof"]
    );
}

#[test]
fn super_binds_this_to_the_receiver() {
    assert_eq!(
        lines(
            "class A { who() { return this.tag; } }\n\
             class B < A { who() { return \"B\"; } viaSuper() { return super.who(); } }\n\
             class C < B {}\n\
             var c = C(); c.tag = \"c-instance\"; print c.viaSuper();"
        ),
        ["c-instance"]
    );
}

#[test]
fn super_resolves_from_the_defining_class() {
    assert_eq!(
        lines(
            "class A { method() { print \"A\"; } }\n\
             class B < A { method() { print \"B\"; } test() { super.method(); } }\n\
             class C < B {}\n\
             C().test();"
        ),
        ["A"]
    );
}

#[test]
fn inherited_methods_are_found() {
    assert_eq!(
        lines("class A { hi() { print \"hi\"; } } class B < A {} B().hi();"),
        ["hi"]
    );
}

#[test]
fn property_errors() {
    assert_eq!(
        runtime_message("class A {} print A().missing;"),
        "Undefined property 'missing'."
    );
    assert_eq!(runtime_message("var x = 1; print x.y;"), "Only instances have properties.");
    assert_eq!(runtime_message("var x = 1; x.y = 2;"), "Only instances have fields.");
    assert_eq!(
        runtime_message("class A {} class B < A { m() { return super.nope; } } B().m();"),
        "Undefined property 'nope'."
    );
}

#[test]
fn superclass_must_be_a_class() {
    assert_eq!(
        runtime_message("var NotAClass = 1; class B < NotAClass {}"),
        "Superclass must be a class."
    );
}

#[test]
fn instances_compare_by_identity() {
    assert_eq!(
        lines("class A {} var a = A(); var b = a; print a == b; print A() == A();"),
        ["true", "false"]
    );
}
