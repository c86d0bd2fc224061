//! End-to-end CLI tests driving the built `faxt` binary against the
//! concrete scenarios of spec.md §8 and its exit-code contract (§6).

use assert_cmd::Command;
use predicates::str::contains;
use std::io::Write;
use tempfile::{Builder, NamedTempFile};

fn script(source: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(".fax").tempfile().unwrap();
    write!(file, "{source}").unwrap();
    file
}

#[test]
fn arithmetic_and_precedence() {
    let file = script("print 1 + 2 * 3;");
    Command::cargo_bin("faxt")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout(contains("7"));
}

#[test]
fn string_concatenation() {
    let file = script(r#"var a = "he"; var b = "llo"; print a + b;"#);
    Command::cargo_bin("faxt")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout(contains("hello"));
}

#[test]
fn closures_capture_by_reference() {
    let file = script(
        "fun counter() { var n = 0; fun inc() { n = n + 1; return n; } return inc; } \
         var c = counter(); print c(); print c(); print c();",
    );
    Command::cargo_bin("faxt")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout(contains("1\n2\n3"));
}

#[test]
fn classes_methods_and_this() {
    let file = script(
        r#"class P { greet() { print "hi " + this.name; } } var p = P(); p.name = "world"; p.greet();"#,
    );
    Command::cargo_bin("faxt")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout(contains("hi world"));
}

#[test]
fn single_inheritance_and_init() {
    let file = script(
        "class A { init(v) { this.v = v; } } class B < A { show() { print this.v; } } B(7).show();",
    );
    Command::cargo_bin("faxt")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout(contains("7"));
}

#[test]
fn runtime_type_error_exits_70_with_message() {
    let file = script(r#"print 1 + "x";"#);
    Command::cargo_bin("faxt")
        .unwrap()
        .arg(file.path())
        .assert()
        .code(70)
        .stderr(contains("Operands must be two numbers or two strings."));
}

#[test]
fn compile_error_exits_65() {
    let file = script("print;");
    Command::cargo_bin("faxt")
        .unwrap()
        .arg(file.path())
        .assert()
        .code(65);
}

#[test]
fn missing_file_exits_74() {
    Command::cargo_bin("faxt")
        .unwrap()
        .arg("/nonexistent/path/does-not-exist.fax")
        .assert()
        .code(74);
}

#[test]
fn empty_program_produces_no_output_and_exits_0() {
    let file = script("");
    Command::cargo_bin("faxt")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout("");
}

#[test]
fn too_many_positional_arguments_is_rejected() {
    Command::cargo_bin("faxt")
        .unwrap()
        .args(["a.fax", "b.fax"])
        .assert()
        .failure();
}
