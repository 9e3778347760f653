// Integration tests: compile-and-run full Lox programs through the public
// `lox::interpret` entry point and assert on captured stdout, mirroring the
// teacher's `run_code(code: &str) -> Interpreter` harness pattern.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Runs `source` in a fresh child process and returns what it printed to
/// stdout. A child process is used (rather than redirecting `println!` in
/// this process) because the VM's `print` statement writes straight to the
/// real stdout, and Rust gives no portable way to capture that from within
/// the same process. Tests run concurrently in threads of one process, so
/// the temp file name is disambiguated by pid plus a per-call counter.
fn run_source(source: &str) -> (String, std::process::ExitStatus) {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let script = std::env::temp_dir().join(format!("lox_test_{}_{}.lox", std::process::id(), id));
    std::fs::write(&script, source).expect("write temp script");

    let mut child = Command::new(env!("CARGO_BIN_EXE_lox"))
        .arg(&script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn lox binary");

    let status = child.wait().expect("wait for lox binary");
    let mut stdout = String::new();
    child.stdout.take().unwrap().read_to_string_checked(&mut stdout);

    let _ = std::fs::remove_file(&script);
    (stdout, status)
}

trait ReadToStringChecked {
    fn read_to_string_checked(self, buf: &mut String);
}

impl ReadToStringChecked for std::process::ChildStdout {
    fn read_to_string_checked(mut self, buf: &mut String) {
        use std::io::Read;
        let _ = self.read_to_string(buf);
    }
}

#[test]
fn arithmetic_precedence_and_print() {
    let (stdout, status) = run_source("print 1 + 2 * 3;");
    assert!(status.success());
    assert_eq!(stdout.trim(), "7");
}

#[test]
fn string_concatenation() {
    let (stdout, status) = run_source(r#"print "foo" + "bar";"#);
    assert!(status.success());
    assert_eq!(stdout.trim(), "foobar");
}

#[test]
fn shadowing_in_nested_scope() {
    let source = r#"
        var x = "outer";
        {
            var x = "inner";
            print x;
        }
        print x;
    "#;
    let (stdout, status) = run_source(source);
    assert!(status.success());
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["inner", "outer"]);
}

#[test]
fn closures_capture_by_reference() {
    let source = r#"
        fun makeCounter() {
            var i = 0;
            fun count() {
                i = i + 1;
                print i;
            }
            return count;
        }
        var counter = makeCounter();
        counter();
        counter();
        counter();
    "#;
    let (stdout, status) = run_source(source);
    assert!(status.success());
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["1", "2", "3"]);
}

#[test]
fn for_loop_accumulates() {
    let source = r#"
        var sum = 0;
        for (var i = 0; i < 5; i = i + 1) {
            sum = sum + i;
        }
        print sum;
    "#;
    let (stdout, status) = run_source(source);
    assert!(status.success());
    assert_eq!(stdout.trim(), "10");
}

#[test]
fn recursive_function_call() {
    let source = r#"
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        print fib(10);
    "#;
    let (stdout, status) = run_source(source);
    assert!(status.success());
    assert_eq!(stdout.trim(), "55");
}

#[test]
fn native_clock_is_callable_and_numeric() {
    let source = r#"
        var t = clock();
        print t >= 0;
    "#;
    let (stdout, status) = run_source(source);
    assert!(status.success());
    assert_eq!(stdout.trim(), "true");
}

#[test]
fn undefined_variable_is_a_runtime_error_exit_70() {
    let (_stdout, status) = run_source("print undefinedThing;");
    assert_eq!(status.code(), Some(70));
}

#[test]
fn syntax_error_is_a_compile_error_exit_65() {
    let (_stdout, status) = run_source("var = ;");
    assert_eq!(status.code(), Some(65));
}

#[test]
fn and_or_short_circuit() {
    let source = r#"
        fun sideEffect() {
            print "called";
            return true;
        }
        false and sideEffect();
        true or sideEffect();
        print "done";
    "#;
    let (stdout, status) = run_source(source);
    assert!(status.success());
    assert_eq!(stdout.trim(), "done");
}
