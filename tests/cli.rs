use std::{
    env, fs,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

fn bin_path() -> String {
    if let Ok(path) = env::var("CARGO_BIN_EXE_prime-coro") {
        return path;
    }
    let mut fallback =
        PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("manifest dir not set by cargo"));
    fallback.push("target");
    fallback.push("debug");
    fallback.push("prime-coro");
    if cfg!(windows) {
        fallback.set_extension("exe");
    }
    if fallback.exists() {
        return fallback.to_string_lossy().into_owned();
    }
    panic!(
        "binary path not set by cargo test and fallback {:?} not found",
        fallback
    );
}

fn root() -> String {
    env::var("CARGO_MANIFEST_DIR").expect("manifest dir not set by cargo")
}

fn prime_coro(args: &[&str]) -> Output {
    Command::new(bin_path())
        .current_dir(root())
        .args(args)
        .env_remove("PRIME_CORO_ELIDE")
        .env_remove("PRIME_CORO_STEP_LIMIT")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run prime-coro")
}

fn write_source(dir: &Path, name: &str, source: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, source).expect("write source");
    path.to_string_lossy().into_owned()
}

#[test]
fn runs_the_range_demo() {
    let output = prime_coro(&["run", "demos/range.coro"]);
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("result: 190"), "unexpected output:\n{stdout}");
    assert!(
        stdout.contains("21 suspends, 20 resumes, 1 destroys, 1 allocs, 1 frees, 1 teardowns"),
        "unexpected summary:\n{stdout}"
    );
}

#[test]
fn elision_skips_allocation() {
    let output = prime_coro(&["run", "demos/range.coro", "--elide"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("result: 190"));
    assert!(stdout.contains("0 allocs, 0 frees, 1 teardowns"), "unexpected summary:\n{stdout}");
}

#[test]
fn task_demo_runs_deferred_cleanup() {
    let output = prime_coro(&["run", "demos/task.coro"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("trace 20\n"), "missing trace:\n{stdout}");
    assert!(stdout.contains("result: 42"), "unexpected output:\n{stdout}");
}

#[test]
fn emit_prints_coroutine_ir() {
    let output = prime_coro(&["emit", "demos/range.coro"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("define ptr @range(i64 %0, i64 %1) coroutine {"));
    assert!(stdout.contains("@llvm.coro.begin("));
    assert!(stdout.contains("coro.destroy:"));
    assert!(stdout.contains("define i64 @main() {"));
}

#[test]
fn syntax_errors_fail_with_diagnostics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_source(dir.path(), "bad.coro", "coro g() -> generator { return 1; }\n");
    let output = prime_coro(&["run", &path]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("`return` is not allowed inside a coroutine"),
        "unexpected stderr:\n{stderr}"
    );
}

#[test]
fn runtime_errors_exit_with_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_source(
        dir.path(),
        "loop.coro",
        "fn main() { while 1 { } return 0; }\n",
    );
    let output = prime_coro(&["run", &path, "--step-limit", "50"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Step limit of 50 exceeded"), "unexpected stderr:\n{stderr}");
}

#[test]
fn rejects_unknown_extensions() {
    let output = prime_coro(&["run", "demos/range.txt"]);
    assert_eq!(output.status.code(), Some(1));
}
