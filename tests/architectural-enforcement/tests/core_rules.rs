//! Rules for the flowstream core library

use architectural_enforcement::{rust_sources, scan, workspace_root};

fn core_src() -> std::path::PathBuf {
    workspace_root().join("flowstream").join("core").join("src")
}

#[test]
fn core_sources_are_found() {
    assert!(
        !rust_sources(&core_src()).is_empty(),
        "expected Rust sources under {:?}",
        core_src()
    );
}

#[test]
fn no_process_exit_in_core() {
    let violations = scan(&core_src(), &["process::exit", "process::abort"]);
    assert!(
        violations.is_empty(),
        "ending a stream must stay local, found: {violations:#?}"
    );
}

#[test]
fn no_sleep_polling_in_core() {
    let violations = scan(
        &core_src(),
        &["thread::sleep", "time::sleep", "sleep_until", "interval("],
    );
    assert!(
        violations.is_empty(),
        "fan-out must not poll with timers, found: {violations:#?}"
    );
}

#[test]
fn no_unwrap_in_core_library_code() {
    let violations = scan(&core_src(), &[".unwrap()", ".expect("]);
    assert!(
        violations.is_empty(),
        "library code must propagate errors, found: {violations:#?}"
    );
}
