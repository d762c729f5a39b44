use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

fn jtrace() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("jtrace"))
}

/// Fails the entry-point check before `javac` is ever run.
const TWO_PUBLIC_TYPES: &str = "public class A {
    public static void main(String[] args) {}
}
public class B {}
";

const TWO_MAINS: &str = "public class A {
    public static void main(String[] args) {}
}
class B {
    public static void main(String[] args) {}
}
";

#[test]
fn help_mentions_subcommands() {
    jtrace().arg("--help").assert().success().stdout(
        predicate::str::contains("trace").and(predicate::str::contains("list-breakpoints")),
    );
}

#[test]
fn trace_help_lists_formatting_switches() {
    jtrace().args(["trace", "--help"]).assert().success().stdout(
        predicate::str::contains("--remove-main-args")
            .and(predicate::str::contains("--inline-strings"))
            .and(predicate::str::contains("--remove-method-this"))
            .and(predicate::str::contains("--accumulate-breakpoints"))
            .and(predicate::str::contains("--breakpoints")),
    );
}

#[test]
fn trace_failure_prints_a_short_message() {
    jtrace()
        .arg("trace")
        .write_stdin(TWO_PUBLIC_TYPES)
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(
            predicate::str::contains("Unable to generate trace!")
                .and(predicate::str::contains("exactly one public").not()),
        );
}

#[test]
fn verbose_failure_includes_the_cause() {
    jtrace()
        .args(["trace", "-v", "-b", "2,-1"])
        .write_stdin(TWO_PUBLIC_TYPES)
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("Unable to generate trace!")
                .and(predicate::str::contains("exactly one public top-level type"))
                .and(predicate::str::contains("lines [1, 4]")),
        );
}

#[test]
fn list_breakpoints_failure_reads_from_input_file() {
    let temp = TempDir::new().unwrap();
    temp.child("Main.java").write_str(TWO_MAINS).unwrap();

    jtrace()
        .arg("list-breakpoints")
        .arg("--verbose")
        .arg("--input")
        .arg(temp.child("Main.java").path())
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("Unable to list breakpoints!")
                .and(predicate::str::contains("exactly one main method")),
        );
}

#[test]
fn missing_input_file_is_reported_as_a_failure() {
    let temp = TempDir::new().unwrap();

    jtrace()
        .args(["list-breakpoints", "-j", "-v", "-i"])
        .arg(temp.child("Missing.java").path())
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("Unable to list breakpoints!")
                .and(predicate::str::contains("failed to read")),
        );
}

#[test]
fn invalid_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    temp.child("jtrace.toml")
        .write_str("connect_atempts = 3\n")
        .unwrap();

    jtrace()
        .arg("trace")
        .arg("--config")
        .arg(temp.child("jtrace.toml").path())
        .write_stdin(TWO_PUBLIC_TYPES)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to parse toml config"));
}

#[test]
fn non_numeric_breakpoints_are_a_usage_error() {
    jtrace()
        .args(["trace", "-b", "ten"])
        .write_stdin(TWO_PUBLIC_TYPES)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
