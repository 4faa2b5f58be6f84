//! Integration test.  Runs the bgraph binary against a temp directory.

#![cfg(unix)]

fn bgraph_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join("bgraph")
}

/// Common arguments: concatenate src/*.txt into out.txt with sh.
fn concat_command(verb: &str, extra: &[&str]) -> std::process::Command {
    let mut cmd = std::process::Command::new(bgraph_binary());
    cmd.args(extra);
    cmd.args([
        "--src",
        "src",
        "--pattern",
        "*.txt",
        "--exe",
        "/bin/sh",
        "--out",
        "out.txt",
        verb,
        "--",
        "-c",
        "echo run >> runs.log; cat \"$@\" > \"$0\"",
        "${output}",
        "${input}",
    ]);
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", String::from_utf8_lossy(&out.stdout));
    print!("{}", String::from_utf8_lossy(&out.stderr));
}

fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = String::from_utf8_lossy(&out.stdout);
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

/// Manages a temporary directory for invoking bgraph.
struct TestSpace {
    dir: tempfile::TempDir,
}
impl TestSpace {
    fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("src"))?;
        Ok(TestSpace { dir })
    }

    /// Write a file into the working space.
    fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(path), content)
    }

    /// Read a file from the working space.
    fn read(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.dir.path().join(path))
    }

    fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    /// Invoke bgraph, returning process output.
    fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but fail if the command failed.
    fn run_expect(&self, cmd: &mut std::process::Command) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("bgraph failed, status {}", out.status);
        }
        Ok(out)
    }
}

#[test]
fn build_and_clean() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("src/a.txt", "hello ")?;
    space.write("src/b.txt", "world")?;
    space.write("src/skip.log", "nope")?;

    let out = space.run_expect(&mut concat_command("build", &[]))?;
    assert_eq!(space.read("out.txt")?, "hello world");
    assert_output_contains(&out, "build built in");

    let out = space.run_expect(&mut concat_command("clean", &[]))?;
    assert!(!space.exists("out.txt"));
    assert_output_contains(&out, "clean built in");
    Ok(())
}

#[test]
fn cache_across_runs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("src/a.txt", "cached")?;
    let cache = ["--cache", "cache"];

    space.run_expect(&mut concat_command("build", &cache))?;
    space.run_expect(&mut concat_command("clean", &cache))?;
    space.run_expect(&mut concat_command("build", &cache))?;
    assert_eq!(space.read("out.txt")?, "cached");
    assert_eq!(space.read("runs.log")?.lines().count(), 1);

    space.run_expect(&mut concat_command("build", &["--rebuild", "--cache", "cache"]))?;
    assert_eq!(space.read("runs.log")?.lines().count(), 2);
    Ok(())
}

#[test]
fn dry_run() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("src/a.txt", "x")?;
    let out = space.run_expect(&mut concat_command("build", &["--dry-run"]))?;
    assert_output_contains(&out, "would run: /bin/sh -c");
    assert!(!space.exists("out.txt"));
    Ok(())
}

#[test]
fn failures_exit_nonzero() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    // No inputs match.
    let out = space.run(&mut concat_command("build", &[]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "no input files");

    let out = space.run(&mut concat_command("frobnicate", &[]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "unknown verb");
    Ok(())
}

#[test]
fn trace_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("src/a.txt", "x")?;
    space.run_expect(&mut concat_command("build", &["--trace", "-j", "2"]))?;
    let trace = space.read("trace.json")?;
    assert!(trace.contains("\"cat\": \"build\""));
    assert!(trace.trim_end().ends_with(']'));
    Ok(())
}
