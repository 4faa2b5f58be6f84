//! Nodes that produce a file by running an external command.

use crate::cache::Fingerprint;
use crate::canon::canon_path;
use crate::context::{BuildContext, CleanContext, ScanContext};
use crate::fs::FileSystem;
use crate::node::{flatten_files, BuildNode, DependencyKind, NodeCore, NodeId};
use crate::process::{run_command, Termination};
use crate::result::{BuildFlags, BuildResult};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Parameter token replaced by the resolved input files.
pub const INPUT_TOKEN: &str = "${input}";
/// Parameter token replaced by the output filename.
pub const OUTPUT_TOKEN: &str = "${output}";

/// Bumped whenever the fingerprint layout changes.
const FINGERPRINT_VERSION: &[u8] = b"bgraph-command-2";

/// Quote a command line token if it is empty or contains whitespace.
pub fn quote(token: &str) -> String {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        format!("\"{}\"", token.replace('"', "\\\""))
    } else {
        token.to_string()
    }
}

/// Expand a parameter template into the argument vector passed to the
/// executable.  `${input}` becomes one argument per input file.
pub fn expand_params(params: &[String], output: &Path, inputs: &[PathBuf]) -> Vec<String> {
    let mut args = Vec::with_capacity(params.len() + inputs.len());
    for param in params {
        match param.as_str() {
            INPUT_TOKEN => args.extend(inputs.iter().map(|p| p.display().to_string())),
            OUTPUT_TOKEN => args.push(output.display().to_string()),
            _ => args.push(param.clone()),
        }
    }
    args
}

/// The expanded parameter template as one printable line.
pub fn command_line(params: &[String], output: &Path, inputs: &[PathBuf]) -> String {
    expand_params(params, output, inputs)
        .iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Find the executable to run.  A bare name is looked up on PATH, then in
/// `working_dir`; anything with a directory part is taken relative to
/// `working_dir`.
pub fn resolve_executable(fs: &dyn FileSystem, exe: &Path, working_dir: &Path) -> Option<PathBuf> {
    if exe.is_absolute() {
        return Some(exe.to_path_buf());
    }
    if exe.components().count() > 1 {
        return Some(working_dir.join(exe));
    }
    let candidates = |dir: &Path| {
        let plain = dir.join(exe);
        let exe_suffixed = plain.with_extension(std::env::consts::EXE_EXTENSION);
        [plain, exe_suffixed]
    };
    if let Some(path) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path) {
            for candidate in candidates(&dir) {
                if fs.exists(&candidate) {
                    return Some(candidate);
                }
            }
        }
    }
    candidates(working_dir)
        .into_iter()
        .find(|candidate| fs.exists(candidate))
}

/// Runs `exe` in `working_dir` with a parameter template to produce one
/// output file from the files reachable through the `input` node.
pub struct CommandNode {
    core: NodeCore,
    name: String,
    output: PathBuf,
    /// The output made absolute against the environment's output directory,
    /// fixed by the first scan.
    resolved_output: OnceLock<PathBuf>,
    input: NodeId,
    exe: PathBuf,
    working_dir: PathBuf,
    params: Vec<String>,
    /// Executable found by the last scan.
    resolved_exe: Mutex<Option<PathBuf>>,
    /// Input files found by the last import.
    inputs: Mutex<Vec<PathBuf>>,
    /// Fingerprint of the last successful run.
    last_run: Mutex<Option<Fingerprint>>,
}

impl CommandNode {
    pub fn new(
        output: impl Into<PathBuf>,
        input: NodeId,
        exe: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        params: Vec<String>,
    ) -> Self {
        let output = output.into();
        let core = NodeCore::new();
        // Known up front, so a scan reaches the input before this node.
        core.add_dependency(DependencyKind::Static, input);
        CommandNode {
            core,
            name: output.display().to_string(),
            output,
            resolved_output: OnceLock::new(),
            input,
            exe: exe.into(),
            working_dir: working_dir.into(),
            params,
            resolved_exe: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
            last_run: Mutex::new(None),
        }
    }

    pub fn input(&self) -> NodeId {
        self.input
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The output file, resolved once the node has been scanned.
    pub fn output(&self) -> &Path {
        self.resolved_output.get().unwrap_or(&self.output)
    }

    /// Input files resolved by the last import.
    pub fn inputs(&self) -> Vec<PathBuf> {
        self.inputs.lock().unwrap().clone()
    }

    /// The command line the next run would use.
    pub fn command_line(&self) -> String {
        command_line(&self.params, self.output(), &self.inputs.lock().unwrap())
    }

    /// Hash of everything a run depends on: the platform, the executable's
    /// path and content, the working directory, the arguments and the input
    /// files' paths and content.
    fn fingerprint(
        &self,
        ctx: &BuildContext,
        exe: &Path,
        args: &[String],
        inputs: &[PathBuf],
    ) -> std::io::Result<Fingerprint> {
        let fs = ctx.fs();
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_VERSION);
        hasher.update([0u8]);
        hasher.update(ctx.env().platform().as_bytes());
        hasher.update([0u8]);
        hasher.update(exe.to_string_lossy().as_bytes());
        let tool = fs.read(exe)?;
        hasher.update((tool.len() as u64).to_le_bytes());
        hasher.update(&tool);
        hasher.update([0u8]);
        hasher.update(self.working_dir.to_string_lossy().as_bytes());
        for arg in args {
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        for input in inputs {
            let content = fs.read(input)?;
            hasher.update([1u8]);
            hasher.update(input.to_string_lossy().as_bytes());
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);
        }
        Ok(Fingerprint::from_digest(&hasher.finalize()))
    }

    /// Try to satisfy a run from the cache.
    fn restore(&self, ctx: &BuildContext, fingerprint: Fingerprint) -> Option<BuildResult> {
        let cache = ctx.env().cache()?;
        let bytes = cache.read_bytes(fingerprint)?;
        let output = self.output();
        if ctx.fs().read(output).ok().as_deref() == Some(&bytes[..]) {
            return Some(BuildResult::UpToDate);
        }
        match ctx.fs().write(output, &bytes) {
            Ok(()) => {
                ctx.log()
                    .debug(&format!("{}: restored from cache {}", self.name, fingerprint));
                Some(BuildResult::Built)
            }
            Err(err) => {
                ctx.log()
                    .debug(&format!("{}: cache restore failed: {}", self.name, err));
                None
            }
        }
    }
}

impl BuildNode for CommandNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn filename(&self) -> Option<&Path> {
        Some(self.output())
    }

    fn scan(&self, ctx: &ScanContext) -> BuildResult {
        let output = self
            .resolved_output
            .get_or_init(|| canon_path(ctx.env().output_dir().join(&self.output)));

        let Some(exe) = resolve_executable(ctx.fs(), &self.exe, &self.working_dir) else {
            ctx.log()
                .error(&format!("{}: executable not found: {}", self.name, self.exe.display()));
            return BuildResult::Failed;
        };
        let exe_node = ctx.get_or_create_file_node(&exe);
        *self.resolved_exe.lock().unwrap() = Some(exe);

        let changed = self.core.add_dependency(DependencyKind::Static, exe_node);

        if let Some(id) = ctx.node_id() {
            if let Err(other) = ctx.register_output(output, id) {
                ctx.log().error(&format!(
                    "{}: output also produced by {}",
                    output.display(),
                    ctx.node(other).name()
                ));
                return BuildResult::Failed;
            }
        }

        if changed {
            BuildResult::Built
        } else {
            BuildResult::UpToDate
        }
    }

    fn import(&self, ctx: &BuildContext) -> BuildResult {
        let mut leaves = Vec::new();
        flatten_files(ctx.arena(), self.input, &mut leaves);
        let own_output = canon_path(self.output());
        let mut ids = Vec::with_capacity(leaves.len());
        let mut paths = Vec::with_capacity(leaves.len());
        for id in leaves {
            let node = ctx.node(id);
            let Some(path) = node.filename() else {
                continue;
            };
            if ctx.node_id() == Some(id) || canon_path(path) == own_output {
                continue;
            }
            ids.push(id);
            paths.push(path.to_path_buf());
        }
        if ids.is_empty() {
            ctx.log().error(&format!("{}: no input files", self.name));
            return BuildResult::Failed;
        }
        self.core.set_dependencies(DependencyKind::Dynamic, ids);
        *self.inputs.lock().unwrap() = paths;
        // The fingerprint check in process decides whether anything changed.
        BuildResult::Built
    }

    fn process(&self, ctx: &BuildContext) -> BuildResult {
        let flags = ctx.flags();
        let output = self.output().to_path_buf();
        let inputs = self.inputs();
        let args = expand_params(&self.params, &output, &inputs);
        let Some(exe) = self.resolved_exe.lock().unwrap().clone() else {
            ctx.log().error(&format!("{}: not scanned", self.name));
            return BuildResult::Failed;
        };
        let line = command_line(&self.params, &output, &inputs);

        if flags.contains(BuildFlags::DRY_RUN) {
            ctx.log()
                .info(&format!("would run: {} {}", exe.display(), line));
            return BuildResult::Built;
        }

        let fingerprint = match self.fingerprint(ctx, &exe, &args, &inputs) {
            Ok(fp) => fp,
            Err(err) => {
                ctx.log().error(&format!("{}: fingerprint: {}", self.name, err));
                return BuildResult::Failed;
            }
        };
        let rebuild = flags.contains(BuildFlags::REBUILD);
        if !rebuild
            && *self.last_run.lock().unwrap() == Some(fingerprint)
            && ctx.fs().exists(&output)
        {
            return BuildResult::UpToDate;
        }
        if !rebuild && flags.contains(BuildFlags::CACHE_READ) {
            if let Some(result) = self.restore(ctx, fingerprint) {
                *self.last_run.lock().unwrap() = Some(fingerprint);
                return result;
            }
        }

        if flags.contains(BuildFlags::VERBOSE) {
            ctx.log().info(&format!("{} {}", exe.display(), line));
        }
        let (termination, captured) = match run_command(&exe, &args, &self.working_dir) {
            Ok(result) => result,
            Err(err) => {
                ctx.log().error(&format!("{}: {}", self.name, err));
                return BuildResult::Failed;
            }
        };
        let captured = String::from_utf8_lossy(&captured);
        if termination != Termination::Success {
            ctx.log().error(&format!(
                "{}: command failed: {} {}\n{}",
                self.name,
                exe.display(),
                line,
                captured.trim_end()
            ));
            *self.last_run.lock().unwrap() = None;
            return BuildResult::Failed;
        }
        if !captured.trim().is_empty() {
            ctx.log().info(captured.trim_end());
        }

        *self.last_run.lock().unwrap() = Some(fingerprint);
        if flags.contains(BuildFlags::CACHE_WRITE) {
            if let (Some(cache), Ok(bytes)) = (ctx.env().cache(), ctx.fs().read(&output)) {
                if !cache.write(fingerprint, &bytes) {
                    ctx.log().debug(&format!("{}: not cached", self.name));
                }
            }
        }
        BuildResult::Built
    }

    fn clean(&self, ctx: &CleanContext) -> BuildResult {
        let output = self.output();
        *self.last_run.lock().unwrap() = None;
        if ctx.flags().contains(BuildFlags::DRY_RUN) {
            if !ctx.fs().exists(output) {
                return BuildResult::UpToDate;
            }
            ctx.log()
                .info(&format!("would remove: {}", output.display()));
            return BuildResult::Built;
        }
        match ctx.fs().remove(output) {
            Ok(true) => BuildResult::Built,
            Ok(false) => BuildResult::UpToDate,
            Err(err) => {
                ctx.log()
                    .error(&format!("remove {}: {}", output.display(), err));
                BuildResult::Failed
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFileSystem;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expansion() {
        let params = strings(&["-o", "${output}", "${input}"]);
        let inputs = vec![PathBuf::from("a.c"), PathBuf::from("b.c")];
        assert_eq!(
            command_line(&params, Path::new("out.bin"), &inputs),
            "-o out.bin a.c b.c"
        );
        assert_eq!(
            expand_params(&params, Path::new("out.bin"), &inputs),
            strings(&["-o", "out.bin", "a.c", "b.c"])
        );
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("has space"), "\"has space\"");
        let params = strings(&["", "${input}", "x y"]);
        let inputs = vec![PathBuf::from("my file.c"), PathBuf::from("b.c")];
        assert_eq!(
            command_line(&params, Path::new("o"), &inputs),
            "\"\" \"my file.c\" b.c \"x y\""
        );
        // Literals that merely contain a token are not expanded.
        let params = strings(&["--out=${output}"]);
        assert_eq!(command_line(&params, Path::new("o"), &[]), "--out=${output}");
    }

    #[test]
    fn executable_lookup() -> anyhow::Result<()> {
        let fs = RealFileSystem::new();
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("tool"), "")?;
        assert_eq!(
            resolve_executable(&fs, Path::new("/abs/tool"), dir.path()),
            Some(PathBuf::from("/abs/tool"))
        );
        assert_eq!(
            resolve_executable(&fs, Path::new("bin/tool"), dir.path()),
            Some(dir.path().join("bin/tool"))
        );
        assert_eq!(
            resolve_executable(&fs, Path::new("tool"), dir.path()),
            Some(dir.path().join("tool"))
        );
        assert_eq!(
            resolve_executable(&fs, Path::new("no-such-tool-anywhere"), dir.path()),
            None
        );
        Ok(())
    }
}
