//! The `bgraph` command line: one directory listing feeding one command.

use crate::cache::BuildCache;
use crate::command::CommandNode;
use crate::directory::DirectoryListNode;
use crate::env::BuildEnvironment;
use crate::executor::BuildExecutor;
use crate::graph::BuildGraph;
use crate::log::ConsoleLog;
use crate::result::{BuildFlags, BuildResult};
use crate::trace;
use anyhow::{anyhow, bail};
use argh::FromArgs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

#[derive(FromArgs)]
/// Run a command over the files of a directory, incrementally.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    dir: Option<String>,

    /// parallelism [default from system]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// directory of the output cache
    #[argh(option)]
    cache: Option<String>,

    /// only read from the cache, never write to it
    #[argh(switch)]
    read_only_cache: bool,

    /// rerun the command even if nothing changed
    #[argh(switch)]
    rebuild: bool,

    /// print what would run without running it
    #[argh(switch)]
    dry_run: bool,

    /// keep going after a failure
    #[argh(switch, short = 'k')]
    keep_going: bool,

    /// print executed command lines and per-node results
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// write a chrome trace to trace.json
    #[argh(switch)]
    trace: bool,

    /// directory holding the input files
    #[argh(option)]
    src: String,

    /// wildcard filter on input file names, e.g. *.c
    #[argh(option)]
    pattern: Option<String>,

    /// list input files in subdirectories too
    #[argh(switch)]
    recursive: bool,

    /// the executable to run
    #[argh(option)]
    exe: String,

    /// the file the command produces
    #[argh(option)]
    out: String,

    /// one of scan, build, clean
    #[argh(positional)]
    verb: String,

    /// command parameters; ${input} and ${output} are expanded
    #[argh(positional)]
    params: Vec<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Verb {
    Scan,
    Build,
    Clean,
}

impl std::str::FromStr for Verb {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "scan" => Verb::Scan,
            "build" => Verb::Build,
            "clean" => Verb::Clean,
            _ => bail!("unknown verb {:?}, expected scan, build or clean", s),
        })
    }
}

impl Args {
    fn flags(&self) -> BuildFlags {
        let mut flags = BuildFlags::default();
        if self.rebuild {
            flags |= BuildFlags::REBUILD;
        }
        if self.dry_run {
            flags |= BuildFlags::DRY_RUN;
        }
        if !self.keep_going {
            flags |= BuildFlags::STOP_ON_ERROR;
        }
        if self.verbose {
            flags |= BuildFlags::VERBOSE;
        }
        if self.read_only_cache {
            flags = flags.without(BuildFlags::CACHE_WRITE);
        }
        flags
    }

    fn environment(&self) -> anyhow::Result<BuildEnvironment> {
        let executor = match self.jobs {
            Some(n) => {
                let n = NonZeroUsize::new(n).ok_or_else(|| anyhow!("invalid -j 0"))?;
                BuildExecutor::new(n)
            }
            None => BuildExecutor::with_default_parallelism(),
        };
        let mut env = BuildEnvironment::new(".")
            .with_executor(Arc::new(executor))
            .with_log(Arc::new(ConsoleLog::new(self.verbose)));
        if let Some(dir) = &self.cache {
            let cache = BuildCache::open(dir, !self.read_only_cache)?;
            env = env.with_cache(Arc::new(cache));
        }
        Ok(env)
    }
}

fn run_impl(args: Args) -> anyhow::Result<i32> {
    let verb: Verb = args.verb.parse()?;

    if let Some(dir) = &args.dir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }
    if args.trace {
        trace::open("trace.json")?;
    }

    let env = Arc::new(args.environment()?);
    let flags = args.flags();

    let mut graph = BuildGraph::new();
    let listing = graph.insert_node(DirectoryListNode::new(
        &args.src,
        args.pattern.as_deref(),
        args.recursive,
    ));
    graph.add_node(CommandNode::new(
        &args.out,
        listing,
        &args.exe,
        ".",
        args.params.clone(),
    ));

    let mut result = graph.scan_all(&env, flags);
    if !result.is_failed() {
        result = match verb {
            Verb::Scan => result,
            Verb::Build => graph.build_all(&env, flags),
            Verb::Clean => graph.clean_all(&env, flags),
        };
    }
    if let Some(cache) = env.cache() {
        if verb == Verb::Clean {
            trace::scope("cache.cleanup", || cache.cleanup());
        }
    }

    Ok(match result {
        BuildResult::Failed => 1,
        _ => 0,
    })
}

pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    let res = run_impl(args);
    trace::close()?;
    res
}
