//! `tsforge`: the CLI surface over the Pipeline Controller (spec §6
//! "Controller surface (consumed by CLI)").
//!
//! Grounded on the teacher's `bin/cli.rs` for the clap-derive +
//! tracing-subscriber + `anyhow::Result` boundary shape; the UDP-specific
//! options are gone, replaced by the stage-name plugin wiring the registry
//! now drives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tsforge_core::packet::Packet;
use tsforge_core::pipeline::{ExitStatus, ProcessorPlugin, Role, StageHandle, StageSpec, Verdict};
use tsforge_core::registry::PluginRegistry;
use tsforge_core::report::TracingReport;
use tsforge_core::Pipeline;

/// Runs one MPEG-2 Transport Stream pipeline: an Input plugin, zero or more
/// Processor plugins in order, and an Output plugin, all looked up by name
/// in the plugin registry.
#[derive(Parser)]
#[command(name = "tsforge", version, about)]
struct Cli {
    /// Input plugin name.
    #[arg(short = 'I', long = "input")]
    input: String,

    /// Processor plugin name, in pipeline order. Repeatable.
    #[arg(short = 'P', long = "processor")]
    processors: Vec<String>,

    /// Output plugin name.
    #[arg(short = 'O', long = "output")]
    output: String,

    /// Ring capacity, in packets.
    #[arg(long, default_value_t = 2048)]
    buffer: usize,

    /// Directories to search for dynamically loadable plugins.
    #[arg(long = "plugin-path")]
    plugin_path: Vec<PathBuf>,

    /// Allow dynamic shared-object plugin loading when a name isn't
    /// statically registered.
    #[arg(long, default_value_t = false)]
    allow_dynamic_plugins: bool,

    /// Demote joint termination to individual termination for every stage.
    #[arg(long, default_value_t = false)]
    ignore_joint_termination: bool,

    /// Demote a broken-pipe failure from the Output plugin's `send` to a
    /// quiet per-stage stop instead of a fatal pipeline abort.
    #[arg(long, default_value_t = false)]
    ignore_aborts: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let registry = PluginRegistry::global();
    register_builtins(registry);
    registry.set_shared_library_allowed(cli.allow_dynamic_plugins);
    registry.set_search_path(cli.plugin_path.clone());

    let mut specs = Vec::with_capacity(cli.processors.len() + 2);
    specs.push(StageSpec::new(cli.input.clone(), Role::Input));
    for name in &cli.processors {
        specs.push(StageSpec::new(name.clone(), Role::Processor));
    }
    specs.push(StageSpec::new(cli.output.clone(), Role::Output));

    let report = Arc::new(TracingReport);
    let pipeline = Pipeline::build(&specs, cli.buffer, registry, report)
        .context("failed to build pipeline from the requested stages")?;
    pipeline.set_ignore_joint_termination(cli.ignore_joint_termination);
    pipeline.set_ignore_output_aborts(cli.ignore_aborts);

    match pipeline.run() {
        ExitStatus::CleanEof | ExitStatus::JointTerminated => Ok(()),
        ExitStatus::Aborted => bail!("pipeline aborted"),
        ExitStatus::Fatal => bail!("pipeline stopped on a fatal stage error"),
    }
}

/// Built-in processors that need no external I/O, so a pipeline shape can
/// be smoke-tested without a real plugin on disk.
fn register_builtins(registry: &PluginRegistry) {
    registry.register_processor("null", Box::new(|| Box::new(NullProcessor) as Box<dyn ProcessorPlugin>));
    registry.register_processor("drop", Box::new(|| Box::new(DropProcessor) as Box<dyn ProcessorPlugin>));
}

struct NullProcessor;
impl ProcessorPlugin for NullProcessor {
    fn process(&mut self, _handle: &StageHandle, _packet: &mut Packet) -> Verdict {
        Verdict::Ok
    }
}

struct DropProcessor;
impl ProcessorPlugin for DropProcessor {
    fn process(&mut self, _handle: &StageHandle, _packet: &mut Packet) -> Verdict {
        Verdict::Drop
    }
}
