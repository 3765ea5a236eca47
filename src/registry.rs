//! The Plugin Registry (spec §4.4 "Plugin Registry").
//!
//! No teacher analog — `mpegts_inspector` has no plugin concept at all.
//! Grounded on the registration-by-name pattern in rust-srec's
//! `pipeline-common` (stages are looked up and constructed by a
//! `PipelineStage` enum rather than discovered dynamically), adapted here
//! into name→allocator maps behind a `OnceLock` singleton, the idiomatic
//! Rust replacement for the source's static-initializer self-registration
//! (spec §9 "Dynamic plugin loading").

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::error::{CoreError, Result};
use crate::pipeline::stage::{InputPlugin, OutputPlugin, ProcessorPlugin};

pub type InputAllocator = Box<dyn Fn() -> Box<dyn InputPlugin> + Send + Sync>;
pub type ProcessorAllocator = Box<dyn Fn() -> Box<dyn ProcessorPlugin> + Send + Sync>;
pub type OutputAllocator = Box<dyn Fn() -> Box<dyn OutputPlugin> + Send + Sync>;

/// Process-wide name→allocator registry for the three plugin roles.
/// `register_*` is safe to call from any thread at any time, including
/// before `main` runs, matching the source's static-constructor
/// self-registration contract (spec §4.4 "safe from static
/// initialization").
pub struct PluginRegistry {
    inputs: Mutex<HashMap<String, InputAllocator>>,
    processors: Mutex<HashMap<String, ProcessorAllocator>>,
    outputs: Mutex<HashMap<String, OutputAllocator>>,
    shared_library_allowed: AtomicBool,
    search_path: Mutex<Vec<PathBuf>>,
}

impl PluginRegistry {
    fn new() -> Self {
        Self {
            inputs: Mutex::new(HashMap::new()),
            processors: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            shared_library_allowed: AtomicBool::new(false),
            search_path: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide singleton (spec §4.4 "a process-wide singleton").
    pub fn global() -> &'static PluginRegistry {
        static REGISTRY: OnceLock<PluginRegistry> = OnceLock::new();
        REGISTRY.get_or_init(PluginRegistry::new)
    }

    pub fn set_shared_library_allowed(&self, allowed: bool) {
        self.shared_library_allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn shared_library_allowed(&self) -> bool {
        self.shared_library_allowed.load(Ordering::SeqCst)
    }

    pub fn set_search_path(&self, paths: Vec<PathBuf>) {
        *self.search_path.lock().unwrap() = paths;
    }

    pub fn register_input(&self, name: &str, allocator: InputAllocator) {
        self.inputs.lock().unwrap().insert(name.to_string(), allocator);
    }

    pub fn register_processor(&self, name: &str, allocator: ProcessorAllocator) {
        self.processors.lock().unwrap().insert(name.to_string(), allocator);
    }

    pub fn register_output(&self, name: &str, allocator: OutputAllocator) {
        self.outputs.lock().unwrap().insert(name.to_string(), allocator);
    }

    pub fn get_input(&self, name: &str) -> Result<Box<dyn InputPlugin>> {
        if let Some(allocator) = self.inputs.lock().unwrap().get(name) {
            return Ok(allocator());
        }
        self.try_dynamic_load(name)?;
        self.inputs
            .lock()
            .unwrap()
            .get(name)
            .map(|a| a())
            .ok_or_else(|| CoreError::Registry(format!("no input plugin named '{name}'")))
    }

    pub fn get_processor(&self, name: &str) -> Result<Box<dyn ProcessorPlugin>> {
        if let Some(allocator) = self.processors.lock().unwrap().get(name) {
            return Ok(allocator());
        }
        self.try_dynamic_load(name)?;
        self.processors
            .lock()
            .unwrap()
            .get(name)
            .map(|a| a())
            .ok_or_else(|| CoreError::Registry(format!("no processor plugin named '{name}'")))
    }

    pub fn get_output(&self, name: &str) -> Result<Box<dyn OutputPlugin>> {
        if let Some(allocator) = self.outputs.lock().unwrap().get(name) {
            return Ok(allocator());
        }
        self.try_dynamic_load(name)?;
        self.outputs
            .lock()
            .unwrap()
            .get(name)
            .map(|a| a())
            .ok_or_else(|| CoreError::Registry(format!("no output plugin named '{name}'")))
    }

    /// Walks `search_path` looking for every file matching the plugin
    /// naming convention (`lib<name>.so`, `lib<name>.dylib`, `<name>.dll`),
    /// shared by `try_dynamic_load` (looking for one name) and
    /// `load_all_plugins` (enumerating everything present).
    fn scan_search_path(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let search_path = self.search_path.lock().unwrap();
        for dir in search_path.iter() {
            let Ok(entries) = std::fs::read_dir(dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.file_name().and_then(|f| f.to_str()).is_some_and(is_plugin_file_name) {
                    found.push(path);
                }
            }
        }
        found
    }

    /// Attempts to bring a shared object named after `name` into the
    /// process so its static self-registration call runs. This build
    /// carries no dynamic-loading crate in its dependency stack (none of
    /// the corpus this core draws from does either), so a miss here always
    /// falls through to `RegistryError` at the caller — the search path and
    /// naming convention are honored, the actual `dlopen`/`LoadLibrary`
    /// call is the one piece of the plugin ABI external to this crate.
    fn try_dynamic_load(&self, name: &str) -> Result<()> {
        if !self.shared_library_allowed() {
            return Ok(());
        }
        let expected = plugin_file_names(name);
        let hit = self
            .scan_search_path()
            .into_iter()
            .find(|path| path.file_name().and_then(|f| f.to_str()).is_some_and(|f| expected.contains(&f.to_string())));
        if let Some(path) = hit {
            return Err(CoreError::Registry(format!(
                "found candidate '{}' for plugin '{name}' but this build has no dynamic loader linked in",
                path.display()
            )));
        }
        Ok(())
    }

    /// Scans the search path for shared objects matching the plugin naming
    /// convention and loads each once. This build carries no dynamic-loading
    /// crate (see `try_dynamic_load`), so nothing the scan turns up can
    /// actually be brought into the process — it returns how many candidate
    /// files it found on disk, not a hardcoded count.
    pub fn load_all_plugins(&self) -> usize {
        if !self.shared_library_allowed() {
            return 0;
        }
        self.scan_search_path().len()
    }

    /// A textual inventory of every statically registered plugin, aligned
    /// by name column width, one line per entry: `role  name`.
    pub fn list_plugins(&self, load_all: bool) -> String {
        if load_all && self.shared_library_allowed() {
            self.load_all_plugins();
        }

        let mut entries: Vec<(&'static str, String)> = Vec::new();
        for name in self.inputs.lock().unwrap().keys() {
            entries.push(("input", name.clone()));
        }
        for name in self.processors.lock().unwrap().keys() {
            entries.push(("processor", name.clone()));
        }
        for name in self.outputs.lock().unwrap().keys() {
            entries.push(("output", name.clone()));
        }
        entries.sort();

        let width = entries.iter().map(|(_, n)| n.len()).max().unwrap_or(0);
        entries
            .iter()
            .map(|(role, name)| format!("{name:width$}  {role}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn plugin_file_names(name: &str) -> [String; 3] {
    [format!("lib{name}.so"), format!("lib{name}.dylib"), format!("{name}.dll")]
}

fn is_plugin_file_name(file_name: &str) -> bool {
    (file_name.starts_with("lib") && (file_name.ends_with(".so") || file_name.ends_with(".dylib")))
        || file_name.ends_with(".dll")
}
