use std::collections::HashMap;

use tessel_device::Module;

use crate::handle::KernelHandle;

/// Lifecycle of a program. Compilation is one-shot and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramState {
    Uncompiled,
    Compiling,
    Compiled,
    CompileFailed,
}

/// A compiled unit and the kernels resolved from it so far.
#[derive(Debug)]
pub struct Program {
    state: ProgramState,
    module: Option<Module>,
    diagnostic: Option<String>,
    kernels: HashMap<String, KernelHandle>,
}

impl Program {
    pub(crate) fn new() -> Self {
        Self {
            state: ProgramState::Uncompiled,
            module: None,
            diagnostic: None,
            kernels: HashMap::new(),
        }
    }

    pub(crate) fn begin(&mut self) {
        debug_assert_eq!(self.state, ProgramState::Uncompiled);
        self.state = ProgramState::Compiling;
    }

    pub(crate) fn succeed(&mut self, module: Module) {
        debug_assert_eq!(self.state, ProgramState::Compiling);
        self.module = Some(module);
        self.state = ProgramState::Compiled;
    }

    pub(crate) fn fail(&mut self, diagnostic: String) {
        debug_assert_eq!(self.state, ProgramState::Compiling);
        self.diagnostic = Some(diagnostic);
        self.state = ProgramState::CompileFailed;
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    pub fn is_compiled(&self) -> bool {
        self.state == ProgramState::Compiled
    }

    /// Compiler output of a failed build.
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// The built module; present only once compiled.
    pub fn module(&self) -> Option<&Module> {
        self.module.as_ref()
    }

    /// Names of the entry points the module exports.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.module.iter().flat_map(|module| module.entries().iter().map(|entry| entry.name.as_str()))
    }

    pub(crate) fn cached_kernel(&self, name: &str) -> Option<KernelHandle> {
        self.kernels.get(name).copied()
    }

    pub(crate) fn cache_kernel(&mut self, name: &str, kernel: KernelHandle) {
        self.kernels.insert(name.to_string(), kernel);
    }

    pub(crate) fn kernels(&self) -> impl Iterator<Item = KernelHandle> + '_ {
        self.kernels.values().copied()
    }
}
