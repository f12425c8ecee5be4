//! Trampolined virtual machine.
//!
//! [`Machine`] holds the registers compiled code works on: the value stack, the global
//! frame, the host capabilities and the random source. [`Vm`] owns a machine and drives
//! it: it repeatedly runs the current [`Thunk`], which returns the next one, until the
//! program halts, fails, suspends, is paused, or uses up its step budget for the slice.
//!
//! ```text
//!            submit
//!   Idle ──────────────► running ──► Halted(value) | Errored(value)
//!                          ▲   │
//!          resume /        │   ├──► Suspended          (yield)
//!          resume_sync     │   ├──► AwaitingSync(tok)  (sync)
//!                          │   ├──► Paused             (break flag)
//!                          └───┴──► Exhausted          (step budget)
//! ```
//!
//! The VM is single threaded. Only the break flag may be flipped from elsewhere; it is
//! checked between steps, never in the middle of a primitive.

use crate::ast::{Number, Primitive, Value};
use crate::builtinops::Arity;
use crate::compiler::{Code, Step, Thunk, compile_program};
use crate::environment::{Env, create_global_env};
use crate::host::{Host, SyncToken};
use crate::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::{DEFAULT_STEP_BUDGET, Error, MAX_PARSE_DEPTH, parser};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Why the running program asked to stop
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SuspendKind {
    Yield,
    Sync,
}

struct Parked {
    kind: SuspendKind,
    next: Step,
}

/// Registers shared by all compiled code of one VM
pub struct Machine {
    pub(crate) stack: Vec<Value>,
    pub(crate) globals: Env,
    pub(crate) host: Host,
    pub(crate) rng: StdRng,
    suspend: Option<SuspendKind>,
    parked: Option<Parked>,
    high_water: usize,
    /// Compiled top-level forms of the current submission
    program: Vec<Code>,
    generation: u64,
}

impl Machine {
    fn new(host: Host, rng_seed: Option<u64>) -> Self {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Machine {
            stack: Vec::new(),
            globals: create_global_env(),
            host,
            rng,
            suspend: None,
            parked: None,
            high_water: 0,
            program: Vec::new(),
            generation: 0,
        }
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
        self.high_water = self.high_water.max(self.stack.len());
    }

    pub(crate) fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::EvalError("Value stack underflow".into()))
    }

    /// Pop the top `n` values, oldest first
    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Error> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| Error::EvalError("Value stack underflow".into()))?;
        Ok(self.stack.split_off(at))
    }

    /// Ask the VM to stop once the current step has delivered its value
    pub(crate) fn request_suspend(&mut self, kind: SuspendKind) {
        self.suspend = Some(kind);
    }

    /// Park `next` if a suspension was requested, halting the trampoline
    pub(crate) fn park(&mut self, next: Step) -> Step {
        match self.suspend.take() {
            Some(kind) => {
                self.parked = Some(Parked { kind, next });
                None
            }
            None => next,
        }
    }

    /// Top-level form `index` of submission `generation`, if that submission is still loaded
    pub(crate) fn top_level_form(&self, generation: u64, index: usize) -> Option<Code> {
        if generation != self.generation {
            return None;
        }
        self.program.get(index).cloned()
    }

    /// Forget the previous run and reserve the generation of the next submission
    fn reset(&mut self) -> u64 {
        self.stack.clear();
        self.suspend = None;
        self.parked = None;
        self.high_water = 0;
        self.program.clear();
        self.generation += 1;
        self.generation
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        // Top-level closures capture the global frame that binds them
        self.globals.clear();
    }
}

/// Tunables of a [`Vm`]
#[derive(Debug, Clone, PartialEq)]
pub struct VmConfig {
    /// Steps run per slice before control returns to the host
    pub step_budget: usize,
    /// Write the value of every non-final top-level form
    pub echo_forms: bool,
    pub max_parse_depth: usize,
    /// Fixed seed for `rnd`; `None` seeds from the operating system
    pub rng_seed: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            step_budget: DEFAULT_STEP_BUDGET,
            echo_forms: true,
            max_parse_depth: MAX_PARSE_DEPTH,
            rng_seed: None,
        }
    }
}

impl VmConfig {
    pub fn with_step_budget(mut self, step_budget: usize) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn with_echo_forms(mut self, echo_forms: bool) -> Self {
        self.echo_forms = echo_forms;
        self
    }

    pub fn with_max_parse_depth(mut self, max_parse_depth: usize) -> Self {
        self.max_parse_depth = max_parse_depth;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

/// Where a VM stands between calls
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Nothing submitted yet
    Idle,
    /// The program finished with this value
    Halted(Value),
    /// Stopped at a `yield`; [`Vm::resume`] continues
    Suspended,
    /// Stopped at a `sync`; [`Vm::resume_sync`] with the matching token continues
    AwaitingSync(SyncToken),
    /// The break flag stopped the run between two steps
    Paused,
    /// The slice used its whole step budget; [`Vm::resume`] runs another slice
    Exhausted,
    /// A runtime or compile error ended the run; the value is a [`Value::Error`]
    Errored(Value),
}

/// Shared pause flag, safe to flip from another thread
#[derive(Debug, Clone, Default)]
pub struct BreakHandle(Arc<AtomicBool>);

impl BreakHandle {
    /// Flip the flag and return its new state
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One interpreter instance: a global environment plus the state of the current run
pub struct Vm {
    machine: Machine,
    config: VmConfig,
    current: Option<Thunk>,
    status: Status,
    break_flag: BreakHandle,
    next_sync: u64,
}

impl Vm {
    pub fn new(host: Host, config: VmConfig) -> Self {
        Vm {
            machine: Machine::new(host, config.rng_seed),
            config,
            current: None,
            status: Status::Idle,
            break_flag: BreakHandle::default(),
            next_sync: 0,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Deepest the value stack got during the current run
    pub fn stack_high_water(&self) -> usize {
        self.machine.high_water
    }

    /// Handle to the pause flag, for hosts that interrupt from elsewhere
    pub fn break_handle(&self) -> BreakHandle {
        self.break_flag.clone()
    }

    /// Read, compile and start running `source`, abandoning whatever ran before.
    ///
    /// Global definitions persist across submissions. Reader diagnostics are written to
    /// the display as `ERROR:` lines; the forms that could be read still run.
    #[tracing::instrument(level = "debug", skip_all, fields(bytes = source.len()))]
    pub fn submit(&mut self, source: &str) -> &Status {
        self.break_flag.clear();
        self.current = None;
        let generation = self.machine.reset();

        let reading = parser::read(source, self.config.max_parse_depth);
        for error in &reading.errors {
            warn!(%error, "lexical error");
            self.machine.host.display.write(&format!("ERROR: {error}\n"));
        }

        match compile_program(&reading.forms, self.config.echo_forms, generation) {
            Ok(program) => {
                debug!(forms = program.len(), generation, "compiled");
                self.current = program
                    .first()
                    .map(|entry| Thunk::new(entry, &self.machine.globals));
                self.machine.program = program;
                self.run_slice();
            }
            Err(e) => self.fail(e),
        }
        &self.status
    }

    /// Continue after a `yield`, an exhausted budget, or a pause whose flag was cleared.
    /// In any other state this does nothing.
    pub fn resume(&mut self) -> &Status {
        let runnable = match self.status {
            Status::Suspended | Status::Exhausted => true,
            Status::Paused => !self.break_flag.is_set(),
            _ => false,
        };
        if runnable {
            debug!(from = ?self.status, "resume");
            self.run_slice();
        }
        &self.status
    }

    /// Continue a VM parked at the `sync` identified by `token`; stale tokens are ignored
    pub fn resume_sync(&mut self, token: SyncToken) -> &Status {
        if self.status == Status::AwaitingSync(token) {
            debug!(%token, "sync released");
            self.run_slice();
        } else {
            debug!(%token, status = ?self.status, "ignoring sync release");
        }
        &self.status
    }

    /// Flip the pause flag. Clearing it while paused continues the run right away.
    pub fn toggle_break(&mut self) -> bool {
        let paused = self.break_flag.toggle();
        debug!(paused, "break toggled");
        if !paused && self.status == Status::Paused {
            self.run_slice();
        }
        paused
    }

    /// Publish the pointer position as the globals `mouseX` and `mouseY`, in whole pixels
    pub fn set_pointer(&mut self, x: f64, y: f64) {
        self.define_global("mouseX", Number::integral(x.floor()).into());
        self.define_global("mouseY", Number::integral(y.floor()).into());
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.machine.globals.define(name.into(), value);
    }

    pub fn lookup_global(&self, name: &str) -> Result<Value, Error> {
        self.machine.globals.lookup(name)
    }

    /// Every global binding, sorted by name
    pub fn globals(&self) -> Vec<(Rc<str>, Value)> {
        self.machine.globals.bindings()
    }

    /// Bind a typed Rust function as a global procedure.
    ///
    /// ```
    /// use cyberscheme::{Host, Status, Vm, VmConfig, Value};
    ///
    /// fn clamp_byte(n: i64) -> i64 {
    ///     n.clamp(0, 255)
    /// }
    ///
    /// let mut vm = Vm::new(Host::stdout(), VmConfig::default());
    /// vm.register_primitive::<(i64,), _>("clamp-byte", clamp_byte);
    /// assert_eq!(vm.submit("(clamp-byte 300)"), &Status::Halted(Value::Integer(255)));
    /// ```
    pub fn register_primitive<Args, F>(&mut self, name: &str, func: F)
    where
        F: IntoOperation<Args>,
    {
        self.bind_primitive(name, Arity::Any, func.into_operation());
    }

    /// Bind a Rust function whose last parameter takes the remaining arguments
    pub fn register_variadic_primitive<Args, F>(&mut self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args>,
    {
        self.bind_primitive(name, arity, func.into_variadic_operation());
    }

    fn bind_primitive(&mut self, name: &str, arity: Arity, func: Arc<OperationFn>) {
        let primitive = Primitive {
            name: name.into(),
            arity,
            func,
        };
        self.define_global(name, Value::Primitive(Rc::new(primitive)));
    }

    fn run_slice(&mut self) {
        let mut budget = self.config.step_budget;
        while let Some(thunk) = self.current.take() {
            if self.break_flag.is_set() {
                debug!("paused by break flag");
                self.current = Some(thunk);
                self.status = Status::Paused;
                return;
            }
            if budget == 0 {
                warn!(budget = self.config.step_budget, "step budget exhausted");
                self.current = Some(thunk);
                self.status = Status::Exhausted;
                self.machine.host.display.write(&format!(
                    "Step budget of {} exhausted; resume to continue\n",
                    self.config.step_budget
                ));
                return;
            }
            budget -= 1;
            match (thunk.code)(&mut self.machine, &thunk.env) {
                Ok(next) => self.current = next,
                Err(e) => return self.fail(e),
            }
        }
        self.finish();
    }

    /// The trampoline ran out of steps to take: either a suspension or the end of the program
    fn finish(&mut self) {
        if let Some(parked) = self.machine.parked.take() {
            self.current = parked.next;
            match parked.kind {
                SuspendKind::Yield => {
                    debug!("suspended at yield");
                    self.status = Status::Suspended;
                    self.machine.host.scheduler.schedule_resume();
                }
                SuspendKind::Sync => {
                    self.next_sync += 1;
                    let token = SyncToken(self.next_sync);
                    debug!(%token, "waiting at sync");
                    self.status = Status::AwaitingSync(token);
                    self.machine.host.scheduler.await_sync(token);
                }
            }
            return;
        }

        match self.machine.pop() {
            Ok(value) => {
                if !matches!(value, Value::Unspecified) {
                    self.machine.host.display.write(&value.to_string());
                }
                self.status = Status::Halted(value);
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: Error) {
        warn!(%error, "run failed");
        self.machine.host.display.write(&format!("ERROR: {error}\n"));
        self.current = None;
        self.machine.parked = None;
        self.machine.suspend = None;
        let value = Value::from(error);
        self.machine.push(value.clone());
        self.status = Status::Errored(value);
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("status", &self.status)
            .field("config", &self.config)
            .field("stack_depth", &self.machine.stack.len())
            .finish_non_exhaustive()
    }
}
