//! # Schedule — Phases, System Identity, Per-System State
//!
//! Systems are plain functions over a [`Context`]. They are bucketed into
//! phases that always run in the same order:
//!
//! ```text
//! start()   PreStartup → Startup → PostStartup        (once, may be async)
//! tick()    First → PreUpdate → Update → PostUpdate → Last   (every frame)
//! stop()    Shutdown                                   (once)
//! ```
//!
//! Within a phase, systems run in the order they were added. There is no
//! parallelism: exactly one system body executes at a time.
//!
//! Every registered system owns a [`SystemState`]: its local resources and
//! its read offsets into every event channel. No other system ever sees it.
//!
//! A system is identified by the type of the function it was registered
//! with. Each `fn` item and each closure has its own type, so registering the
//! same function twice (from two plugins, say) is recognised as a duplicate.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use crate::context::Context;
use crate::error::Result;
use crate::event::EventCursors;
use crate::resource::Locals;

/// Boxed future returned by asynchronous startup systems.
///
/// ```ignore
/// fn load<'a>(ctx: &'a mut Context<'_>) -> BoxFuture<'a> {
///     Box::pin(async move {
///         let level = read_level().await?;
///         ctx.spawn((level,))?;
///         Ok::<(), EcsError>(())
///     })
/// }
/// ```
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a>>;

pub(crate) type SyncSystem = Rc<dyn for<'a, 'b> Fn(&'a mut Context<'b>) -> Result<()>>;
pub(crate) type AsyncSystem = Rc<dyn for<'a, 'b> Fn(&'a mut Context<'b>) -> BoxFuture<'a>>;

/// Execution phases in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum Phase {
    PreStartup,
    Startup,
    PostStartup,
    First,
    PreUpdate,
    Update,
    PostUpdate,
    Last,
    Shutdown,
}

impl Phase {
    pub const STARTUP: [Phase; 3] = [Phase::PreStartup, Phase::Startup, Phase::PostStartup];
    pub const TICK: [Phase; 5] = [
        Phase::First,
        Phase::PreUpdate,
        Phase::Update,
        Phase::PostUpdate,
        Phase::Last,
    ];
    pub const ALL: [Phase; 9] = [
        Phase::PreStartup,
        Phase::Startup,
        Phase::PostStartup,
        Phase::First,
        Phase::PreUpdate,
        Phase::Update,
        Phase::PostUpdate,
        Phase::Last,
        Phase::Shutdown,
    ];

    pub fn is_startup(self) -> bool {
        matches!(self, Phase::PreStartup | Phase::Startup | Phase::PostStartup)
    }

    pub fn is_tick(self) -> bool {
        Phase::TICK.contains(&self)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Identity of a system function.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(TypeId);

impl SystemId {
    /// The id of the function `system` (by its type).
    pub fn of<F: 'static>(_system: &F) -> Self {
        Self(TypeId::of::<F>())
    }
}

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemId({:?})", self.0)
    }
}

#[derive(Clone)]
pub(crate) enum SystemFn {
    Sync(SyncSystem),
    Async(AsyncSystem),
}

/// A system as declared on the builder, before it gets any state.
#[derive(Clone)]
pub(crate) struct SystemDecl {
    pub id: SystemId,
    pub name: String,
    pub run: SystemFn,
}

impl SystemDecl {
    pub fn sync<F>(system: F) -> Self
    where
        F: for<'a, 'b> Fn(&'a mut Context<'b>) -> Result<()> + 'static,
    {
        Self {
            id: SystemId::of(&system),
            name: short_system_name(std::any::type_name::<F>()),
            run: SystemFn::Sync(Rc::new(system)),
        }
    }

    pub fn future<F>(system: F) -> Self
    where
        F: for<'a, 'b> Fn(&'a mut Context<'b>) -> BoxFuture<'a> + 'static,
    {
        Self {
            id: SystemId::of(&system),
            name: short_system_name(std::any::type_name::<F>()),
            run: SystemFn::Async(Rc::new(system)),
        }
    }
}

/// State exclusively owned by one system.
#[derive(Default)]
pub struct SystemState {
    pub(crate) locals: Locals,
    pub(crate) cursors: EventCursors,
}

impl SystemState {
    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    pub fn cursors(&self) -> &EventCursors {
        &self.cursors
    }
}

pub(crate) struct SystemEntry {
    pub id: SystemId,
    pub name: String,
    pub run: SystemFn,
    pub state: SystemState,
}

/// Per-system timing recorded during one tick.
#[cfg(feature = "diagnostics")]
#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemTiming {
    pub name: String,
    pub phase: Phase,
    pub duration_us: f64,
}

/// Every system of a built runtime, bucketed by phase.
pub(crate) struct Schedule {
    phases: [Vec<SystemEntry>; 9],
}

impl Schedule {
    pub fn new(decls: &[(Phase, SystemDecl)]) -> Self {
        let mut phases: [Vec<SystemEntry>; 9] = Default::default();
        for (phase, decl) in decls {
            phases[phase.index()].push(SystemEntry {
                id: decl.id,
                name: decl.name.clone(),
                run: decl.run.clone(),
                state: SystemState::default(),
            });
        }
        Self { phases }
    }

    pub fn phase_mut(&mut self, phase: Phase) -> &mut [SystemEntry] {
        &mut self.phases[phase.index()]
    }

    pub fn phase(&self, phase: Phase) -> &[SystemEntry] {
        &self.phases[phase.index()]
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut SystemEntry> {
        self.phases.iter_mut().flatten()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SystemEntry> {
        self.phases.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }

    pub fn ids(&self) -> HashMap<SystemId, String> {
        self.entries().map(|e| (e.id, e.name.clone())).collect()
    }
}

/// Scheduler state a system may read or request changes to.
pub(crate) struct Control {
    known: HashMap<SystemId, String>,
    disabled: HashSet<SystemId>,
    pub cycle: u64,
    pub elapsed: Duration,
    pub pause_requested: bool,
    pub stop_requested: bool,
}

impl Control {
    pub fn new(known: HashMap<SystemId, String>) -> Self {
        Self {
            known,
            disabled: HashSet::new(),
            cycle: 0,
            elapsed: Duration::ZERO,
            pause_requested: false,
            stop_requested: false,
        }
    }

    pub fn is_known(&self, id: SystemId) -> bool {
        self.known.contains_key(&id)
    }

    pub fn is_enabled(&self, id: SystemId) -> bool {
        !self.disabled.contains(&id)
    }

    /// Returns false if no system has this id.
    pub fn set_enabled(&mut self, id: SystemId, enabled: bool) -> bool {
        let Some(name) = self.known.get(&id) else {
            log::warn!("ignoring enable/disable of unregistered system {id:?}");
            return false;
        };
        log::trace!("{} {name}", if enabled { "enable" } else { "disable" });
        if enabled {
            self.disabled.remove(&id);
        } else {
            self.disabled.insert(id);
        }
        true
    }

    pub fn toggle(&mut self, id: SystemId) -> bool {
        let enabled = self.is_enabled(id);
        self.set_enabled(id, !enabled)
    }
}

/// Strip the module path from a fully-qualified type name, keeping only the
/// last meaningful segment (e.g. `game::movement` → `movement`,
/// `{{closure}}` → `<closure>`).
pub(crate) fn short_system_name(full: &str) -> String {
    let name = full.rsplit("::").next().unwrap_or(full);
    if name.contains("closure") {
        "<closure>".to_string()
    } else {
        name.to_string()
    }
}
