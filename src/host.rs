//! Host capabilities.
//!
//! The engine never touches a terminal, a canvas or a timer directly. Text output, drawing
//! and the decision of when a suspended machine continues are injected as trait objects, so
//! the same VM can back a terminal REPL, a browser canvas or a test transcript.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

/// Receives text written by `display`, the echo of top-level forms and error reports
pub trait DisplaySink {
    fn write(&mut self, text: &str);

    /// Erase everything written so far
    fn clear(&mut self);
}

/// Minimal drawing surface used by `gcolor`, `gbox` and `gclear`
pub trait GraphicsSink {
    fn set_fill_color(&mut self, r: u8, g: u8, b: u8, a: u8);
    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64);
    fn clear_graphics(&mut self);
}

/// Decides when a suspended machine continues.
///
/// Both hooks default to doing nothing, which leaves resumption entirely to whoever
/// owns the [`Vm`](crate::Vm).
pub trait Scheduler {
    /// `yield` suspended the machine; call [`Vm::resume`](crate::Vm::resume) at the next
    /// opportunity (an animation frame, a timer tick).
    fn schedule_resume(&mut self) {}

    /// `sync` suspended the machine; call [`Vm::resume_sync`](crate::Vm::resume_sync) with
    /// `token` once the host side has caught up.
    fn await_sync(&mut self, token: SyncToken) {
        let _ = token;
    }
}

/// Identifies one `sync` suspension.
/// A resumption carrying a stale token is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncToken(pub u64);

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync#{}", self.0)
    }
}

/// The set of capabilities a VM runs against
pub struct Host {
    pub display: Box<dyn DisplaySink>,
    pub graphics: Box<dyn GraphicsSink>,
    pub scheduler: Box<dyn Scheduler>,
}

impl Host {
    pub fn new(
        display: impl DisplaySink + 'static,
        graphics: impl GraphicsSink + 'static,
        scheduler: impl Scheduler + 'static,
    ) -> Self {
        Host {
            display: Box::new(display),
            graphics: Box::new(graphics),
            scheduler: Box::new(scheduler),
        }
    }

    /// Text goes to standard output; drawing and scheduling requests are dropped
    pub fn stdout() -> Self {
        Host::new(StdoutDisplay, NoGraphics, ManualScheduler)
    }

    /// Every capability records into `transcript`
    pub fn recording(transcript: &Transcript) -> Self {
        Host::new(transcript.clone(), transcript.clone(), transcript.clone())
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

/// Writes to the process's standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutDisplay;

impl DisplaySink for StdoutDisplay {
    fn write(&mut self, text: &str) {
        let mut out = std::io::stdout().lock();
        // Output is best effort: a closed pipe must not abort evaluation
        let _ = out.write_all(text.as_bytes()).and_then(|()| out.flush());
    }

    fn clear(&mut self) {
        self.write("\x1b[2J\x1b[H");
    }
}

/// Graphics sink that ignores every request
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGraphics;

impl GraphicsSink for NoGraphics {
    fn set_fill_color(&mut self, _r: u8, _g: u8, _b: u8, _a: u8) {}
    fn fill_rect(&mut self, _x: f64, _y: f64, _w: f64, _h: f64) {}
    fn clear_graphics(&mut self) {}
}

/// Scheduler that leaves every resumption to the caller
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualScheduler;

impl Scheduler for ManualScheduler {}

/// A drawing request as recorded by a [`Transcript`]
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    FillColor { r: u8, g: u8, b: u8, a: u8 },
    FillRect { x: f64, y: f64, w: f64, h: f64 },
    Clear,
}

#[derive(Debug, Default)]
struct TranscriptLog {
    output: String,
    clears: usize,
    draw: Vec<DrawCommand>,
    resume_requests: usize,
    sync_requests: Vec<SyncToken>,
}

/// In-memory host that records everything the machine asks of it.
///
/// Clones share the same log, so one clone can be handed to [`Host::recording`] while
/// another is kept for inspection.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    log: Rc<RefCell<TranscriptLog>>,
}

impl Transcript {
    /// Text written since the last clear
    pub fn output(&self) -> String {
        self.log.borrow().output.clone()
    }

    /// Text written since the last clear or take, leaving the buffer empty
    pub fn take_output(&self) -> String {
        std::mem::take(&mut self.log.borrow_mut().output)
    }

    /// Number of times the display was cleared
    pub fn clears(&self) -> usize {
        self.log.borrow().clears
    }

    pub fn draw_commands(&self) -> Vec<DrawCommand> {
        self.log.borrow().draw.clone()
    }

    /// How often a `yield` asked for a resumption
    pub fn resume_requests(&self) -> usize {
        self.log.borrow().resume_requests
    }

    /// Tokens of every `sync` suspension, oldest first
    pub fn sync_requests(&self) -> Vec<SyncToken> {
        self.log.borrow().sync_requests.clone()
    }
}

impl DisplaySink for Transcript {
    fn write(&mut self, text: &str) {
        self.log.borrow_mut().output.push_str(text);
    }

    fn clear(&mut self) {
        let mut log = self.log.borrow_mut();
        log.output.clear();
        log.clears += 1;
    }
}

impl GraphicsSink for Transcript {
    fn set_fill_color(&mut self, r: u8, g: u8, b: u8, a: u8) {
        self.log
            .borrow_mut()
            .draw
            .push(DrawCommand::FillColor { r, g, b, a });
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        self.log
            .borrow_mut()
            .draw
            .push(DrawCommand::FillRect { x, y, w, h });
    }

    fn clear_graphics(&mut self) {
        self.log.borrow_mut().draw.push(DrawCommand::Clear);
    }
}

impl Scheduler for Transcript {
    fn schedule_resume(&mut self) {
        self.log.borrow_mut().resume_requests += 1;
    }

    fn await_sync(&mut self, token: SyncToken) {
        self.log.borrow_mut().sync_requests.push(token);
    }
}
