//! The compilation loop: a small-step machine driving pull programs.
//!
//! One machine drives one pull. Each step either advances the current pull
//! by one node or delivers a terminal to the top continuation frame; chunks
//! reaching the bottom of the frame stack surface as `StepEvent::Out` for
//! the driver to fold. The step loop is the trampoline: native stack usage
//! is constant regardless of program shape.

use std::sync::Arc;

use crate::algebra::{BindFn, Kont, MapFn, Pull, PullStep};
use crate::chunk::Chunk;
use crate::effect::Translation;
use crate::error::StreamError;
use crate::fusion;
use crate::ids::Token;
use crate::scope::Scope;
use crate::step::{ExitCase, Interruption, Terminal};
use crate::value::Value;
use crate::view;

/// A frame on the machine's continuation stack.
///
/// `Kont` frames are pending bind continuations; the rest reify the runner
/// nesting: output consumers (`FlatMap`, `Uncons`, `StepLeg`) and chunk
/// transformers (`MapOut`, `Translate`).
pub enum Frame {
    Kont(Kont),
    MapOut(MapFn),
    FlatMap(BindFn),
    Uncons,
    StepLeg { return_scope: Scope },
    Translate { prev: Translation, fk: Translation },
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Frame::Kont(_) => "Kont",
            Frame::MapOut(_) => "MapOut",
            Frame::FlatMap(_) => "FlatMap",
            Frame::Uncons => "Uncons",
            Frame::StepLeg { .. } => "StepLeg",
            Frame::Translate { .. } => "Translate",
        }
    }

    fn is_consumer(&self) -> bool {
        matches!(
            self,
            Frame::FlatMap(_) | Frame::Uncons | Frame::StepLeg { .. }
        )
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// What the machine is doing next.
#[derive(Debug)]
pub enum Mode {
    Advance(Pull),
    Deliver(Terminal),
}

/// Result of one machine step.
#[derive(Debug)]
pub enum StepEvent {
    Continue,
    /// A chunk reached the top level. The machine is already positioned on
    /// the tail; the driver folds the chunk and steps again (or injects a
    /// fold error).
    Out(Chunk),
    Done(Terminal),
}

impl StepEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, StepEvent::Done(_))
    }

    pub fn is_out(&self) -> bool {
        matches!(self, StepEvent::Out(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugLevel {
    Off,
    Steps,
    Trace,
}

#[derive(Debug, Clone)]
pub struct DebugConfig {
    pub level: DebugLevel,
    pub show_frames: bool,
    pub show_scopes: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        DebugConfig {
            level: DebugLevel::Off,
            show_frames: false,
            show_scopes: false,
        }
    }
}

impl DebugConfig {
    pub fn steps() -> Self {
        DebugConfig {
            level: DebugLevel::Steps,
            ..Default::default()
        }
    }

    pub fn trace() -> Self {
        DebugConfig {
            level: DebugLevel::Trace,
            show_frames: true,
            show_scopes: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.level != DebugLevel::Off
    }
}

/// One recorded machine step.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub step: u64,
    pub mode: String,
    pub frames: usize,
    pub event: String,
}

/// The interpreter state machine.
pub struct Machine {
    scope: Scope,
    extended: Option<Scope>,
    extend_last: bool,
    translation: Translation,
    frames: Vec<Frame>,
    mode: Mode,
    debug: DebugConfig,
    step_counter: u64,
    trace_enabled: bool,
    trace_events: Vec<TraceEvent>,
}

impl Machine {
    pub fn new(pull: Pull, scope: Scope, extend_last: bool) -> Self {
        Machine {
            scope,
            extended: None,
            extend_last,
            translation: Translation::identity(),
            frames: Vec::new(),
            mode: Mode::Advance(pull),
            debug: DebugConfig::default(),
            step_counter: 0,
            trace_enabled: false,
            trace_events: Vec::new(),
        }
    }

    pub fn with_debug(pull: Pull, scope: Scope, extend_last: bool, debug: DebugConfig) -> Self {
        Machine {
            debug,
            ..Self::new(pull, scope, extend_last)
        }
    }

    pub fn set_debug(&mut self, config: DebugConfig) {
        self.debug = config;
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace_enabled = enabled;
        self.trace_events.clear();
    }

    pub fn trace_events(&self) -> &[TraceEvent] {
        &self.trace_events
    }

    pub fn current_scope(&self) -> &Scope {
        &self.scope
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn mode_kind(&self) -> &'static str {
        match &self.mode {
            Mode::Advance(pull) => pull.kind(),
            Mode::Deliver(Terminal::Done(_)) => "Deliver:Done",
            Mode::Deliver(Terminal::Fail(_)) => "Deliver:Fail",
            Mode::Deliver(Terminal::Interrupted(_)) => "Deliver:Interrupted",
        }
    }

    fn event_kind(event: &StepEvent) -> &'static str {
        match event {
            StepEvent::Continue => "continue",
            StepEvent::Out(_) => "out",
            StepEvent::Done(_) => "done",
        }
    }

    /// Advance the machine by one step.
    pub fn step(&mut self) -> StepEvent {
        self.step_counter += 1;
        let mode_kind = self.mode_kind();
        if self.debug.is_enabled() {
            crate::engine_debug_log!(
                "step {}: mode={} frames={} scope={}",
                self.step_counter,
                mode_kind,
                self.frames.len(),
                self.scope.token().raw()
            );
        }

        let mode = std::mem::replace(&mut self.mode, Mode::Deliver(Terminal::unit()));
        let event = match mode {
            Mode::Advance(pull) => self.advance(pull),
            Mode::Deliver(terminal) => self.deliver(terminal),
        };

        if self.trace_enabled {
            self.trace_events.push(TraceEvent {
                step: self.step_counter,
                mode: mode_kind.to_string(),
                frames: self.frames.len(),
                event: Self::event_kind(&event).to_string(),
            });
        }
        event
    }

    /// Inject a driver-side error (a failing fold) into the tail so it is
    /// routed through user-visible error handling.
    pub fn inject(&mut self, err: StreamError) {
        self.mode = Mode::Deliver(Terminal::Fail(err));
    }

    fn interrupt_guard(&self) -> Option<Terminal> {
        self.scope.is_interrupted().map(|cause| cause.to_terminal())
    }

    // ---- advancing -------------------------------------------------------

    fn advance(&mut self, pull: Pull) -> StepEvent {
        if let Some(terminal) = pull.as_terminal() {
            self.mode = Mode::Deliver(terminal);
            return StepEvent::Continue;
        }
        match pull {
            Pull::Bind { step, cont } => {
                self.frames.push(Frame::Kont(cont));
                self.mode = Mode::Advance(*step);
                StepEvent::Continue
            }
            Pull::Output(chunk) => match self.interrupt_guard() {
                Some(terminal) => {
                    self.mode = Mode::Deliver(terminal);
                    StepEvent::Continue
                }
                None => self.emit(chunk),
            },
            Pull::Eval(thunk) => {
                let effect = self.translation.apply(thunk);
                let outcome = self.scope.interruptible_eval(&effect);
                self.mode = Mode::Deliver(outcome.to_terminal());
                StepEvent::Continue
            }
            Pull::Acquire {
                acquire,
                release,
                cancelable,
            } => {
                let effect = self.translation.apply(acquire);
                let outcome = self.scope.acquire_resource(&effect, release, cancelable);
                self.mode = Mode::Deliver(outcome.to_terminal());
                StepEvent::Continue
            }
            Pull::GetScope => {
                self.mode = Mode::Deliver(Terminal::Done(Value::Scope(self.scope.clone())));
                StepEvent::Continue
            }
            Pull::InScope {
                inner,
                interruptible,
            } => self.enter_scope(*inner, interruptible),
            Pull::CloseScope {
                token,
                interruption,
                exit,
            } => self.close_scope(token, interruption, exit),
            Pull::InterruptWhen { signal } => match self.interrupt_guard() {
                Some(terminal) => {
                    self.mode = Mode::Deliver(terminal);
                    StepEvent::Continue
                }
                None => {
                    let signal = self.translation.apply(signal);
                    self.mode = Mode::Deliver(match self.scope.interrupt_when(signal) {
                        Ok(()) => Terminal::unit(),
                        Err(err) => Terminal::Fail(err),
                    });
                    StepEvent::Continue
                }
            },
            Pull::Translate {
                inner,
                translation: fk,
            } => {
                self.frames.push(Frame::Translate {
                    prev: self.translation.clone(),
                    fk: fk.clone(),
                });
                self.translation = self.translation.compose(&fk);
                self.mode = Mode::Advance(*inner);
                StepEvent::Continue
            }
            Pull::MapOutput { inner, f } => self.enter_map_output(*inner, f),
            Pull::FlatMapOutput { inner, f } => {
                self.frames.push(Frame::FlatMap(f));
                self.mode = Mode::Advance(*inner);
                StepEvent::Continue
            }
            Pull::Uncons { inner } => {
                self.frames.push(Frame::Uncons);
                self.mode = Mode::Advance(*inner);
                StepEvent::Continue
            }
            Pull::StepLeg { inner, scope } => match self.scope.find_step_scope(scope) {
                None => {
                    self.mode = Mode::Deliver(Terminal::Fail(StreamError::scope_not_found(scope)));
                    StepEvent::Continue
                }
                Some(target) => {
                    self.frames.push(Frame::StepLeg {
                        return_scope: self.scope.clone(),
                    });
                    self.scope = target;
                    self.mode = Mode::Advance(*inner);
                    StepEvent::Continue
                }
            },
            // terminals are handled above
            Pull::Done(_) | Pull::Fail(_) | Pull::Interrupted(_) => StepEvent::Continue,
        }
    }

    fn enter_map_output(&mut self, inner: Pull, f: MapFn) -> StepEvent {
        match inner {
            // eager: map the chunk right here
            Pull::Output(chunk) => match chunk.map(|value| f(value)) {
                Ok(mapped) => self.emit_guarded(mapped),
                Err(err) => {
                    self.mode = Mode::Deliver(Terminal::Fail(err));
                    StepEvent::Continue
                }
            },
            other => match fusion::map_output(other, f) {
                Pull::MapOutput { inner, f } => {
                    self.frames.push(Frame::MapOut(f));
                    self.mode = Mode::Advance(*inner);
                    StepEvent::Continue
                }
                passed_through => {
                    self.mode = Mode::Advance(passed_through);
                    StepEvent::Continue
                }
            },
        }
    }

    fn emit_guarded(&mut self, chunk: Chunk) -> StepEvent {
        match self.interrupt_guard() {
            Some(terminal) => {
                self.mode = Mode::Deliver(terminal);
                StepEvent::Continue
            }
            None => self.emit(chunk),
        }
    }

    fn enter_scope(&mut self, inner: Pull, interruptible: bool) -> StepEvent {
        if let Some(terminal) = self.interrupt_guard() {
            self.mode = Mode::Deliver(terminal);
            return StepEvent::Continue;
        }
        // at most one extended top-level scope is held at a time
        if self.scope.is_root() {
            if let Some(extended) = self.extended.take() {
                if let Err(err) = extended.close(&ExitCase::Succeeded) {
                    self.mode = Mode::Deliver(Terminal::Fail(err));
                    return StepEvent::Continue;
                }
            }
        }
        let child = match self.scope.open(interruptible) {
            Ok(child) => child,
            Err(err) => {
                self.mode = Mode::Deliver(Terminal::Fail(err));
                return StepEvent::Continue;
            }
        };
        self.frames.push(Frame::Kont(close_scope_kont(child.token())));
        self.scope = child;
        self.mode = Mode::Advance(inner);
        StepEvent::Continue
    }

    fn close_scope(
        &mut self,
        token: Token,
        interruption: Option<Interruption>,
        exit: ExitCase,
    ) -> StepEvent {
        let Some(to_close) = self.scope.find_in_lineage(token) else {
            // scope already gone: fall through with the interruption, if any
            self.mode = Mode::Deliver(match interruption {
                Some(i) => Terminal::Interrupted(i),
                None => Terminal::unit(),
            });
            return StepEvent::Continue;
        };

        if to_close.is_root() {
            self.mode = Mode::Deliver(Terminal::Fail(StreamError::RootScopeClose));
            return StepEvent::Continue;
        }

        if self.extend_last && to_close.level() == 1 {
            // keep the current top-level scope alive instead of closing it
            let mut close_err = None;
            if let Some(previous) = self.extended.take() {
                if let Err(err) = previous.close(&ExitCase::Succeeded) {
                    close_err = Some(err);
                }
            }
            self.scope = to_close.open_ancestor();
            self.extended = Some(to_close);
            self.mode = Mode::Deliver(match close_err {
                Some(err) => Terminal::Fail(err),
                None => Terminal::unit(),
            });
            return StepEvent::Continue;
        }

        let close_result = to_close.close(&exit);
        let ancestor = to_close.open_ancestor();
        self.scope = ancestor.clone();

        let terminal = match interruption {
            None => match close_result {
                Ok(()) => Terminal::unit(),
                Err(err) => Terminal::Fail(err),
            },
            Some(Interruption { origin, deferred }) => {
                let err = StreamError::combine(close_result.err(), deferred);
                if ancestor.descends_from(origin) {
                    // still inside the interrupted region: keep propagating
                    Terminal::Interrupted(Interruption::with_deferred(origin, err))
                } else {
                    match err {
                        Some(err) => Terminal::Fail(err),
                        None => Terminal::unit(),
                    }
                }
            }
        };
        self.mode = Mode::Deliver(terminal);
        StepEvent::Continue
    }

    // ---- delivering ------------------------------------------------------

    fn deliver(&mut self, terminal: Terminal) -> StepEvent {
        match self.frames.pop() {
            None => StepEvent::Done(terminal),
            Some(Frame::Kont(kont)) => {
                self.mode = Mode::Advance(kont(terminal));
                StepEvent::Continue
            }
            Some(Frame::MapOut(_)) => {
                // transforms outputs only; terminals pass through
                self.mode = Mode::Deliver(terminal);
                StepEvent::Continue
            }
            Some(Frame::Translate { prev, .. }) => {
                self.translation = prev;
                self.mode = Mode::Deliver(terminal);
                StepEvent::Continue
            }
            Some(Frame::FlatMap(_)) => {
                self.mode = Mode::Deliver(match terminal {
                    Terminal::Done(_) => Terminal::unit(),
                    other => other,
                });
                StepEvent::Continue
            }
            Some(Frame::Uncons) => self.finish_step(terminal, None),
            Some(Frame::StepLeg { return_scope }) => self.finish_step(terminal, Some(return_scope)),
        }
    }

    fn finish_step(&mut self, terminal: Terminal, return_scope: Option<Scope>) -> StepEvent {
        if let Some(scope) = return_scope {
            self.scope = scope;
        }
        self.mode = Mode::Deliver(match terminal {
            Terminal::Done(_) => match self.interrupt_guard() {
                Some(interrupted) => interrupted,
                None => Terminal::Done(Value::Step(None)),
            },
            other => other,
        });
        StepEvent::Continue
    }

    // ---- emission --------------------------------------------------------

    /// Route a chunk from the current position to its nearest consumer
    /// frame, or to the top level.
    fn emit(&mut self, chunk: Chunk) -> StepEvent {
        if self.frames.iter().any(Frame::is_consumer) {
            self.emit_to_consumer(chunk)
        } else {
            self.emit_top_level(chunk)
        }
    }

    /// No consumer below: transform the chunk in place (the frames stay, as
    /// the tail continuation) and hand it to the driver.
    fn emit_top_level(&mut self, mut chunk: Chunk) -> StepEvent {
        for index in (0..self.frames.len()).rev() {
            if let Frame::MapOut(f) = &self.frames[index] {
                match chunk.map(|value| f(value)) {
                    Ok(mapped) => chunk = mapped,
                    Err(err) => {
                        // the transformer becomes a failure: everything
                        // inside it is discarded
                        self.frames.truncate(index);
                        self.mode = Mode::Deliver(Terminal::Fail(err));
                        return StepEvent::Continue;
                    }
                }
            }
        }
        self.mode = Mode::Deliver(Terminal::unit());
        StepEvent::Out(chunk)
    }

    /// Pop frames down to the nearest consumer, materializing them into the
    /// tail pull, then dispatch on the consumer.
    fn emit_to_consumer(&mut self, mut chunk: Chunk) -> StepEvent {
        let mut tail = Pull::done();
        loop {
            let frame = match self.frames.pop() {
                Some(frame) => frame,
                None => {
                    // consumer disappeared mid-walk; cannot happen, but fail
                    // loudly rather than drop the chunk
                    self.mode = Mode::Deliver(Terminal::Fail(StreamError::internal(
                        "emission walk lost its consumer frame",
                    )));
                    return StepEvent::Continue;
                }
            };
            match frame {
                Frame::Kont(kont) => {
                    tail = tail.bind_with(kont);
                }
                Frame::MapOut(f) => match chunk.map(|value| f(value)) {
                    Ok(mapped) => {
                        chunk = mapped;
                        tail = Pull::MapOutput {
                            inner: Box::new(tail),
                            f,
                        };
                    }
                    Err(err) => {
                        self.mode = Mode::Deliver(Terminal::Fail(err));
                        return StepEvent::Continue;
                    }
                },
                Frame::Translate { prev, fk } => {
                    self.translation = prev;
                    tail = Pull::Translate {
                        inner: Box::new(tail),
                        translation: fk,
                    };
                }
                Frame::FlatMap(f) => {
                    self.mode = Mode::Advance(flat_map_unconsed(chunk, tail, f));
                    return StepEvent::Continue;
                }
                Frame::Uncons => {
                    let step = PullStep {
                        chunk,
                        scope: self.scope.token(),
                        tail,
                    };
                    self.mode = Mode::Deliver(Terminal::Done(Value::Step(Some(Box::new(step)))));
                    return StepEvent::Continue;
                }
                Frame::StepLeg { return_scope } => {
                    let step = PullStep {
                        chunk,
                        scope: self.scope.token(),
                        tail,
                    };
                    self.scope = return_scope;
                    self.mode = Mode::Deliver(Terminal::Done(Value::Step(Some(Box::new(step)))));
                    return StepEvent::Continue;
                }
            }
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("mode", &self.mode_kind())
            .field("frames", &self.frames)
            .field("scope", &self.scope)
            .field("steps", &self.step_counter)
            .finish()
    }
}

/// Continuation synthesized around the body of an opened scope: closes the
/// scope with an exit case matching the body's terminal.
fn close_scope_kont(token: Token) -> Kont {
    Arc::new(move |terminal| match terminal {
        Terminal::Done(value) => Pull::CloseScope {
            token,
            interruption: None,
            exit: ExitCase::Succeeded,
        }
        .bind_with(Arc::new(move |close_terminal| match close_terminal {
            Terminal::Done(_) => Pull::Done(value.clone()),
            other => Pull::from_terminal(other),
        })),
        Terminal::Interrupted(interruption) => Pull::CloseScope {
            token,
            interruption: Some(interruption),
            exit: ExitCase::Canceled,
        },
        Terminal::Fail(err) => Pull::CloseScope {
            token,
            interruption: None,
            exit: ExitCase::Errored(err.clone()),
        }
        .bind_with(Arc::new(move |close_terminal| match close_terminal {
            // reassert the body's error, composing a close failure into it
            Terminal::Done(_) => Pull::Fail(err.clone()),
            Terminal::Fail(close_err) => {
                Pull::Fail(StreamError::compose(err.clone(), close_err))
            }
            Terminal::Interrupted(interruption) => Pull::Interrupted(interruption),
        })),
    })
}

/// Unroll an emitted chunk into per-element sub-pulls.
///
/// The singleton-with-pure-tail case forwards directly so recursive
/// flat-mapped streams loop in constant frame depth.
fn flat_map_unconsed(chunk: Chunk, tail: Pull, f: BindFn) -> Pull {
    if chunk.len() == 1 && matches!(tail, Pull::Done(_)) {
        match chunk.first() {
            Some(value) => f(value.clone()),
            None => Pull::done(),
        }
    } else {
        flat_map_element(chunk, 0, tail, f)
    }
}

fn flat_map_element(chunk: Chunk, index: usize, tail: Pull, f: BindFn) -> Pull {
    match chunk.get(index) {
        None => fusion::flat_map_output(tail, f),
        Some(value) => {
            let value = value.clone();
            let next_chunk = chunk.clone();
            let next_tail = tail.clone();
            let next_f = Arc::clone(&f);
            f(value).bind_with(Arc::new(move |terminal| match terminal {
                Terminal::Done(_) => flat_map_element(
                    next_chunk.clone(),
                    index + 1,
                    next_tail.clone(),
                    Arc::clone(&next_f),
                ),
                Terminal::Fail(err) => Pull::Fail(err),
                Terminal::Interrupted(interruption) => {
                    view::interrupt_boundary(next_tail.clone(), interruption)
                }
            }))
        }
    }
}

// ---- driver ----------------------------------------------------------------

/// Compile a pull: drive it against a fresh root scope, folding every
/// emitted chunk into `acc`. The root scope closes when the drive ends,
/// whatever the outcome.
pub fn compile<A>(
    pull: Pull,
    extend_last: bool,
    init: A,
    fold: impl FnMut(&mut A, &Chunk) -> Result<(), StreamError>,
) -> Result<A, StreamError> {
    let root = Scope::root();
    let result = compile_in(&root, pull, extend_last, init, fold);
    let exit = match &result {
        Ok(_) => ExitCase::Succeeded,
        Err(err) => ExitCase::Errored(err.clone()),
    };
    match (result, root.close(&exit)) {
        (Ok(acc), Ok(())) => Ok(acc),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => Err(StreamError::compose(err, close_err)),
    }
}

/// Compile against a scope the caller owns (and will close).
pub fn compile_in<A>(
    scope: &Scope,
    pull: Pull,
    extend_last: bool,
    init: A,
    mut fold: impl FnMut(&mut A, &Chunk) -> Result<(), StreamError>,
) -> Result<A, StreamError> {
    let mut machine = Machine::new(pull, scope.clone(), extend_last);
    let mut acc = init;
    loop {
        match machine.step() {
            StepEvent::Continue => {}
            StepEvent::Out(chunk) => {
                if let Err(err) = fold(&mut acc, &chunk) {
                    machine.inject(err);
                }
            }
            StepEvent::Done(Terminal::Done(_)) => return Ok(acc),
            StepEvent::Done(Terminal::Fail(err)) => return Err(err),
            StepEvent::Done(Terminal::Interrupted(Interruption { deferred, .. })) => {
                // interruption is not an error unless it carries one
                return match deferred {
                    Some(err) => Err(err),
                    None => Ok(acc),
                };
            }
        }
    }
}
