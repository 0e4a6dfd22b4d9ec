//! The scope tree: resource ownership, interruption and leasing.
//!
//! Scopes form a tree rooted at a single root scope per compilation. Each
//! scope owns the finalizers of resources acquired while it was current,
//! runs them exactly once at close (LIFO, children before parents), and may
//! carry an interruption context shared with its non-interruptible
//! descendants.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::algebra::FinalizerFn;
use crate::effect::{Gate, GateSource, Thunk};
use crate::error::StreamError;
use crate::ids::{Token, WatcherId};
use crate::step::{ExitCase, InterruptCause, Interruption, Outcome};
use crate::value::Value;

/// Interruption state shared along a lineage.
///
/// An interruptible scope owns a fresh context; its non-interruptible
/// descendants share it, so interrupting the origin is observed by the whole
/// subtree while ancestors and siblings stay untouched.
#[derive(Debug)]
pub struct InterruptContext {
    origin: Token,
    source: GateSource,
    cause: Mutex<Option<InterruptCause>>,
}

impl InterruptContext {
    fn new(origin: Token) -> Self {
        InterruptContext {
            origin,
            source: GateSource::new(),
            cause: Mutex::new(None),
        }
    }

    pub fn origin(&self) -> Token {
        self.origin
    }

    pub fn gate(&self) -> Gate {
        self.source.gate()
    }

    pub fn cause(&self) -> Option<InterruptCause> {
        self.cause.lock().clone()
    }

    /// Record the cause (first writer wins) and wake gate waiters.
    pub fn interrupt(&self, cause: InterruptCause) {
        {
            let mut slot = self.cause.lock();
            if slot.is_none() {
                *slot = Some(cause);
            }
        }
        self.source.shut();
    }
}

struct Finalizer {
    resource: Value,
    release: FinalizerFn,
}

struct Watcher {
    id: WatcherId,
    source: GateSource,
    cancelled: Arc<AtomicBool>,
}

struct ScopeState {
    open: bool,
    finalizers: Vec<Finalizer>,
    children: Vec<Scope>,
    leases: u32,
    /// Exit case of a close deferred by outstanding leases.
    pending_close: Option<ExitCase>,
    watchers: Vec<Watcher>,
}

struct ScopeInner {
    token: Token,
    parent: Option<Scope>,
    level: u32,
    interrupt: Option<Arc<InterruptContext>>,
    state: Mutex<ScopeState>,
}

/// A node in the scope tree. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a root scope for one compilation.
    pub fn root() -> Scope {
        Scope {
            inner: Arc::new(ScopeInner {
                token: Token::fresh(),
                parent: None,
                level: 0,
                interrupt: None,
                state: Mutex::new(ScopeState {
                    open: true,
                    finalizers: Vec::new(),
                    children: Vec::new(),
                    leases: 0,
                    pending_close: None,
                    watchers: Vec::new(),
                }),
            }),
        }
    }

    pub fn token(&self) -> Token {
        self.inner.token
    }

    pub fn level(&self) -> u32 {
        self.inner.level
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    fn interrupt_context(&self) -> Option<&Arc<InterruptContext>> {
        self.inner.interrupt.as_ref()
    }

    /// Gate effects running under this scope should watch.
    pub fn eval_gate(&self) -> Gate {
        match self.interrupt_context() {
            Some(ctx) => ctx.gate(),
            None => Gate::open(),
        }
    }

    // ---- tree structure --------------------------------------------------

    /// Open a child scope. With `interruptible` the child owns a fresh
    /// interruption context; otherwise it shares this scope's.
    pub fn open(&self, interruptible: bool) -> Result<Scope, StreamError> {
        let token = Token::fresh();
        let interrupt = if interruptible {
            Some(Arc::new(InterruptContext::new(token)))
        } else {
            self.inner.interrupt.clone()
        };
        let child = Scope {
            inner: Arc::new(ScopeInner {
                token,
                parent: Some(self.clone()),
                level: self.inner.level + 1,
                interrupt,
                state: Mutex::new(ScopeState {
                    open: true,
                    finalizers: Vec::new(),
                    children: Vec::new(),
                    leases: 0,
                    pending_close: None,
                    watchers: Vec::new(),
                }),
            }),
        };

        let mut state = self.inner.state.lock();
        if !state.open {
            return Err(StreamError::open_on_closed_scope(self.token()));
        }
        state.children.push(child.clone());
        Ok(child)
    }

    /// Find the scope with `token` among this scope and its ancestors.
    pub fn find_in_lineage(&self, token: Token) -> Option<Scope> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if scope.token() == token {
                return Some(scope.clone());
            }
            current = scope.parent();
        }
        None
    }

    /// Whether this scope or a strict ancestor carries `token`.
    pub fn descends_from(&self, token: Token) -> bool {
        self.find_in_lineage(token).is_some()
    }

    fn find_in_subtree(&self, token: Token) -> Option<Scope> {
        if self.token() == token {
            return Some(self.clone());
        }
        let children = self.inner.state.lock().children.clone();
        children
            .into_iter()
            .find_map(|child| child.find_in_subtree(token))
    }

    /// Locate a scope for step-leg shifting: this lineage first, then the
    /// whole tree from the root.
    pub fn find_step_scope(&self, token: Token) -> Option<Scope> {
        self.find_in_lineage(token)
            .or_else(|| self.root_scope().find_in_subtree(token))
    }

    fn root_scope(&self) -> Scope {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent.clone();
        }
        current
    }

    /// Nearest still-open ancestor (or the root as a last resort).
    pub fn open_ancestor(&self) -> Scope {
        let mut current = self.parent().cloned();
        while let Some(scope) = current {
            if scope.is_open() || scope.is_root() {
                return scope;
            }
            current = scope.parent().cloned();
        }
        self.root_scope()
    }

    // ---- interruption ----------------------------------------------------

    /// Non-blocking interruption check; the guard before interpreter steps.
    pub fn is_interrupted(&self) -> Option<InterruptCause> {
        self.interrupt_context().and_then(|ctx| ctx.cause())
    }

    /// Interrupt this scope's context, if it has one. Returns false when
    /// the scope is not interruptible.
    pub fn interrupt(&self, cause: InterruptCause) -> bool {
        match self.interrupt_context() {
            Some(ctx) => {
                ctx.interrupt(cause);
                true
            }
            None => false,
        }
    }

    /// Interrupt with this context's own origin token.
    pub fn interrupt_here(&self) -> bool {
        match self.interrupt_context() {
            Some(ctx) => {
                ctx.interrupt(InterruptCause::Interrupted(ctx.origin()));
                true
            }
            None => false,
        }
    }

    /// Run an effect under this scope's interruption context.
    ///
    /// A cause recorded before or while the effect runs wins over the
    /// effect's own result; the result of an interrupted effect is
    /// discarded.
    pub fn interruptible_eval(&self, thunk: &Thunk) -> Outcome {
        if let Some(outcome) = self.interrupted_outcome() {
            return outcome;
        }
        let gate = self.eval_gate();
        let result = thunk.run(&gate);
        if let Some(outcome) = self.interrupted_outcome() {
            return outcome;
        }
        match result {
            Ok(value) => Outcome::Succeeded(value),
            Err(err) => Outcome::Errored(err),
        }
    }

    fn interrupted_outcome(&self) -> Option<Outcome> {
        self.is_interrupted().map(|cause| match cause {
            InterruptCause::Interrupted(origin) => {
                Outcome::Canceled(Interruption::new(origin))
            }
            InterruptCause::Errored(err) => Outcome::Errored(err),
        })
    }

    /// Spawn a watcher that interrupts this scope when `signal` completes,
    /// or records its error. The watcher is cancelled at scope close.
    pub fn interrupt_when(&self, signal: Thunk) -> Result<(), StreamError> {
        let Some(ctx) = self.interrupt_context().cloned() else {
            return Err(StreamError::internal(
                "interrupt_when outside an interruptible scope",
            ));
        };

        let source = GateSource::new();
        let gate = source.gate();
        let cancelled = Arc::new(AtomicBool::new(false));
        let watcher = Watcher {
            id: WatcherId::fresh(),
            source,
            cancelled: Arc::clone(&cancelled),
        };
        crate::engine_debug_log!(
            "scope {}: arming interruption watcher {}",
            self.token().raw(),
            watcher.id.raw()
        );

        {
            let mut state = self.inner.state.lock();
            if !state.open {
                return Err(StreamError::open_on_closed_scope(self.token()));
            }
            state.watchers.push(watcher);
        }

        std::thread::spawn(move || {
            let result = signal.run(&gate);
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Ok(_) => ctx.interrupt(InterruptCause::Interrupted(ctx.origin())),
                Err(err) => ctx.interrupt(InterruptCause::Errored(err)),
            }
        });
        Ok(())
    }

    // ---- resources -------------------------------------------------------

    /// Run `acquire` and register `release` as a finalizer iff acquisition
    /// succeeded and the scope is still open.
    pub fn acquire_resource(
        &self,
        acquire: &Thunk,
        release: FinalizerFn,
        cancelable: bool,
    ) -> Outcome {
        if let Some(outcome) = self.interrupted_outcome() {
            return outcome;
        }

        // cancelable acquisition may observe the scope's gate; otherwise it
        // runs masked
        let gate = if cancelable {
            self.eval_gate()
        } else {
            Gate::open()
        };

        let resource = match acquire.run(&gate) {
            Ok(value) => value,
            Err(err) => return Outcome::Errored(err),
        };

        if cancelable {
            if let Some(Outcome::Canceled(interruption)) = self.interrupted_outcome() {
                // acquisition raced interruption: release right away so the
                // resource does not leak, then report cancellation
                return match release(&resource, &ExitCase::Canceled) {
                    Ok(()) => Outcome::Canceled(interruption),
                    Err(err) => Outcome::Errored(err),
                };
            }
        }

        let mut state = self.inner.state.lock();
        if !state.open {
            drop(state);
            let err = StreamError::acquire_after_scope_close(self.token());
            return match release(&resource, &ExitCase::Errored(err.clone())) {
                Ok(()) => Outcome::Errored(err),
                Err(release_err) => Outcome::Errored(StreamError::compose(err, release_err)),
            };
        }
        state.finalizers.push(Finalizer {
            resource: resource.clone(),
            release,
        });
        Outcome::Succeeded(resource)
    }

    // ---- closing ---------------------------------------------------------

    /// Close this scope and all open descendants, children first, running
    /// finalizers in reverse acquisition order. Errors aggregate into a
    /// composite. Closing an already-closed scope is a no-op.
    pub fn close(&self, exit: &ExitCase) -> Result<(), StreamError> {
        let (children, watchers, already_closed) = {
            let mut state = self.inner.state.lock();
            if !state.open {
                (Vec::new(), Vec::new(), true)
            } else {
                state.open = false;
                (
                    std::mem::take(&mut state.children),
                    std::mem::take(&mut state.watchers),
                    false,
                )
            }
        };
        if already_closed {
            return Ok(());
        }

        for watcher in &watchers {
            watcher.cancelled.store(true, Ordering::SeqCst);
            watcher.source.shut();
        }

        let mut errors = Vec::new();
        for child in children.iter().rev() {
            if let Err(err) = child.close(exit) {
                errors.push(err);
            }
        }

        let finalizers = {
            let mut state = self.inner.state.lock();
            if state.leases > 0 {
                // leases outstanding: finalization is deferred to the last
                // lease cancel
                state.pending_close = Some(exit.clone());
                Vec::new()
            } else {
                std::mem::take(&mut state.finalizers)
            }
        };
        errors.extend(run_finalizers(finalizers, exit));

        self.detach_from_parent();

        match StreamError::from_list(errors) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn detach_from_parent(&self) {
        if let Some(parent) = self.parent() {
            let mut state = parent.inner.state.lock();
            state.children.retain(|child| child.token() != self.token());
        }
    }

    // ---- leases ----------------------------------------------------------

    /// Lease this scope and its ancestors: while any lease is outstanding,
    /// their finalization is deferred.
    pub fn lease(&self) -> Result<Lease, StreamError> {
        let mut chain = Vec::new();
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            current = scope.parent().cloned();
            chain.push(scope);
        }

        {
            let state = self.inner.state.lock();
            if !state.open {
                return Err(StreamError::lease_after_scope_close(self.token()));
            }
        }
        for scope in &chain {
            scope.inner.state.lock().leases += 1;
        }
        Ok(Lease {
            scopes: chain,
            cancelled: AtomicBool::new(false),
        })
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("token", &self.token().raw())
            .field("level", &self.level())
            .field("open", &self.is_open())
            .finish()
    }
}

fn run_finalizers(finalizers: Vec<Finalizer>, exit: &ExitCase) -> Vec<StreamError> {
    let mut errors = Vec::new();
    for finalizer in finalizers.into_iter().rev() {
        if let Err(err) = (finalizer.release)(&finalizer.resource, exit) {
            errors.push(err);
        }
    }
    errors
}

/// A hold on a scope chain deferring its finalization.
///
/// Cancel exactly once; the cancel that releases the last lease of a scope
/// already asked to close runs that scope's deferred finalizers and reports
/// their errors.
pub struct Lease {
    scopes: Vec<Scope>,
    cancelled: AtomicBool,
}

impl Lease {
    pub fn cancel(&self) -> Result<(), StreamError> {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut errors = Vec::new();
        for scope in &self.scopes {
            let finalizers = {
                let mut state = scope.inner.state.lock();
                state.leases = state.leases.saturating_sub(1);
                if state.leases == 0 && state.pending_close.is_some() {
                    let exit = state.pending_close.take();
                    let finalizers = std::mem::take(&mut state.finalizers);
                    Some((finalizers, exit.unwrap_or(ExitCase::Succeeded)))
                } else {
                    None
                }
            };
            if let Some((finalizers, exit)) = finalizers {
                errors.extend(run_finalizers(finalizers, &exit));
            }
        }
        match StreamError::from_list(errors) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("scopes", &self.scopes.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn record_release(log: &Arc<StdMutex<Vec<(i64, ExitCase)>>>, tag: i64) -> FinalizerFn {
        let log = Arc::clone(log);
        Arc::new(move |_, exit| {
            log.lock().unwrap().push((tag, exit.clone()));
            Ok(())
        })
    }

    #[test]
    fn test_open_and_close_child() {
        let root = Scope::root();
        let child = root.open(false).unwrap();
        assert!(!child.is_root());
        assert_eq!(child.level(), 1);
        assert!(child.is_open());

        child.close(&ExitCase::Succeeded).unwrap();
        assert!(!child.is_open());
        assert!(root.is_open());
    }

    #[test]
    fn test_open_on_closed_scope_fails() {
        let root = Scope::root();
        let child = root.open(false).unwrap();
        child.close(&ExitCase::Succeeded).unwrap();
        assert!(matches!(
            child.open(false),
            Err(StreamError::OpenOnClosedScope { .. })
        ));
    }

    #[test]
    fn test_finalizers_run_lifo() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let root = Scope::root();
        for tag in [1i64, 2, 3] {
            let outcome = root.acquire_resource(
                &Thunk::of(Value::Int(tag)),
                record_release(&log, tag),
                false,
            );
            assert!(matches!(outcome, Outcome::Succeeded(_)));
        }
        root.close(&ExitCase::Succeeded).unwrap();
        let order: Vec<i64> = log.lock().unwrap().iter().map(|(t, _)| *t).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_child_finalizers_before_parent() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let root = Scope::root();
        let outcome =
            root.acquire_resource(&Thunk::of(Value::Unit), record_release(&log, 1), false);
        assert!(matches!(outcome, Outcome::Succeeded(_)));

        let child = root.open(false).unwrap();
        let outcome =
            child.acquire_resource(&Thunk::of(Value::Unit), record_release(&log, 2), false);
        assert!(matches!(outcome, Outcome::Succeeded(_)));

        root.close(&ExitCase::Succeeded).unwrap();
        let order: Vec<i64> = log.lock().unwrap().iter().map(|(t, _)| *t).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let root = Scope::root();
        let _ = root.acquire_resource(&Thunk::of(Value::Unit), record_release(&log, 1), false);
        root.close(&ExitCase::Succeeded).unwrap();
        root.close(&ExitCase::Succeeded).unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failing_finalizers_compose_in_order() {
        let root = Scope::root();
        for tag in ["first", "second"] {
            let release: FinalizerFn = Arc::new(move |_, _| Err(StreamError::internal(tag)));
            let outcome = root.acquire_resource(&Thunk::of(Value::Unit), release, false);
            assert!(matches!(outcome, Outcome::Succeeded(_)));
        }
        // LIFO: "second" releases first
        match root.close(&ExitCase::Succeeded) {
            Err(StreamError::Composite { errors }) => {
                assert_eq!(errors[0], StreamError::internal("second"));
                assert_eq!(errors[1], StreamError::internal("first"));
            }
            other => panic!("expected composite close error, got {other:?}"),
        }
    }

    #[test]
    fn test_acquire_failure_registers_nothing() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let root = Scope::root();
        let outcome = root.acquire_resource(
            &Thunk::fail(StreamError::internal("no resource")),
            record_release(&log, 1),
            false,
        );
        assert!(matches!(outcome, Outcome::Errored(_)));
        root.close(&ExitCase::Succeeded).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_acquire_after_close_releases_immediately() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let root = Scope::root();
        root.close(&ExitCase::Succeeded).unwrap();
        let outcome =
            root.acquire_resource(&Thunk::of(Value::Unit), record_release(&log, 1), false);
        assert!(matches!(outcome, Outcome::Errored(_)));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_interruption_confined_to_subtree() {
        let root = Scope::root();
        let interruptible = root.open(true).unwrap();
        let inner = interruptible.open(false).unwrap();

        assert!(inner.is_interrupted().is_none());
        assert!(interruptible.interrupt_here());
        // the whole subtree observes it
        assert!(matches!(
            inner.is_interrupted(),
            Some(InterruptCause::Interrupted(origin)) if origin == interruptible.token()
        ));
        // the parent does not
        assert!(root.is_interrupted().is_none());
    }

    #[test]
    fn test_interrupt_on_uninterruptible_scope_is_refused() {
        let root = Scope::root();
        assert!(!root.interrupt_here());
        assert!(root
            .interrupt_when(Thunk::of(Value::Unit))
            .is_err());
    }

    #[test]
    fn test_interruptible_eval_observes_cause() {
        let root = Scope::root();
        let scope = root.open(true).unwrap();
        scope.interrupt_here();
        let outcome = scope.interruptible_eval(&Thunk::of(Value::Int(1)));
        assert!(matches!(outcome, Outcome::Canceled(_)));
    }

    #[test]
    fn test_interruptible_eval_never_unblocks_on_interrupt() {
        let root = Scope::root();
        let scope = root.open(true).unwrap();
        let waiter = {
            let scope = scope.clone();
            std::thread::spawn(move || scope.interruptible_eval(&Thunk::never()))
        };
        std::thread::sleep(Duration::from_millis(20));
        scope.interrupt_here();
        let outcome = waiter.join().unwrap();
        assert!(matches!(outcome, Outcome::Canceled(_)));
    }

    #[test]
    fn test_interrupt_when_signal_completion_interrupts() {
        let root = Scope::root();
        let scope = root.open(true).unwrap();
        scope
            .interrupt_when(Thunk::from_fn(|| Ok(Value::Unit)))
            .unwrap();
        for _ in 0..200 {
            if scope.is_interrupted().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(matches!(
            scope.is_interrupted(),
            Some(InterruptCause::Interrupted(origin)) if origin == scope.token()
        ));
    }

    #[test]
    fn test_interrupt_when_signal_error_is_recorded() {
        let root = Scope::root();
        let scope = root.open(true).unwrap();
        scope
            .interrupt_when(Thunk::fail(StreamError::internal("halt failed")))
            .unwrap();
        for _ in 0..200 {
            if scope.is_interrupted().is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(matches!(
            scope.is_interrupted(),
            Some(InterruptCause::Errored(_))
        ));
    }

    #[test]
    fn test_close_cancels_watchers() {
        let root = Scope::root();
        let scope = root.open(true).unwrap();
        // signal waits for its own cancellation gate
        scope
            .interrupt_when(Thunk::new(|gate| {
                gate.wait_shut();
                Ok(Value::Unit)
            }))
            .unwrap();
        scope.close(&ExitCase::Succeeded).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        // a cancelled watcher must not interrupt after close
        assert!(scope.is_interrupted().is_none());
    }

    #[test]
    fn test_lineage_queries() {
        let root = Scope::root();
        let a = root.open(false).unwrap();
        let b = a.open(false).unwrap();

        assert!(b.descends_from(root.token()));
        assert!(b.descends_from(a.token()));
        assert!(!a.descends_from(b.token()));
        assert_eq!(
            b.find_in_lineage(a.token()).map(|s| s.token()),
            Some(a.token())
        );
        assert!(b.find_in_lineage(Token::fresh()).is_none());
    }

    #[test]
    fn test_find_step_scope_searches_subtree() {
        let root = Scope::root();
        let a = root.open(false).unwrap();
        let b = root.open(false).unwrap();
        // b's lineage does not contain a; the subtree search finds it
        assert_eq!(
            b.find_step_scope(a.token()).map(|s| s.token()),
            Some(a.token())
        );
    }

    #[test]
    fn test_open_ancestor_skips_closed() {
        let root = Scope::root();
        let a = root.open(false).unwrap();
        let b = a.open(false).unwrap();
        a.close(&ExitCase::Succeeded).unwrap();
        assert_eq!(b.open_ancestor().token(), root.token());
    }

    #[test]
    fn test_lease_defers_finalization() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let root = Scope::root();
        let child = root.open(false).unwrap();
        let outcome =
            child.acquire_resource(&Thunk::of(Value::Unit), record_release(&log, 1), false);
        assert!(matches!(outcome, Outcome::Succeeded(_)));

        let lease = child.lease().unwrap();
        child.close(&ExitCase::Succeeded).unwrap();
        assert!(log.lock().unwrap().is_empty());

        lease.cancel().unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_lease_cancel_is_idempotent() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let root = Scope::root();
        let child = root.open(false).unwrap();
        let _ =
            child.acquire_resource(&Thunk::of(Value::Unit), record_release(&log, 1), false);
        let lease = child.lease().unwrap();
        child.close(&ExitCase::Succeeded).unwrap();
        lease.cancel().unwrap();
        lease.cancel().unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_lease_on_closed_scope_fails() {
        let root = Scope::root();
        let child = root.open(false).unwrap();
        child.close(&ExitCase::Succeeded).unwrap();
        assert!(matches!(
            child.lease(),
            Err(StreamError::LeaseAfterScopeClose { .. })
        ));
    }

    #[test]
    fn test_interrupted_scope_still_runs_finalizers() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let root = Scope::root();
        let scope = root.open(true).unwrap();
        let _ = scope.acquire_resource(&Thunk::of(Value::Unit), record_release(&log, 1), false);
        scope.interrupt_here();
        scope.close(&ExitCase::Canceled).unwrap();
        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, ExitCase::Canceled);
    }
}
