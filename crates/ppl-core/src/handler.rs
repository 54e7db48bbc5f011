//! Handler stack and the loop that dispatches program effects.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::effect::{FactorRequest, Program, Resume, SampleRequest, Step};
use crate::errors::{ErrorInfo, PplError};
use crate::rng::RngHandle;
use crate::state::{Address, Store};
use crate::value::Value;

/// Identifier of an installed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandlerId(u64);

#[derive(Debug, Clone)]
struct Installed {
    id: HandlerId,
    name: &'static str,
}

/// Explicit context passed alongside every effect dispatch.
///
/// It owns the randomness capability and the stack of installed handlers.
/// Engines install themselves on entry and restore the previous handler
/// exactly once, on final exit.
#[derive(Debug, Clone)]
pub struct Context {
    rng: RngHandle,
    stack: Vec<Installed>,
    next_id: u64,
}

impl Context {
    /// Creates a context whose randomness is seeded from `seed`.
    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(RngHandle::from_seed(seed))
    }

    /// Creates a context around an existing RNG handle.
    pub fn with_rng(rng: RngHandle) -> Self {
        Self {
            rng,
            stack: Vec::new(),
            next_id: 1,
        }
    }

    /// Returns the randomness capability.
    pub fn rng(&mut self) -> &mut RngHandle {
        &mut self.rng
    }

    /// Installs a new handler on top of the stack.
    pub fn install(&mut self, name: &'static str) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        trace!(handler = name, id = id.0, depth = self.stack.len(), "install handler");
        self.stack.push(Installed { id, name });
        id
    }

    /// Restores the handler that was active before `id` was installed.
    pub fn restore(&mut self, id: HandlerId) -> Result<(), PplError> {
        self.ensure_active(id)?;
        if let Some(installed) = self.stack.pop() {
            trace!(handler = installed.name, id = id.0, "restore previous handler");
        }
        Ok(())
    }

    /// Drops `id` and every handler installed above it. Used when an engine aborts.
    pub fn unwind(&mut self, id: HandlerId) {
        if let Some(pos) = self.stack.iter().position(|entry| entry.id == id) {
            self.stack.truncate(pos);
        }
    }

    /// Fails unless `id` is the active handler.
    pub fn ensure_active(&self, id: HandlerId) -> Result<(), PplError> {
        match self.stack.last() {
            Some(top) if top.id == id => Ok(()),
            Some(top) => Err(PplError::Handler(
                ErrorInfo::new("handler-nesting", "effect reached a handler that is not active")
                    .with_context("expected", id.0)
                    .with_context("active", top.id.0)
                    .with_context("active_name", top.name),
            )),
            None => Err(PplError::Handler(
                ErrorInfo::new("handler-missing", "no handler is installed")
                    .with_context("expected", id.0),
            )),
        }
    }

    /// Identifier of the active handler.
    pub fn active(&self) -> Option<HandlerId> {
        self.stack.last().map(|entry| entry.id)
    }

    /// Name of the active handler.
    pub fn active_name(&self) -> Option<&'static str> {
        self.stack.last().map(|entry| entry.name)
    }

    /// Number of installed handlers.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Handler decision after processing one effect.
#[derive(Debug)]
pub enum Control<T> {
    /// Run the given continuation next.
    Resume(Resume),
    /// The handler has finished and restored its predecessor.
    Done(T),
}

/// Receiver of the three program effects.
pub trait Handler {
    /// Final result produced once the handler is done.
    type Output;

    /// Identifier under which the handler is installed.
    fn id(&self) -> HandlerId;

    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Handles a random choice.
    fn sample(
        &mut self,
        ctx: &mut Context,
        request: SampleRequest,
    ) -> Result<Control<Self::Output>, PplError>;

    /// Handles a soft constraint. `request.log_weight` is never NaN.
    fn factor(
        &mut self,
        ctx: &mut Context,
        request: FactorRequest,
    ) -> Result<Control<Self::Output>, PplError>;

    /// Handles program completion.
    fn exit(
        &mut self,
        ctx: &mut Context,
        store: Store,
        value: Value,
    ) -> Result<Control<Self::Output>, PplError>;
}

/// Runs continuations and dispatches their effects to `handler` until it is done.
///
/// The handler must already be installed. On error the handler (and anything
/// above it) is unwound from the stack.
pub fn drive<H: Handler + ?Sized>(
    handler: &mut H,
    ctx: &mut Context,
    start: Resume,
) -> Result<H::Output, PplError> {
    let id = handler.id();
    let result = dispatch_loop(handler, ctx, start);
    if result.is_err() {
        ctx.unwind(id);
    }
    result
}

fn dispatch_loop<H: Handler + ?Sized>(
    handler: &mut H,
    ctx: &mut Context,
    start: Resume,
) -> Result<H::Output, PplError> {
    let mut next = start;
    loop {
        let step = next.invoke();
        ctx.ensure_active(handler.id()).map_err(|err| {
            let mut info = err.info().clone();
            info.context
                .insert("handler".to_string(), handler.name().to_string());
            PplError::Handler(info)
        })?;
        let control = match step {
            Step::Sample(request) => handler.sample(ctx, request)?,
            Step::Factor(request) => {
                if request.log_weight.is_nan() {
                    return Err(PplError::Numeric(
                        ErrorInfo::new("factor-nan", "factor received a NaN log weight")
                            .with_context("handler", handler.name())
                            .with_context("address", &request.address),
                    ));
                }
                handler.factor(ctx, request)?
            }
            Step::Exit { store, value } => handler.exit(ctx, store, value)?,
        };
        match control {
            Control::Resume(resume) => next = resume,
            Control::Done(output) => return Ok(output),
        }
    }
}

/// Handler used outside of inference: samples are drawn directly and the
/// return value is passed through. Factors are rejected.
#[derive(Debug)]
pub struct ForwardHandler {
    id: HandlerId,
}

impl ForwardHandler {
    /// Installs a forward handler on `ctx`.
    pub fn install(ctx: &mut Context) -> Self {
        Self {
            id: ctx.install("forward"),
        }
    }
}

impl Handler for ForwardHandler {
    type Output = Value;

    fn id(&self) -> HandlerId {
        self.id
    }

    fn name(&self) -> &'static str {
        "forward"
    }

    fn sample(
        &mut self,
        ctx: &mut Context,
        request: SampleRequest,
    ) -> Result<Control<Value>, PplError> {
        let value = request.dist.draw(&request.params, ctx.rng())?;
        Ok(Control::Resume(Resume::Deliver {
            k: request.k,
            store: request.store,
            value,
        }))
    }

    fn factor(
        &mut self,
        _ctx: &mut Context,
        request: FactorRequest,
    ) -> Result<Control<Value>, PplError> {
        Err(PplError::Handler(
            ErrorInfo::new("factor-outside-inference", "factor allowed only inside inference")
                .with_context("address", &request.address)
                .with_hint("run the program under an inference engine"),
        ))
    }

    fn exit(
        &mut self,
        ctx: &mut Context,
        _store: Store,
        value: Value,
    ) -> Result<Control<Value>, PplError> {
        ctx.restore(self.id)?;
        Ok(Control::Done(value))
    }
}

/// Runs `program` once without inference and returns its value.
pub fn run_forward(
    ctx: &mut Context,
    program: &Program,
    address: &Address,
    store: Store,
) -> Result<Value, PplError> {
    let mut handler = ForwardHandler::install(ctx);
    let start = Resume::Continue {
        k: program.entry(address),
        store,
    };
    drive(&mut handler, ctx, start)
}
