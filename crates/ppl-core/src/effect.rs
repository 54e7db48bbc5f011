//! Suspend/resume calling convention between programs and handlers.
//!
//! A program never calls a handler directly. Each effect is *returned* as a
//! [`Step`] holding the continuation that resumes the program, and the
//! driving loop in [`crate::handler`] hands it to the active handler. Handlers
//! answer with a [`Resume`] naming which stored continuation runs next, which
//! lets an engine switch between logical executions without growing the call
//! stack.

use std::fmt;
use std::rc::Rc;

use rand::RngCore;

use crate::errors::PplError;
use crate::state::{Address, Store};
use crate::value::Value;

/// Contract every elementary distribution satisfies.
pub trait Distribution: fmt::Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Draws a value given the parameters.
    fn draw(&self, params: &[Value], rng: &mut dyn RngCore) -> Result<Value, PplError>;

    /// Log-probability of `value` given the parameters. Finite or `-inf`, never NaN.
    fn score(&self, params: &[Value], value: &Value) -> Result<f64, PplError>;
}

/// Shared handle to a distribution object.
pub type DistributionRef = Rc<dyn Distribution>;

/// Continuation resumed with the current store only (after `factor`, or at program start).
#[derive(Clone)]
pub struct Continuation(Rc<dyn Fn(Store) -> Step>);

impl Continuation {
    /// Wraps a closure as a continuation.
    pub fn new(f: impl Fn(Store) -> Step + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Resumes the program.
    pub fn resume(&self, store: Store) -> Step {
        (self.0)(store)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation").finish_non_exhaustive()
    }
}

/// Continuation resumed with the store and a sampled value.
#[derive(Clone)]
pub struct SampleContinuation(Rc<dyn Fn(Store, Value) -> Step>);

impl SampleContinuation {
    /// Wraps a closure as a sample continuation.
    pub fn new(f: impl Fn(Store, Value) -> Step + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Resumes the program with the sampled value.
    pub fn resume(&self, store: Store, value: Value) -> Step {
        (self.0)(store, value)
    }
}

impl fmt::Debug for SampleContinuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleContinuation").finish_non_exhaustive()
    }
}

/// A program rewritten to the suspend/resume convention.
///
/// Invoked with the initial store and its entry address; it runs until its
/// first effect and returns that effect as a [`Step`].
#[derive(Clone)]
pub struct Program(Rc<dyn Fn(Store, Address) -> Step>);

impl Program {
    /// Wraps a closure as a program.
    pub fn new(f: impl Fn(Store, Address) -> Step + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Runs the program from the start.
    pub fn call(&self, store: Store, address: Address) -> Step {
        (self.0)(store, address)
    }

    /// Continuation that starts a fresh execution at `address`.
    pub fn entry(&self, address: &Address) -> Continuation {
        let program = self.clone();
        let address = address.clone();
        Continuation::new(move |store| program.call(store, address.clone()))
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program").finish_non_exhaustive()
    }
}

/// Arguments of a `sample` effect.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    /// Store at the suspension point.
    pub store: Store,
    /// Continuation receiving the sampled value.
    pub k: SampleContinuation,
    /// Address of the choice site.
    pub address: Address,
    /// Distribution to draw from.
    pub dist: DistributionRef,
    /// Distribution parameters.
    pub params: Vec<Value>,
}

/// Arguments of a `factor` effect.
#[derive(Debug, Clone)]
pub struct FactorRequest {
    /// Store at the suspension point.
    pub store: Store,
    /// Continuation resuming after the factor.
    pub k: Continuation,
    /// Address of the factor site.
    pub address: Address,
    /// Log weight to incorporate; finite or `-inf`.
    pub log_weight: f64,
}

/// One effect performed by a running program.
#[derive(Debug, Clone)]
pub enum Step {
    /// Random choice.
    Sample(SampleRequest),
    /// Soft constraint.
    Factor(FactorRequest),
    /// Final return value.
    Exit {
        /// Store at program exit.
        store: Store,
        /// Returned value.
        value: Value,
    },
}

/// Which stored continuation a handler wants to run next.
#[derive(Debug, Clone)]
pub enum Resume {
    /// Resume a store-only continuation.
    Continue {
        /// Continuation to invoke.
        k: Continuation,
        /// Store handed to the continuation.
        store: Store,
    },
    /// Deliver a sampled value.
    Deliver {
        /// Continuation to invoke.
        k: SampleContinuation,
        /// Store handed to the continuation.
        store: Store,
        /// Sampled value.
        value: Value,
    },
}

impl Resume {
    /// Invokes the continuation and returns the program's next effect.
    pub fn invoke(self) -> Step {
        match self {
            Resume::Continue { k, store } => k.resume(store),
            Resume::Deliver { k, store, value } => k.resume(store, value),
        }
    }
}

/// Performs a `sample` effect.
pub fn sample(
    store: Store,
    address: Address,
    dist: DistributionRef,
    params: Vec<Value>,
    k: impl Fn(Store, Value) -> Step + 'static,
) -> Step {
    Step::Sample(SampleRequest {
        store,
        k: SampleContinuation::new(k),
        address,
        dist,
        params,
    })
}

/// Performs a `factor` effect.
pub fn factor(
    store: Store,
    address: Address,
    log_weight: f64,
    k: impl Fn(Store) -> Step + 'static,
) -> Step {
    Step::Factor(FactorRequest {
        store,
        k: Continuation::new(k),
        address,
        log_weight,
    })
}

/// Performs the `exit` effect.
pub fn exit(store: Store, value: Value) -> Step {
    Step::Exit { store, value }
}

/// Samples a value, scores it with `score_fn`, and factors by that score
/// before handing the value to `k`.
///
/// The factor effect is issued at the sample address extended with `swf2`.
pub fn sample_with_factor(
    store: Store,
    address: Address,
    dist: DistributionRef,
    params: Vec<Value>,
    score_fn: impl Fn(&Value) -> f64 + 'static,
    k: impl Fn(Store, Value) -> Step + 'static,
) -> Step {
    let score_fn = Rc::new(score_fn);
    let k = SampleContinuation::new(k);
    let factor_address = address.child("swf2");
    sample(store, address, dist, params, move |store, value| {
        let log_weight = score_fn(&value);
        let k = k.clone();
        let delivered = value.clone();
        factor(store, factor_address.clone(), log_weight, move |store| {
            k.resume(store, delivered.clone())
        })
    })
}
