#![deny(missing_docs)]
#![doc = "Effect protocol, execution state and handler context shared by the inference engines."]

pub mod dist;
pub mod effect;
pub mod empirical;
pub mod errors;
pub mod handler;
pub mod numeric;
pub mod rng;
pub mod state;
mod value;

pub use effect::{
    exit, factor, sample, sample_with_factor, Continuation, Distribution, DistributionRef,
    FactorRequest, Program, Resume, SampleContinuation, SampleRequest, Step,
};
pub use empirical::{EmpiricalDistribution, Histogram};
pub use errors::{ErrorInfo, PplError};
pub use handler::{drive, run_forward, Context, Control, ForwardHandler, Handler, HandlerId};
pub use rng::{derive_substream_seed, RngHandle};
pub use state::{Address, Store};
pub use value::Value;
