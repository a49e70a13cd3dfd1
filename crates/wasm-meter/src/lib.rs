//! Execution metering for WebAssembly modules
//!
//! Rewrites a module so that every straight-line run of instructions
//! charges its cost to an accounting routine before control can leave it.
//! The host configures a budget through an injected threshold global; once
//! the running counter passes it, the instrumented code calls back into a
//! host-provided "exceed" import. This bounds how much work untrusted code
//! can do inside a sandbox.
//!
//! Pipeline, per function: recover the block graph ([`cfg`]), weigh each
//! block with the configured [`CostModel`], then splice
//! `i64.const <weight>; call <increment>` into each weighted block. Module
//! setup (globals, the synthesized increment function, import signature
//! coercion) happens once, and the mutated module must pass validation
//! before [`instrument`] returns.
//!
//! On any error the module may already be partially rewritten; callers must
//! discard it rather than retry.

pub mod error;
pub mod inject;
pub mod instrument;
pub mod weight;

pub use error::MeterError;
pub use inject::CounterInjector;
pub use instrument::{
    instrument, instrument_with, InjectedSymbols, MeterConfig, COUNTER_GLOBAL_NAME,
    EXCEED_IMPORT_FIELD, EXCEED_IMPORT_MODULE, THRESHOLD_GLOBAL_NAME,
};
pub use weight::{CostModel, ImportFuncInfo, WeightCalculator};
