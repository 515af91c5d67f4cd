pub mod design;
mod fir;
mod lms;

pub use fir::{FirFilter, FirState};
pub use lms::{AdaptiveOutput, LmsFilter, LmsState};
