//! Time-series inputs and outputs: change-tracked typed cells and the
//! binding protocol that attaches consumers to producers.

pub mod common;
pub mod dict;
pub mod input;
pub mod output;
pub mod reference;
pub mod set;
pub mod window;

pub use common::NodeSubscribers;
pub use input::{Input, InputOwner};
pub use output::{Output, OutputOwner};
pub use reference::TimeSeriesReference;
