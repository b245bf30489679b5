#[allow(clippy::module_inception)]
pub(crate) mod simulate;
pub(crate) use simulate::*;

pub(crate) mod workload;
