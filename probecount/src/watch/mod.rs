#[allow(clippy::module_inception)]
pub(crate) mod watch;
pub(crate) use watch::*;
