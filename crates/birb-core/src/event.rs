use birb_proto::protocol::{Command, StreamDescriptor};

use crate::probe::ProbeVerdict;
use crate::task_pool::Completion;

/// All inputs into the engine loop.  Worker threads and subprocess readers
/// only ever produce these values; the loop is the sole writer of state.
#[derive(Debug)]
pub enum CoreEvent {
    /// A request from the front end.
    Command(Command),
    /// The fetch job of a refresh cycle finished.
    Fetched(Completion<Vec<StreamDescriptor>>),
    /// One health probe finished.  `ticket` is the entry index.
    Probed(Completion<ProbeVerdict>),
    /// The proxy printed its readiness marker.
    ProxyReady { launch: u64 },
    /// The proxy's output closed (the process is gone or going).
    ProxyExited { launch: u64 },
    Shutdown,
}
