//! Auto-coordination sessions: derive leases from working-tree changes.

mod change_detect;
mod coordinator;
mod process;
mod state;

pub use change_detect::{parse_porcelain_z, ChangeDetector, GitStatusDetector};
pub use coordinator::{AutoCoordinator, SessionOptions, SessionReport, TickSummary};
pub use process::{ChildProcess, WrappedProcess};
pub use state::{SessionState, TransitionError};
