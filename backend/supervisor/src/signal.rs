//! Signal escalation for worker processes: SIGTERM first, SIGKILL after grace.

use tokio::process::Child;
use tracing::{debug, warn};

/// Ask a child to stop. On unix this sends SIGTERM; elsewhere there is no
/// polite signal, so the child is killed outright.
pub fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        debug!("Child already reaped, nothing to signal");
        return;
    };

    #[cfg(unix)]
    {
        let rc = unsafe { kill(pid as libc_pid_t, SIGTERM) };
        if rc != 0 {
            warn!(pid, "SIGTERM delivery failed");
        } else {
            debug!(pid, "Sent SIGTERM");
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            warn!(pid, error = %e, "Failed to kill worker");
        }
    }
}

#[cfg(unix)]
const SIGTERM: libc_c_int = 15;

#[cfg(unix)]
extern "C" {
    fn kill(pid: libc_pid_t, sig: libc_c_int) -> libc_c_int;
}

#[cfg(unix)]
#[allow(non_camel_case_types)]
type libc_pid_t = i32;
#[cfg(unix)]
#[allow(non_camel_case_types)]
type libc_c_int = i32;
