//! `sleep` (spec §5.10): block the caller for a millisecond duration, converted to PIT ticks.

use crate::process::scheduler;

/// Approximate tick length. The PIT divisor is never reprogrammed (inherited from the
/// teacher, which also runs the timer at the legacy default rate), so this is a rough
/// mapping rather than an exact one — good enough for a cooperative `sleep()`.
const MS_PER_TICK: u64 = 10;

pub fn sys_sleep(ms: u64) -> u64 {
    let ticks_to_wait = core::cmp::max(1, ms / MS_PER_TICK);
    let deadline = scheduler::ticks() + ticks_to_wait;
    while scheduler::ticks() < deadline {
        scheduler::yield_now();
    }
    0
}
