//! Liveness watchdog and restart timer
//!
//! Two small timer sources that feed the control thread. The watchdog
//! ticks at 1 Hz for the whole life of the receiver; the control thread
//! decides on each tick whether the stream has stalled. The restart timer
//! is single-shot and carries a generation number so that a user `stop`
//! during the delay invalidates it.

use crate::pipeline::Command;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Watchdog poll interval.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Delay before a faulted pipeline is restarted.
pub const RESTART_DELAY: Duration = Duration::from_millis(1389);

/// Spawn the 1 Hz tick thread. It exits once the control thread is gone.
pub fn spawn_watchdog(commands: UnboundedSender<Command>) {
    thread::Builder::new()
        .name("videorx-watchdog".into())
        .spawn(move || loop {
            thread::sleep(POLL_INTERVAL);
            if commands.send(Command::WatchdogTick).is_err() {
                break;
            }
        })
        .expect("failed to spawn watchdog thread");
}

/// Arm the single-shot restart timer for the given fault generation.
pub fn schedule_restart(commands: UnboundedSender<Command>, generation: u64) {
    thread::Builder::new()
        .name("videorx-restart".into())
        .spawn(move || {
            thread::sleep(RESTART_DELAY);
            let _ = commands.send(Command::RestartTimeout { generation });
        })
        .expect("failed to spawn restart timer thread");
}
