//! Dedicated thread that ticks the console
//!
//! Runs at a fixed interval (25ms by default) on its own thread so loop
//! scheduling and sync ramps never depend on the host's event loop. Ticks are
//! paced against absolute deadlines; a late tick is run immediately and the
//! schedule resumes from the current time rather than bursting to catch up.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use super::console::Console;

/// Owner of the control thread; stops and joins it on drop
pub struct ControlThread {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ControlThread {
    pub fn spawn(console: Arc<Mutex<Console>>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let interval = interval.max(Duration::from_millis(1));

        let handle = thread::Builder::new()
            .name("loopmix-control".to_string())
            .spawn(move || {
                log::info!("Control thread started ({:?} ticks)", interval);
                let mut deadline = Instant::now();
                loop {
                    match console.lock() {
                        Ok(mut console) => console.tick(),
                        Err(_) => {
                            log::error!("Console lock poisoned, control thread exiting");
                            break;
                        }
                    }

                    deadline += interval;
                    let now = Instant::now();
                    if deadline < now {
                        log::debug!("Control tick overran by {:?}", now - deadline);
                        deadline = now;
                    }

                    match stop_rx.recv_timeout(deadline - now) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("Control thread stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop ticking and wait for the thread to exit
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Control thread panicked");
            }
        }
    }
}

impl Drop for ControlThread {
    fn drop(&mut self) {
        self.stop();
    }
}
