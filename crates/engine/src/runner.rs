//! Concurrent execution across hosts.
//!
//! A pool of worker threads drives the per-host execution instances. In
//! synchronous mode the runner proceeds in waves: every host still holding
//! work is handed to a worker for exactly one action, and the wave barrier
//! (joining the scoped workers) guarantees no host begins step N+1 before
//! every non-errored host finishes step N. A new wave is only admitted when
//! no instance has entered the error state. In asynchronous mode each worker
//! drains its instance to completion and hosts proceed independently.

use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use tracing::error;

use crate::instance::ExecutionInstance;

/// Runs every instance to completion (or error) with at most
/// `max_concurrent_hosts` hosts in flight.
pub fn run_group(instances: &mut [ExecutionInstance], sync_steps: bool, max_concurrent_hosts: usize) {
    loop {
        let any_pending = {
            let pending: Vec<&mut ExecutionInstance> =
                instances.iter_mut().filter(|instance| instance.has_more()).collect();
            if pending.is_empty() {
                false
            } else {
                let workers = max_concurrent_hosts.clamp(1, pending.len());
                let (sender, receiver) = mpsc::channel::<&mut ExecutionInstance>();
                let receiver = Mutex::new(receiver);

                thread::scope(|scope| {
                    for _ in 0..workers {
                        scope.spawn(|| loop {
                            let job = match receiver.lock() {
                                Ok(guard) => guard.recv(),
                                Err(_) => break,
                            };
                            let Ok(instance) = job else {
                                break;
                            };
                            if sync_steps {
                                step_once(instance);
                            } else {
                                while instance.has_more() {
                                    step_once(instance);
                                }
                            }
                        });
                    }

                    for instance in pending {
                        let _ = sender.send(instance);
                    }
                    drop(sender);
                });
                true
            }
        };
        if !any_pending {
            break;
        }

        // In sync mode an errored host poisons the whole run: no further
        // waves are admitted.
        if sync_steps && instances.iter().any(|instance| instance.error().is_some()) {
            break;
        }
    }
}

/// Advances one instance by exactly one leaf action.
fn step_once(instance: &mut ExecutionInstance) {
    let action = match instance.next() {
        Ok(Some(action)) => action,
        Ok(None) => return,
        Err(error) => {
            error!(host = %instance.host_ident(), "execution terminated due to error: {error}");
            instance.set_error(error);
            return;
        }
    };

    if let Err(error) = instance.execute(&action) {
        error!(host = %instance.host_ident(), "execution terminated due to error: {error}");
        instance.set_error(error);
    }
}
