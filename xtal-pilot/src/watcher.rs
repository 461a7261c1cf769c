//! Busy-indicator polling for background artifact generation.
//!
//! Report and prediction generation run outside the step lifecycle, so a
//! front-end cannot learn about them from step status changes. The
//! controller raises the step's [`AuxFlag`] around the work; a watcher
//! thread polls it and turns the transitions into events a display can
//! show as a busy indicator.

use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::tree::AuxFlag;

/// Busy-indicator transitions observed by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyEvent {
    /// The flag was seen raised; show the indicator.
    Began,
    /// The flag is clear; hide the indicator. Always the final event.
    Ended,
}

/// Poll `flag` every `interval` and report transitions on `events`.
///
/// The watcher ends after the first clear observation, which may come
/// before any `Began` if the generation already finished (or never
/// started). It carries no correctness weight; a dropped receiver just
/// stops it early.
pub fn spawn_busy_watcher(
    flag: AuxFlag,
    interval: Duration,
    events: Sender<BusyEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut began = false;
        loop {
            thread::sleep(interval);
            if flag.is_set() {
                if !began {
                    began = true;
                    debug!("background generation observed");
                    if events.send(BusyEvent::Began).is_err() {
                        return;
                    }
                }
            } else {
                debug!("background generation over");
                let _ = events.send(BusyEvent::Ended);
                return;
            }
        }
    })
}
