//! Background merge thread, one per open database.
//!
//! ```text
//!        ┌──────────────────────────────────────────┐
//!        v                                          │
//!   lock db ── closing or err? ──yes──> stopped     │
//!        │ no                                       │
//!   register in-flight, unlock                      │
//!        │                                          │
//!   merge_disk_segments ── Err ──> record err once  │
//!        │                                          │
//!   unregister, sleep(merge_interval) ──────────────┘
//! ```
//!
//! The thread holds only a `Weak` reference between cycles, so dropping the
//! last `Arc<Database>` also stops it.

use anyhow::{Context, Result};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crate::logging::LOG_TARGET;
use crate::Database;

pub(crate) fn spawn(db: &Arc<Database>) -> Result<JoinHandle<()>> {
    let weak = Arc::downgrade(db);
    thread::Builder::new()
        .name("strata-merge".to_string())
        .spawn(move || run(weak))
        .context("failed to spawn merge thread")
}

fn run(weak: Weak<Database>) {
    tracing::debug!(target: LOG_TARGET, "merge scheduler started");

    loop {
        let Some(db) = weak.upgrade() else {
            break;
        };

        // Registering under the database lock means close() either sees
        // this cycle in flight or this cycle sees `closing`.
        let in_flight = {
            let state = db.state.lock();
            if state.closing || state.err.is_some() {
                break;
            }
            match &state.tasks {
                Some(tasks) => tasks.clone(),
                None => break,
            }
        };

        if let Err(e) = db.merge_disk_segments(db.options().segment_count) {
            tracing::error!(target: LOG_TARGET, path = %db.path().display(), error = %format!("{:#}", e), "merge failed");
            db.record_error(e.context("unable to merge segments"));
        }

        drop(in_flight);
        let interval = db.options().merge_interval;
        drop(db);
        thread::sleep(interval);
    }

    tracing::debug!(target: LOG_TARGET, "merge scheduler stopped");
}
