// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Event loop and per-event hydration
//!
//! Each iteration reads one batch from the notification group and answers
//! every record in it before reading the next. The kernel keeps the faulting
//! caller blocked until its record is answered, so every record that passes
//! validation gets exactly one response, allow or deny, whatever happens while
//! hydrating it. The event descriptor is closed after the response is written.

use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::completion::CompletionTracker;
use crate::config::DaemonConfig;
use crate::copy::{CopyEngine, CopyPrimitives, KernelPrimitives};
use crate::error::{DaemonError, EventError, ProtocolError, SetupError};
use crate::fanotify::{Fanotify, MarkControl, NotificationSource};
use crate::marks::install_marks;
use crate::paths::PathMapper;
use crate::proto::{EventRecords, RangeInfo, RawEvent, Response};
use crate::range::CopyWindow;

/// What happened to one event that was allowed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The hint asked for zero bytes, or the file is empty and not yet complete
    NothingRequested,
    /// The file was unwatched by an earlier event
    AlreadyInactive(PathBuf),
    /// The destination already had the source's allocation
    Complete(PathBuf),
    /// Bytes were copied; `complete` reports whether that finished the file
    Copied {
        rel: PathBuf,
        window: CopyWindow,
        copied: u64,
        complete: bool,
    },
}

/// Everything needed to hydrate one file for one event
#[derive(Debug)]
pub struct Hydrator<P> {
    mapper: PathMapper,
    page_size: u64,
    engine: CopyEngine<P>,
    tracker: CompletionTracker,
}

impl<P: CopyPrimitives> Hydrator<P> {
    pub fn new(
        mapper: PathMapper,
        page_size: u64,
        engine: CopyEngine<P>,
        tracker: CompletionTracker,
    ) -> Self {
        Self {
            mapper,
            page_size,
            engine,
            tracker,
        }
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn engine(&self) -> &CopyEngine<P> {
        &self.engine
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut CompletionTracker {
        &mut self.tracker
    }

    /// Make the requested range of `dst` match the source
    pub fn hydrate<M: MarkControl>(
        &mut self,
        dst: &File,
        range: Option<RangeInfo>,
        marks: &mut M,
    ) -> Result<Outcome, EventError> {
        let (offset, count) = match range {
            Some(range) if range.count == 0 => return Ok(Outcome::NothingRequested),
            Some(range) => (range.offset, u64::from(range.count)),
            None => {
                let size = dst
                    .metadata()
                    .map_err(|source| EventError::Stat {
                        what: "destination",
                        source,
                    })?
                    .len();
                (0, size)
            }
        };

        let rel = self.mapper.relative_path(dst.as_raw_fd())?;
        if self.tracker.is_inactive(&rel) {
            debug!(relpath = %rel.display(), "event for an unwatched file");
            return Ok(Outcome::AlreadyInactive(rel));
        }

        let src_path = self.mapper.source_path(&rel);
        let dst_path = self.mapper.destination_path(&rel);
        let src = File::open(&src_path).map_err(|source| EventError::OpenSource {
            path: src_path.clone(),
            source,
        })?;

        if self.tracker.check(&rel, &dst_path, &src, dst, marks)? {
            return Ok(Outcome::Complete(rel));
        }
        // Empty file that is not complete yet: nothing to copy
        if count == 0 {
            return Ok(Outcome::NothingRequested);
        }

        let window = CopyWindow::aligned(offset, count, self.page_size);
        debug!(
            operation = "hydrate",
            relpath = %rel.display(),
            offset,
            count,
            window_offset = window.offset,
            window_len = window.len,
            "copying range"
        );
        let report = self.engine.copy_range(&src, dst, window)?;
        // The requested bytes are in place; a failed re-check only delays unwatching
        let complete = match self.tracker.check(&rel, &dst_path, &src, dst, marks) {
            Ok(complete) => complete,
            Err(err) => {
                warn!(relpath = %rel.display(), error = %err, "completion re-check failed");
                false
            }
        };

        Ok(Outcome::Copied {
            rel,
            window,
            copied: report.copied,
            complete,
        })
    }

    /// Hydrate and turn the result into the response for `event`
    pub fn decide<M: MarkControl>(&mut self, event: &RawEvent, dst: &File, marks: &mut M) -> Response {
        match self.hydrate(dst, event.range, marks) {
            Ok(outcome) => {
                debug!(fd = event.fd, pid = event.pid, ?outcome, "allowing access");
                Response::allow(event.fd)
            }
            Err(err) => {
                let errno = err.errno();
                warn!(fd = event.fd, pid = event.pid, errno, error = %err, "denying access");
                Response::deny(event.fd, errno)
            }
        }
    }
}

/// Reads, dispatches and answers notification batches
pub struct EventLoop<G, P> {
    group: G,
    hydrator: Hydrator<P>,
    buf: Vec<u8>,
}

impl<G, P> EventLoop<G, P>
where
    G: NotificationSource + MarkControl,
    P: CopyPrimitives,
{
    pub fn new(group: G, hydrator: Hydrator<P>, batch_bytes: usize) -> Self {
        Self {
            group,
            hydrator,
            buf: vec![0u8; batch_bytes],
        }
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut G {
        &mut self.group
    }

    pub fn hydrator(&self) -> &Hydrator<P> {
        &self.hydrator
    }

    /// Read one batch and answer every record in it
    ///
    /// Returns the number of records answered.
    pub fn process_batch(&mut self) -> Result<usize, ProtocolError> {
        let len = self.group.read_batch(&mut self.buf).map_err(ProtocolError::Read)?;
        let mut answered = 0;

        for record in EventRecords::new(&self.buf[..len]) {
            let event = record?;
            // SAFETY: the kernel opened this descriptor for us and nothing else owns it
            let dst = unsafe { File::from_raw_fd(event.fd) };

            let response = self.hydrator.decide(&event, &dst, &mut self.group);
            self.group.respond(response).map_err(ProtocolError::Respond)?;
            drop(dst);
            answered += 1;
        }

        Ok(answered)
    }

    /// Answer batches until the group fails or the kernel breaks protocol
    pub fn run(&mut self) -> Result<(), ProtocolError> {
        loop {
            self.process_batch()?;
        }
    }
}

/// Create the notification group, mark the destination tree and build the loop
pub fn start(config: &DaemonConfig) -> Result<EventLoop<Fanotify, KernelPrimitives>, SetupError> {
    let mut group = Fanotify::init().map_err(SetupError::NotificationGroup)?;

    let mut tracker = CompletionTracker::new();
    install_marks(&config.destination_root, &mut group, &mut tracker)?;

    let hydrator = Hydrator::new(
        PathMapper::new(&config.source_root, &config.destination_root),
        config.page_size,
        CopyEngine::new(KernelPrimitives),
        tracker,
    );
    Ok(EventLoop::new(group, hydrator, config.batch_bytes()))
}

/// Run the daemon until a fatal error
pub fn run(config: &DaemonConfig) -> Result<(), DaemonError> {
    info!(
        source = %config.source_root.display(),
        destination = %config.destination_root.display(),
        page_size = config.page_size,
        "starting hydration daemon"
    );
    let mut event_loop = start(config)?;
    info!(watched = event_loop.hydrator().tracker().len(), "waiting for events");
    event_loop.run()?;
    Ok(())
}
