use std::{
    sync::mpsc,
    time::{Duration, Instant},
};

use log::*;

use super::{BlameError, BlameEvent, BlameInfo, BlameProcess, CommitInfo};

/// Accumulates `BlameEvent`s into a `BlameInfo`.
#[derive(Debug, Default)]
pub struct BlameInfoBuilder {
    info: BlameInfo,
}

impl BlameInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the metadata of the commit.
    pub fn add_commit(&mut self, hash: String, info: CommitInfo) {
        self.info.commits.insert(hash, info);
    }

    /// Add or replace the commit of the line.
    /// The commit doesn't have to be added yet.
    pub fn add_line(&mut self, line_number: usize, hash: String) {
        self.info.lines.insert(line_number, hash);
    }

    /// Returns the result if `event` is the end of the stream.
    pub fn push(&mut self, event: BlameEvent) -> Option<Result<(), BlameError>> {
        match event {
            BlameEvent::Commit { hash, info } => self.add_commit(hash, info),
            BlameEvent::Line { line_number, hash } => self.add_line(line_number, hash),
            BlameEvent::End(result) => return Some(result),
        }
        None
    }

    /// Finish building.
    /// If the stream ended with an error, the accumulated state is discarded.
    pub fn finish(self, end: Result<(), BlameError>) -> Result<BlameInfo, BlameError> {
        end.map(|()| self.info)
    }

    /// Receive all events of one computation from `rx`, and finish building.
    ///
    /// If the `timeout` elapses before the end of the stream,
    /// `process` is terminated and this fails with `BlameError::Timeout`.
    pub fn receive(
        mut self,
        rx: &mpsc::Receiver<BlameEvent>,
        timeout: Option<Duration>,
        process: &dyn BlameProcess,
    ) -> Result<BlameInfo, BlameError> {
        let start_time = Instant::now();
        let deadline = timeout.map(|timeout| start_time + timeout);
        let mut count = 0;
        let end = loop {
            let event = match deadline {
                Some(deadline) => {
                    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(event) => event,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            process.terminate();
                            break Err(BlameError::Timeout(start_time.elapsed()));
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => {
                            break Err(BlameError::StreamClosed);
                        }
                    }
                }
                None => match rx.recv() {
                    Ok(event) => event,
                    Err(mpsc::RecvError) => break Err(BlameError::StreamClosed),
                },
            };
            count += 1;
            if let Some(end) = self.push(event) {
                break end;
            }
        };
        debug!(
            "receive: {count} events, {} lines, {} commits, {:?}",
            self.info.lines.len(),
            self.info.commits.len(),
            start_time.elapsed()
        );
        self.finish(end)
    }
}
