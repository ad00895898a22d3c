//! Pipe-wiring engine.
//!
//! A chain of any length is wired with at most two live pipes. Each stage gets the read
//! end parked by the previous stage and, unless it is the last one, the write end of a
//! fresh pipe whose read end is parked for the next stage. The two parking slots are
//! addressed by a [`Parity`] bit that flips on every stage after the first.
//!
//! Pipe ends are [`OwnedFd`]s: whatever the parent does not hand to a child is closed
//! when the [`StageWiring`] is dropped, which the dispatcher does right after the fork.

use crate::command::Position;
use crate::error::{ResourceOp, ShellError};
use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl};
use nix::libc;
use nix::unistd::{dup2, pipe2};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};

/// Write end of a pipe.
#[derive(Debug)]
pub struct Producer(OwnedFd);

/// Read end of a pipe.
#[derive(Debug)]
pub struct Consumer(OwnedFd);

/// A freshly created pipe, both ends still owned.
#[derive(Debug)]
pub struct PipeLink {
    consumer: Consumer,
    producer: Producer,
}

impl PipeLink {
    /// Creates a close-on-exec pipe; only ends explicitly duplicated onto a standard
    /// stream survive into an exec'd program.
    pub fn open() -> Result<Self, ShellError> {
        let (read, write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| ShellError::resource(ResourceOp::Pipe, e))?;
        Ok(Self {
            consumer: Consumer(read),
            producer: Producer(write),
        })
    }

    pub fn split(self) -> (Producer, Consumer) {
        (self.producer, self.consumer)
    }
}

impl AsFd for Producer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsFd for Consumer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl From<Producer> for OwnedFd {
    fn from(end: Producer) -> Self {
        end.0
    }
}

impl From<Consumer> for OwnedFd {
    fn from(end: Consumer) -> Self {
        end.0
    }
}

/// One of the two parking slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn toggle(self) -> Self {
        match self {
            Parity::Even => Parity::Odd,
            Parity::Odd => Parity::Even,
        }
    }

    fn index(self) -> usize {
        match self {
            Parity::Even => 0,
            Parity::Odd => 1,
        }
    }
}

/// Stream ends decided for one stage.
#[derive(Debug)]
pub struct StageWiring {
    pub position: Position,
    /// Becomes the stage's standard input.
    pub stdin: Option<Consumer>,
    /// Becomes the stage's standard output.
    pub stdout: Option<Producer>,
}

impl StageWiring {
    /// Child side: moves the ends onto fds 0 and 1 and closes the originals.
    pub fn connect(self) -> Result<(), ShellError> {
        if let Some(Consumer(fd)) = self.stdin {
            install_as(fd, libc::STDIN_FILENO)?;
        }
        if let Some(Producer(fd)) = self.stdout {
            install_as(fd, libc::STDOUT_FILENO)?;
        }
        Ok(())
    }

    /// Number of distinct pipes this wiring holds an end of.
    fn held(&self) -> usize {
        usize::from(self.stdin.is_some()) + usize::from(self.stdout.is_some())
    }
}

fn install_as(fd: OwnedFd, target: RawFd) -> Result<(), ShellError> {
    if fd.as_raw_fd() == target {
        // Already in place: keep it open across exec instead of closing it on drop.
        let raw = fd.into_raw_fd();
        fcntl(raw, FcntlArg::F_SETFD(FdFlag::empty()))
            .map_err(|e| ShellError::resource(ResourceOp::Dup, e))?;
        return Ok(());
    }
    dup2(fd.as_raw_fd(), target).map_err(|e| ShellError::resource(ResourceOp::Dup, e))?;
    Ok(())
}

/// Chain state carried from one stage to the next.
#[derive(Debug)]
pub struct PipeWiring {
    chain_active: bool,
    parity: Parity,
    slots: [Option<Consumer>; 2],
}

impl Default for PipeWiring {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeWiring {
    pub fn new() -> Self {
        Self {
            chain_active: false,
            parity: Parity::Even,
            slots: [None, None],
        }
    }

    pub fn chain_active(&self) -> bool {
        self.chain_active
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    /// Read ends currently parked for a following stage.
    pub fn parked(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Decides the ends for the next stage of the chain.
    pub fn wire_stage(&mut self, has_next: bool) -> Result<StageWiring, ShellError> {
        let wiring = match (self.chain_active, has_next) {
            (false, false) => StageWiring {
                position: Position::None,
                stdin: None,
                stdout: None,
            },
            (false, true) => {
                self.parity = Parity::Even;
                let (producer, consumer) = PipeLink::open()?.split();
                self.park(self.parity, consumer);
                self.chain_active = true;
                StageWiring {
                    position: Position::First,
                    stdin: None,
                    stdout: Some(producer),
                }
            }
            (true, true) => {
                let stdin = self.slots[self.parity.index()].take();
                let next = self.parity.toggle();
                let (producer, consumer) = PipeLink::open()?.split();
                self.park(next, consumer);
                self.parity = next;
                StageWiring {
                    position: Position::Middle,
                    stdin,
                    stdout: Some(producer),
                }
            }
            (true, false) => {
                let stdin = self.slots[self.parity.index()].take();
                self.parity = self.parity.toggle();
                self.chain_active = false;
                StageWiring {
                    position: Position::Last,
                    stdin,
                    stdout: None,
                }
            }
        };
        log::debug!(
            "wired {:?} stage, parity {:?}, {} parked",
            wiring.position,
            self.parity,
            self.parked()
        );
        Ok(wiring)
    }

    /// Closes every parked end and forgets the chain.
    ///
    /// Called in a forked child, which must not keep the read end meant for its
    /// successor, and by the parent when a line is abandoned half-way.
    pub fn release(&mut self) {
        self.slots = [None, None];
        self.chain_active = false;
        self.parity = Parity::Even;
    }

    fn park(&mut self, parity: Parity, consumer: Consumer) {
        debug_assert!(self.slots[parity.index()].is_none());
        self.slots[parity.index()] = Some(consumer);
    }

    /// Distinct pipes alive right after wiring a stage, counting the ends handed out.
    pub fn live_links(&self, wiring: &StageWiring) -> usize {
        // The handed-out write end belongs to the same pipe as the read end just parked.
        self.parked() + wiring.held() - usize::from(wiring.stdout.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};

    fn chain(len: usize) -> Vec<bool> {
        (0..len).map(|i| i + 1 < len).collect()
    }

    #[test]
    fn single_stage_creates_no_pipe() {
        let mut wiring = PipeWiring::new();
        let stage = wiring.wire_stage(false).unwrap();
        assert_eq!(stage.position, Position::None);
        assert!(stage.stdin.is_none() && stage.stdout.is_none());
        assert_eq!(wiring.parked(), 0);
        assert!(!wiring.chain_active());
    }

    #[test]
    fn positions_follow_the_table() {
        let mut wiring = PipeWiring::new();
        let positions: Vec<_> = chain(4)
            .into_iter()
            .map(|has_next| wiring.wire_stage(has_next).unwrap().position)
            .collect();
        assert_eq!(
            positions,
            vec![
                Position::First,
                Position::Middle,
                Position::Middle,
                Position::Last
            ]
        );
    }

    #[test]
    fn wiring_agrees_with_parsed_positions() {
        for len in 1..=6 {
            let mut wiring = PipeWiring::new();
            for (index, has_next) in chain(len).into_iter().enumerate() {
                let stage = wiring.wire_stage(has_next).unwrap();
                assert_eq!(stage.position, Position::in_chain(index, len), "chain of {len}");
            }
        }
    }

    #[test]
    fn parity_alternates_between_slots() {
        let mut wiring = PipeWiring::new();
        let _first = wiring.wire_stage(true).unwrap();
        assert_eq!(wiring.parity(), Parity::Even);
        let _second = wiring.wire_stage(true).unwrap();
        assert_eq!(wiring.parity(), Parity::Odd);
        let _third = wiring.wire_stage(true).unwrap();
        assert_eq!(wiring.parity(), Parity::Even);
    }

    #[test]
    fn never_more_than_two_live_pipes() {
        for len in 1..=9 {
            let mut wiring = PipeWiring::new();
            for has_next in chain(len) {
                let stage = wiring.wire_stage(has_next).unwrap();
                assert!(wiring.live_links(&stage) <= 2, "chain of {len}");
                assert!(wiring.parked() <= 1);
                drop(stage);
            }
            assert_eq!(wiring.parked(), 0, "chain of {len} left an end open");
            assert!(!wiring.chain_active());
        }
    }

    #[test]
    fn data_flows_through_a_three_stage_chain() {
        let mut wiring = PipeWiring::new();

        let first = wiring.wire_stage(true).unwrap();
        let mut out = File::from(OwnedFd::from(first.stdout.unwrap()));
        out.write_all(b"x\n").unwrap();
        drop(out);

        let middle = wiring.wire_stage(true).unwrap();
        let mut input = File::from(OwnedFd::from(middle.stdin.unwrap()));
        let mut relay = Vec::new();
        input.read_to_end(&mut relay).unwrap();
        let mut out = File::from(OwnedFd::from(middle.stdout.unwrap()));
        out.write_all(&relay).unwrap();
        drop(out);

        let last = wiring.wire_stage(false).unwrap();
        assert!(last.stdout.is_none());
        let mut input = File::from(OwnedFd::from(last.stdin.unwrap()));
        let mut received = String::new();
        input.read_to_string(&mut received).unwrap();
        assert_eq!(received, "x\n");
    }

    #[test]
    fn release_closes_parked_ends() {
        let mut wiring = PipeWiring::new();
        let first = wiring.wire_stage(true).unwrap();
        let mut out = File::from(OwnedFd::from(first.stdout.unwrap()));
        wiring.release();
        assert_eq!(wiring.parked(), 0);
        // Nobody reads any more.
        assert!(out.write_all(b"lost").is_err());
    }
}
