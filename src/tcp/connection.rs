//! The per-connection coarse TCP state machine, grounded directly in
//! `examples/original_source/net/ip/tcp/connection.{h,cpp}`'s `process`
//! method -- the teacher's own TCP implementation is a full RFC9293 TCB
//! (`tcb.rs`), too detailed for the 6-state model this spec calls for.

use crate::address::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    ConnRequested,
    ConnEstablished,
    DataTransfer,
    Closing,
    Closed,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FromClient,
    FromServer,
}

impl Direction {
    fn other(self) -> Self {
        match self {
            Self::FromClient => Self::FromServer,
            Self::FromServer => Self::FromClient,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveCloser {
    Client,
    Server,
}

/// The 4-bit TCP control mask the state machine reacts to: SYN, ACK, FIN,
/// RST. All other control bits (URG, PSH) are irrelevant to connection
/// tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// A TCP transition this connection's current state does not recognize.
/// The connection is moved to [`State::Failure`]; the caller recycles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no transition for {flags:?} from {direction:?} while in {state:?}")]
pub struct Failure {
    pub state: State,
    pub direction: Direction,
    pub flags: Flags,
}

/// A tracked TCP connection between a client and a server.
#[derive(Debug, Clone)]
pub struct TcpConnection {
    pub id: u64,
    pub client: Endpoint,
    pub server: Endpoint,
    pub state: State,
    pub active_closer: Option<ActiveCloser>,
    active_closer_direction: Option<Direction>,
    pub creation_ts_us: u64,
    pub last_packet_ts_us: u64,
    pub client_packets: u64,
    pub server_packets: u64,
}

impl TcpConnection {
    pub fn new(id: u64, client: Endpoint, server: Endpoint, state: State, ts_us: u64) -> Self {
        Self {
            id,
            client,
            server,
            state,
            active_closer: None,
            active_closer_direction: None,
            creation_ts_us: ts_us,
            last_packet_ts_us: ts_us,
            client_packets: 0,
            server_packets: 0,
        }
    }

    /// Records a packet seen on `dir`, without running the state machine.
    /// Used for the initial packet that allocated this connection.
    pub fn touch(&mut self, dir: Direction, ts_us: u64) {
        self.last_packet_ts_us = ts_us;
        match dir {
            Direction::FromClient => self.client_packets += 1,
            Direction::FromServer => self.server_packets += 1,
        }
    }

    fn close(&mut self, dir: Direction, ts_us: u64) {
        self.state = State::Closed;
        self.active_closer = Some(match dir {
            Direction::FromClient => ActiveCloser::Client,
            Direction::FromServer => ActiveCloser::Server,
        });
        self.active_closer_direction = Some(dir);
        self.touch(dir, ts_us);
    }

    /// Advances the state machine per the table in §4.5, touching the
    /// connection's timestamp and per-direction packet count regardless of
    /// whether the transition keeps the state unchanged.
    pub fn process(&mut self, dir: Direction, flags: Flags, ts_us: u64, time_wait_s: u64) -> Result<(), Failure> {
        if flags.rst {
            self.close(dir, ts_us);
            return Ok(());
        }

        match self.state {
            State::ConnRequested => {
                if dir == Direction::FromServer && flags.syn && flags.ack {
                    self.state = State::ConnEstablished;
                } else if dir == Direction::FromClient && (flags.syn || flags.ack) && !flags.fin {
                    // retransmit of the initial SYN; state unchanged
                } else {
                    return self.fail(dir, flags, ts_us);
                }
            }
            State::ConnEstablished => {
                if dir == Direction::FromClient && flags.ack && !flags.syn && !flags.fin {
                    self.state = State::DataTransfer;
                } else if flags.syn {
                    // retransmitted SYN or SYN+ACK; state unchanged
                } else {
                    return self.fail(dir, flags, ts_us);
                }
            }
            State::DataTransfer => {
                if flags.fin {
                    self.state = State::Closing;
                    self.active_closer = Some(match dir {
                        Direction::FromClient => ActiveCloser::Client,
                        Direction::FromServer => ActiveCloser::Server,
                    });
                    self.active_closer_direction = Some(dir);
                } else if flags.ack && !flags.syn {
                    // unchanged
                } else if flags.syn
                    && ts_us.saturating_sub(self.creation_ts_us) <= time_wait_s * 1_000_000
                {
                    // retransmitted handshake segment within time_wait
                } else {
                    return self.fail(dir, flags, ts_us);
                }
            }
            State::Closing => {
                let closer_dir = self.active_closer_direction;
                if flags.fin && closer_dir == Some(dir.other()) {
                    self.state = State::Closed;
                } else if flags.ack {
                    // unchanged
                } else {
                    return self.fail(dir, flags, ts_us);
                }
            }
            State::Closed => {
                // any recognized flag leaves a closed connection closed
            }
            State::Failure => {}
        }

        self.touch(dir, ts_us);
        Ok(())
    }

    fn fail(&mut self, dir: Direction, flags: Flags, ts_us: u64) -> Result<(), Failure> {
        let failure = Failure { state: self.state, direction: dir, flags };
        self.state = State::Failure;
        self.touch(dir, ts_us);
        Err(failure)
    }
}
