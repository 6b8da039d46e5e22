//! Ties the connection table to a pair of stream reassemblers per
//! connection, per §4.6's "Parallel slot indexing": each connection's slab
//! key addresses two stream slots, `key*2` for the client-to-server
//! direction and `key*2+1` for the reverse, in a flat `Vec` sized
//! `2 * max_connections`. Because the slab key space is itself bounded by
//! `max_connections` and never grows past it, the slot vector is allocated
//! once and never resized.

use crate::address::Endpoint;
use crate::config::EngineConfig;
use crate::l4::tcp_header::{TcpError, TcpHeader};
use crate::l4::L4Protocol;
use crate::packet::PacketRecord;
use crate::slab::Key;
use thiserror::Error;

use super::connection::{Direction, Flags, TcpConnection};
use super::stream::{StreamCallbacks, TcpStream};
use super::table::{ConnectionTable, TableError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Tcp(#[from] TcpError),
    #[error("packet is not a TCP segment")]
    NotTcp,
}

/// Tracks every TCP connection in flight and reassembles both of its byte
/// streams, dispatching to a caller-supplied [`StreamCallbacks`].
pub struct TcpEngine<C: StreamCallbacks> {
    table: ConnectionTable,
    streams: Vec<Option<TcpStream<C::UserToken>>>,
    max_queued_segments_per_stream: usize,
    time_wait_s: u64,
}

fn dir_slot(dir: Direction) -> usize {
    match dir {
        Direction::FromClient => 0,
        Direction::FromServer => 1,
    }
}

fn slot_index(key: Key, dir: Direction) -> usize {
    key * 2 + dir_slot(dir)
}

impl<C: StreamCallbacks> TcpEngine<C> {
    pub fn new(config: &EngineConfig) -> Self {
        let max_connections = config.max_connections;
        let mut streams = Vec::with_capacity(max_connections * 2);
        streams.resize_with(max_connections * 2, || None);
        Self {
            table: ConnectionTable::new(
                config.hash_table_size,
                max_connections,
                config.idle_timeout_s,
                config.time_wait_s,
            ),
            streams,
            max_queued_segments_per_stream: config.max_queued_segments_per_stream,
            time_wait_s: config.time_wait_s,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    pub fn connection(&self, key: Key) -> Option<&TcpConnection> {
        self.table.get(key)
    }

    /// Feeds one decoded TCP packet through connection tracking and stream
    /// reassembly, invoking `callbacks` for any payload, gap, or
    /// stream-boundary events it produces.
    pub fn handle_packet(
        &mut self,
        callbacks: &mut C,
        packet: &PacketRecord,
        ts_us: u64,
    ) -> Result<(), EngineError> {
        if packet.l3_protocol != L4Protocol::Tcp {
            return Err(EngineError::NotTcp);
        }
        let header = TcpHeader::from_bytes(packet.l4_header())?;
        let (src_addr, dst_addr) = packet.addresses();
        let src = Endpoint::new(src_addr, header.src_port);
        let dst = Endpoint::new(dst_addr, header.dst_port);
        let flags = Flags {
            syn: header.control.syn(),
            ack: header.control.ack(),
            fin: header.control.fin(),
            rst: header.control.rst(),
        };

        let streams = &mut self.streams;
        let (key, dir) = self.table.process(src, dst, flags, ts_us, &mut |key, conn| {
            evict_streams(streams, callbacks, key, conn);
        })?;

        let conn = self.table.get_mut(key).expect("key just returned by process");
        let fsm_result = conn.process(dir, flags, ts_us, self.time_wait_s);
        let conn = self.table.get(key).expect("connection still present").clone();

        if fsm_result.is_err() {
            evict_streams(&mut self.streams, callbacks, key, &conn);
            return Ok(());
        }

        let idx = slot_index(key, dir);
        let stream = self.streams[idx].get_or_insert_with(TcpStream::new);
        stream.insert(
            header.sequence,
            header.control.syn(),
            packet.payload(),
            callbacks,
            &conn,
            dir,
            self.max_queued_segments_per_stream,
        );

        if matches!(conn.state, super::connection::State::Closed) {
            evict_streams(&mut self.streams, callbacks, key, &conn);
        }

        Ok(())
    }

    /// Evicts every time-waited or idle-expired connection, tearing down its
    /// stream reassemblers first. Returns the number of connections removed.
    pub fn purge(&mut self, callbacks: &mut C, now_us: u64) -> usize {
        let streams = &mut self.streams;
        self.table.purge(now_us, &mut |key, conn| {
            evict_streams(streams, callbacks, key, conn);
        })
    }
}

fn evict_streams<C: StreamCallbacks>(
    streams: &mut [Option<TcpStream<C::UserToken>>],
    callbacks: &mut C,
    key: Key,
    conn: &TcpConnection,
) {
    for dir in [Direction::FromClient, Direction::FromServer] {
        let idx = slot_index(key, dir);
        if let Some(stream) = streams[idx].as_mut() {
            stream.terminate(callbacks, conn, dir);
        }
        streams[idx] = None;
    }
}
