//! End-to-end scenarios and boundary behaviors, driven through the public
//! API: `Engine::process_frame`/`purge` for whole-stack scenarios, and the
//! lower layers directly where a scenario is about one layer in isolation.

use flowtap_core::address::{Endpoint, IpAddress};
use flowtap_core::config::EngineConfig;
use flowtap_core::ip::fragment::{FragmentOutcome, FragmentReassembler};
use flowtap_core::ip::ipv4::{decode_ipv4, PACKET_MAX_LEN};
use flowtap_core::l4::L4Protocol;
use flowtap_core::l4::tcp_header::Control;
use flowtap_core::linklayer::LinkType;
use flowtap_core::tcp::connection::{Direction, Flags, State, TcpConnection};
use flowtap_core::tcp::seq;
use flowtap_core::tcp::table::ConnectionTable;
use flowtap_core::tcp::{StreamCallbacks, TcpStream};
use flowtap_core::Engine;

struct Recorder {
    payloads: Vec<(Vec<u8>, u64)>,
    gaps: Vec<(u32, u64)>,
    begun: usize,
    ended: usize,
}

impl Recorder {
    fn new() -> Self {
        Self { payloads: Vec::new(), gaps: Vec::new(), begun: 0, ended: 0 }
    }
}

impl StreamCallbacks for Recorder {
    type UserToken = ();

    fn begin_stream(&mut self, _conn: &TcpConnection, _dir: Direction) -> Option<()> {
        self.begun += 1;
        Some(())
    }

    fn on_payload(&mut self, _t: &mut (), _c: &TcpConnection, _d: Direction, bytes: &[u8], offset: u64) -> bool {
        self.payloads.push((bytes.to_vec(), offset));
        true
    }

    fn on_gap(&mut self, _t: &mut (), _c: &TcpConnection, _d: Direction, gap: u32, offset: u64) -> bool {
        self.gaps.push((gap, offset));
        true
    }

    fn end_stream(&mut self, _t: (), _c: &TcpConnection, _d: Direction) {
        self.ended += 1;
    }
}

const CLIENT_IP: [u8; 4] = [10, 0, 0, 1];
const SERVER_IP: [u8; 4] = [10, 0, 0, 2];

fn eth_tcp_frame(from_client: bool, seq_num: u32, ack: u32, control: Control, payload: &[u8]) -> Vec<u8> {
    let (src_ip, dst_ip, src_port, dst_port) =
        if from_client { (CLIENT_IP, SERVER_IP, 55000u16, 80u16) } else { (SERVER_IP, CLIENT_IP, 80u16, 55000u16) };

    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[4..8].copy_from_slice(&seq_num.to_be_bytes());
    tcp[8..12].copy_from_slice(&ack.to_be_bytes());
    tcp[12] = 5 << 4;
    tcp[13] = control.into();

    let total_len = 20 + 20 + payload.len();
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    ip[9] = L4Protocol::TCP;
    ip[12..16].copy_from_slice(&src_ip);
    ip[16..20].copy_from_slice(&dst_ip);

    let mut frame = vec![0u8; 14];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame.extend_from_slice(&ip);
    frame.extend_from_slice(&tcp);
    frame.extend_from_slice(payload);
    frame
}

fn small_config() -> EngineConfig {
    EngineConfig { hash_table_size: 256, max_connections: 16, ..EngineConfig::default() }
}

/// Scenario A -- simple TCP handshake + one-way data (spec §8).
#[test]
fn scenario_a_handshake_and_one_way_data() {
    let mut engine: Engine<Recorder> = Engine::new(LinkType::Ethernet, &small_config());
    let mut cb = Recorder::new();

    let syn = Control::new(false, false, false, false, true, false);
    let synack = Control::new(false, true, false, false, true, false);
    let ack = Control::new(false, true, false, false, false, false);
    let finack = Control::new(false, true, false, false, false, true);

    engine.process_frame(&eth_tcp_frame(true, 1000, 0, syn, &[]), 0, &mut cb);
    engine.process_frame(&eth_tcp_frame(false, 5000, 1001, synack, &[]), 1, &mut cb);
    engine.process_frame(&eth_tcp_frame(true, 1001, 5001, ack, &[]), 2, &mut cb);
    engine.process_frame(&eth_tcp_frame(true, 1001, 5001, ack, b"GET / HTTP/1.0\r\n\r\n"), 3, &mut cb);
    engine.process_frame(&eth_tcp_frame(true, 1019, 5001, finack, &[]), 4, &mut cb);
    engine.process_frame(&eth_tcp_frame(false, 5001, 1020, finack, &[]), 5, &mut cb);
    engine.process_frame(&eth_tcp_frame(true, 1020, 5002, ack, &[]), 6, &mut cb);

    assert_eq!(cb.payloads, vec![(b"GET / HTTP/1.0\r\n\r\n".to_vec(), 0)]);
    // One begin/end pair per direction.
    assert_eq!(cb.begun, 2);
    assert_eq!(cb.ended, 2);
    assert_eq!(engine.stats.connections_created, 1);
    assert_eq!(engine.stats.packets_dropped, 0);
}

/// Scenario B -- out-of-order delivery (spec §8), exercised directly at the
/// stream layer since it is specified in terms of queue depth, not frames.
#[test]
fn scenario_b_out_of_order_delivery_drains_once_the_gap_closes() {
    let conn = TcpConnection::new(0, Endpoint::new(IpAddress::v4(10, 0, 0, 1), 1), Endpoint::new(IpAddress::v4(10, 0, 0, 2), 2), State::DataTransfer, 0);
    let mut stream: TcpStream<()> = TcpStream::new();
    let mut cb = Recorder::new();

    let s1 = vec![1u8; 100];
    let s2 = vec![2u8; 100];
    let s3 = vec![3u8; 100];

    stream.insert(0, true, &[], &mut cb, &conn, Direction::FromClient, 10); // SYN seq=0, establishes next_expected = 1
    stream.insert(101, false, &s2, &mut cb, &conn, Direction::FromClient, 10);
    assert_eq!(stream.queued_segments(), 1);
    stream.insert(201, false, &s3, &mut cb, &conn, Direction::FromClient, 10);
    assert_eq!(stream.queued_segments(), 2);
    assert!(cb.payloads.is_empty());

    stream.insert(1, false, &s1, &mut cb, &conn, Direction::FromClient, 10);
    assert_eq!(stream.queued_segments(), 0);
    assert_eq!(cb.payloads, vec![(s1, 0), (s2, 100), (s3, 200)]);
}

/// Scenario C -- gap / loss (spec §8): S2 never arrives, so `terminate`
/// forces the gap open before delivering the queued S3 and ending the
/// stream.
#[test]
fn scenario_c_gap_then_terminate_flushes_queued_data() {
    let conn = TcpConnection::new(0, Endpoint::new(IpAddress::v4(10, 0, 0, 1), 1), Endpoint::new(IpAddress::v4(10, 0, 0, 2), 2), State::DataTransfer, 0);
    let mut stream: TcpStream<()> = TcpStream::new();
    let mut cb = Recorder::new();

    let s1 = vec![1u8; 100];
    let s3 = vec![3u8; 100];

    stream.insert(0, true, &[], &mut cb, &conn, Direction::FromClient, 10); // SYN seq=0, next_expected = 1
    stream.insert(1, false, &s1, &mut cb, &conn, Direction::FromClient, 10);
    stream.insert(201, false, &s3, &mut cb, &conn, Direction::FromClient, 10);
    assert_eq!(stream.queued_segments(), 1);
    assert_eq!(cb.payloads, vec![(s1, 0)]);

    stream.terminate(&mut cb, &conn, Direction::FromClient);

    assert_eq!(cb.gaps, vec![(100, 100)]);
    assert_eq!(cb.payloads, vec![(vec![1u8; 100], 0), (s3, 200)]);
    assert_eq!(cb.ended, 1);
}

/// Scenario D -- IPv4 fragmentation (spec §8): a 3000-byte UDP datagram
/// split into two fragments reassembles to one packet with the correct
/// length and concatenated payload.
#[test]
fn scenario_d_ipv4_fragmentation_rebuilds_one_packet() -> anyhow::Result<()> {
    let mut reassembler = FragmentReassembler::new(1024, 8192, 30);

    let udp_len = 3000 - 20;
    let frag_id = 7u16;
    let mut first = vec![0u8; 20 + 1480];
    first[0] = 0x45;
    first[2..4].copy_from_slice(&(20u16 + 1480).to_be_bytes());
    first[4..6].copy_from_slice(&frag_id.to_be_bytes());
    first[6..8].copy_from_slice(&0x2000u16.to_be_bytes()); // MF, offset 0
    first[9] = L4Protocol::UDP;
    first[12..16].copy_from_slice(&CLIENT_IP);
    first[16..20].copy_from_slice(&SERVER_IP);
    // UDP header lives in the first fragment's payload portion; its length
    // field covers the whole reassembled L4 span, not just this fragment.
    first[24..26].copy_from_slice(&(udp_len as u16).to_be_bytes());

    let second_payload_len = 3000 - 20 - 1480;
    let mut second = vec![0u8; 20 + second_payload_len];
    second[0] = 0x45;
    second[2..4].copy_from_slice(&(20 + second_payload_len as u16).to_be_bytes());
    second[4..6].copy_from_slice(&frag_id.to_be_bytes());
    second[6..8].copy_from_slice(&((1480u16 >> 3) & 0x1fff).to_be_bytes()); // no MF, offset 1480
    second[9] = L4Protocol::UDP;
    second[12..16].copy_from_slice(&CLIENT_IP);
    second[16..20].copy_from_slice(&SERVER_IP);

    anyhow::ensure!(decode_ipv4(&first, 0, &mut reassembler)?.is_none(), "first fragment alone must not complete the datagram");
    let packet = decode_ipv4(&second, 0, &mut reassembler)?.ok_or_else(|| anyhow::anyhow!("second fragment should complete reassembly"))?;

    assert_eq!(packet.ip_version, 4);
    assert_eq!(packet.l3_protocol, L4Protocol::Udp);
    assert_eq!(packet.payload_len(), udp_len - 8);
    assert_eq!(reassembler.completed_count(), 1);
    Ok(())
}

/// Scenario E -- IPv6 extension-header walk (spec §8): Hop-by-hop (8B) then
/// Routing (16B) then TCP must land the L3 offset at 40+8+16 = 64.
#[test]
fn scenario_e_ipv6_extension_header_walk_reaches_tcp() -> anyhow::Result<()> {
    const HOPOPTS: u8 = 0;
    const ROUTING: u8 = 43;

    let mut bytes = vec![0u8; 40];
    bytes[0] = 0x60;
    bytes[4..6].copy_from_slice(&(8u16 + 16 + 20).to_be_bytes());
    bytes[6] = HOPOPTS;

    bytes.extend([ROUTING, 0, 0, 0, 0, 0, 0, 0]); // hop-by-hop: next=ROUTING, len unit 0 -> 8 bytes
    bytes.extend([L4Protocol::TCP, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]); // routing: next=TCP, len unit 1 -> 16 bytes
    let tcp_offset = 40 + 8 + 16;
    let mut tcp = vec![0u8; 20];
    tcp[12] = 5 << 4;
    bytes.extend(tcp);

    let mut reassembler = FragmentReassembler::new(1024, 8192, 30);
    let packet = flowtap_core::ip::ipv6::decode_ipv6(&bytes, 0, &mut reassembler)?
        .ok_or_else(|| anyhow::anyhow!("unfragmented ipv6 packet should decode in one pass"))?;

    assert_eq!(packet.ip_version, 6);
    assert_eq!(packet.l3_protocol, L4Protocol::Tcp);
    assert_eq!(packet.ip_total_length, tcp_offset + 20);
    Ok(())
}

/// Scenario F -- connection expiry (spec §8): after a handshake and data,
/// `purge` past `idle_timeout` ends both streams and frees the slot.
#[test]
fn scenario_f_purge_after_idle_timeout_frees_the_connection() {
    let config = EngineConfig { hash_table_size: 256, max_connections: 16, idle_timeout_s: 5, ..EngineConfig::default() };
    let mut engine: Engine<Recorder> = Engine::new(LinkType::Ethernet, &config);
    let mut cb = Recorder::new();

    let syn = Control::new(false, false, false, false, true, false);
    let synack = Control::new(false, true, false, false, true, false);
    let ack = Control::new(false, true, false, false, false, false);

    engine.process_frame(&eth_tcp_frame(true, 1000, 0, syn, &[]), 0, &mut cb);
    engine.process_frame(&eth_tcp_frame(false, 5000, 1001, synack, &[]), 1, &mut cb);
    engine.process_frame(&eth_tcp_frame(true, 1001, 5001, ack, b"hi"), 1_000_000, &mut cb);

    assert_eq!(engine.tcp().connection_count(), 1);

    engine.purge(&mut cb, 1_000_000 + 6_000_000);

    assert_eq!(cb.ended, 2);
    assert_eq!(engine.tcp().connection_count(), 0);
    assert_eq!(engine.stats.connections_expired, 1);
}

/// Minimum IPv4 header (ihl=5, 20 bytes) is accepted; ihl=4 is rejected.
#[test]
fn boundary_ihl_four_is_rejected_ihl_five_is_accepted() {
    let mut reassembler = FragmentReassembler::new(16, 16, 30);

    let mut short_ihl = vec![0u8; 24];
    short_ihl[0] = 0x44; // version 4, ihl = 4 words = 16 bytes
    short_ihl[2..4].copy_from_slice(&24u16.to_be_bytes());
    short_ihl[9] = L4Protocol::UDP;
    assert!(decode_ipv4(&short_ihl, 0, &mut reassembler).is_err());

    let mut minimal = vec![0u8; 28];
    minimal[0] = 0x45;
    minimal[2..4].copy_from_slice(&28u16.to_be_bytes());
    minimal[9] = L4Protocol::UDP;
    minimal[24..26].copy_from_slice(&8u16.to_be_bytes()); // UDP length field
    assert!(decode_ipv4(&minimal, 0, &mut reassembler).is_ok());
}

/// Packet length of exactly `PACKET_MAX_LEN` is accepted; one byte more is
/// rejected outright (spec §8 boundary behaviors).
#[test]
fn boundary_packet_max_len_is_accepted_one_byte_more_is_rejected() {
    let mut reassembler = FragmentReassembler::new(16, 16, 30);

    let mut at_limit = vec![0u8; PACKET_MAX_LEN];
    at_limit[0] = 0x45;
    at_limit[2..4].copy_from_slice(&28u16.to_be_bytes());
    at_limit[9] = L4Protocol::UDP;
    at_limit[24..26].copy_from_slice(&8u16.to_be_bytes());
    assert!(decode_ipv4(&at_limit, 0, &mut reassembler).is_ok());

    let mut over_limit = vec![0u8; PACKET_MAX_LEN + 1];
    over_limit[0] = 0x45;
    over_limit[2..4].copy_from_slice(&28u16.to_be_bytes());
    over_limit[9] = L4Protocol::UDP;
    assert!(decode_ipv4(&over_limit, 0, &mut reassembler).is_err());
}

/// Sequence wrap: `less_than(2^32-10, 10) == true` (spec §8 invariant 5).
#[test]
fn boundary_sequence_wrap_compares_correctly() {
    let a: u32 = u32::MAX - 9;
    let b: u32 = 10;
    assert!(seq::less_than(a, b));
    assert!(!seq::less_than(b, a));
    assert!(seq::greater_than(b, a));
}

/// Hash commutativity (spec §8 invariant 6): a packet seen in either
/// direction of the same 4-tuple resolves to the same tracked connection.
#[test]
fn boundary_hash_is_commutative_across_packet_direction() -> anyhow::Result<()> {
    let mut table = ConnectionTable::new(256, 16, 7200, 120);
    let client = Endpoint::new(IpAddress::v4(10, 0, 0, 1), 4000);
    let server = Endpoint::new(IpAddress::v4(10, 0, 0, 2), 80);

    let syn = Flags { syn: true, ack: false, fin: false, rst: false };
    let (key_a, _) = table.process(client, server, syn, 0, &mut |_, _| {})?;

    let ack = Flags { syn: false, ack: true, fin: false, rst: false };
    // Same flow, reversed source/destination (a server-side reply).
    let (key_b, _) = table.process(server, client, ack, 1, &mut |_, _| {})?;

    assert_eq!(key_a, key_b);
    assert_eq!(table.len(), 1);
    Ok(())
}

/// Feeding a closed connection's FIN again leaves it in `Closed` (spec §8
/// round-trip law: `Closed -> Closed`).
#[test]
fn roundtrip_closed_connection_is_idempotent_under_a_repeated_fin() {
    let client = Endpoint::new(IpAddress::v4(10, 0, 0, 1), 1);
    let server = Endpoint::new(IpAddress::v4(10, 0, 0, 2), 2);
    let mut conn = TcpConnection::new(0, client, server, State::Closed, 0);

    let finack = Flags { syn: false, ack: true, fin: true, rst: false };
    let result = conn.process(Direction::FromClient, finack, 1, 120);

    assert!(result.is_ok());
    assert_eq!(conn.state, State::Closed);
}

/// Duplicate fragment insertion is idempotent (spec §8 round-trip law).
#[test]
fn roundtrip_duplicate_fragment_leaves_state_unchanged() {
    let mut reassembler = FragmentReassembler::new(16, 16, 30);
    let header = [0u8; 20];
    let first = reassembler.add(&header, 42, 0, 0, &[1u8; 50], false);
    assert!(matches!(first, FragmentOutcome::Incomplete));
    let second = reassembler.add(&header, 42, 0, 0, &[1u8; 50], false);
    assert!(matches!(second, FragmentOutcome::Duplicate));
}

