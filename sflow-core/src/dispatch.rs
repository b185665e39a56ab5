//! Message dispatch: turns one decoded frame into exactly one reply frame,
//! touching the routing table, stats, and clock as each message type
//! requires.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use std::time::Duration;

use crate::clock::Clock;
use crate::net::frame::FrameHeader;
use crate::routing::{RouteEntry, RoutingTable, UpsertOutcome};
use crate::stats::Stats;

pub const MSG_PING: u8 = 1;
pub const MSG_PONG: u8 = 2;
pub const MSG_ECHO: u8 = 3;
pub const MSG_ECHO_REPLY: u8 = 4;
pub const MSG_GET_STATS: u8 = 5;
pub const MSG_STATS_REPLY: u8 = 6;
pub const MSG_ROUTE_UPDATE: u8 = 7;
pub const MSG_ROUTE_ACK: u8 = 8;
pub const MSG_ROUTE_LOOKUP: u8 = 9;
pub const MSG_ROUTE_REPLY: u8 = 10;
pub const MSG_ERROR: u8 = 255;

/// Echoed payloads longer than this are truncated, per PING/ECHO semantics.
const ECHO_TRUNCATE_LEN: usize = 2048;
/// Bytes per ROUTE_UPDATE record.
const ROUTE_UPDATE_RECORD_LEN: usize = 16;
/// Bytes in a ROUTE_LOOKUP request payload (an IPv4 address).
const ROUTE_LOOKUP_REQUEST_LEN: usize = 4;

/// The reply a dispatched request produces: a message type plus the bytes
/// of its payload, ready to hand to `frame::encode`.
pub struct Reply {
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

impl Reply {
    #[inline]
    fn new(msg_type: u8, payload: Vec<u8>) -> Reply {
        Reply { msg_type, payload }
    }
}

/// Dispatches one decoded frame, mutating `routing` and `stats` as the
/// message type requires, and returns the reply to send back.
///
/// Per the stats-ordering rule, `GET_STATS` snapshots `stats` *before* this
/// request's own latency sample is folded in — so a stats request reports
/// the state prior to itself. Every branch still records exactly one
/// latency sample via `stats.record_request`, via the single call at the
/// bottom of this function.
pub fn dispatch(
    header: &FrameHeader,
    payload: &[u8],
    routing: &mut RoutingTable,
    stats: &mut Stats,
    clock: &Clock,
    request_started: std::time::Instant,
) -> Reply {
    let reply = match header.msg_type {
        MSG_PING => Reply::new(MSG_PONG, truncate_echo(payload)),
        MSG_ECHO => Reply::new(MSG_ECHO_REPLY, truncate_echo(payload)),
        MSG_GET_STATS => Reply::new(MSG_STATS_REPLY, build_stats_reply(stats, clock)),
        MSG_ROUTE_UPDATE => {
            let (ack_payload, installed) = handle_route_update(payload, routing, clock);
            stats.record_routes_installed(u64::from(installed));
            Reply::new(MSG_ROUTE_ACK, ack_payload)
        }
        MSG_ROUTE_LOOKUP => handle_route_lookup(payload, routing),
        _ => Reply::new(MSG_ERROR, b"unknown message type".to_vec()),
    };

    stats.record_request(request_started.elapsed());
    reply
}

#[inline]
fn truncate_echo(payload: &[u8]) -> Vec<u8> {
    let len = payload.len().min(ECHO_TRUNCATE_LEN);
    payload[..len].to_vec()
}

/// 40 bytes: total_requests, bad_frames, routes_installed, uptime_ms (all
/// u64), last_latency_us, avg_latency_us (both u32).
fn build_stats_reply(stats: &Stats, clock: &Clock) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    out.write_u64::<BigEndian>(stats.total_requests()).expect("Vec writes never fail");
    out.write_u64::<BigEndian>(stats.bad_frames()).expect("Vec writes never fail");
    out.write_u64::<BigEndian>(stats.routes_installed()).expect("Vec writes never fail");
    out.write_u64::<BigEndian>(clock.uptime_ms()).expect("Vec writes never fail");
    out.write_u32::<BigEndian>(stats.last_latency_us()).expect("Vec writes never fail");
    out.write_u32::<BigEndian>(stats.avg_latency_us()).expect("Vec writes never fail");
    out
}

/// Parses 16-byte records (prefix u32, mask_bits u8, reserved u8, metric
/// u16, next_hop u32, reserved u32), upserting each; trailing bytes that
/// don't fill a whole record are ignored. Returns the 4-byte ACK payload
/// plus the count of records whose upsert returned `Ok`.
fn handle_route_update(payload: &[u8], routing: &mut RoutingTable, clock: &Clock) -> (Vec<u8>, u32) {
    let mut installed: u32 = 0;
    let last_updated = clock.uptime_ms() as u32 as u64;

    for record in payload.chunks(ROUTE_UPDATE_RECORD_LEN) {
        if record.len() < ROUTE_UPDATE_RECORD_LEN {
            break;
        }

        let mut cursor = Cursor::new(record);
        let prefix = cursor.read_u32::<BigEndian>().expect("record is 16 bytes");
        let mask_bits = cursor.read_u8().expect("record is 16 bytes");
        let _reserved = cursor.read_u8().expect("record is 16 bytes");
        let metric = cursor.read_u16::<BigEndian>().expect("record is 16 bytes");
        let next_hop = cursor.read_u32::<BigEndian>().expect("record is 16 bytes");

        let entry = RouteEntry { prefix, mask_bits, metric, next_hop, last_updated };
        if routing.upsert(entry) == UpsertOutcome::Ok {
            installed += 1;
        }
    }

    let mut out = Vec::with_capacity(4);
    out.write_u32::<BigEndian>(installed).expect("Vec writes never fail");
    (out, installed)
}

/// Payload must be at least 4 bytes (an IPv4 address, network byte order);
/// otherwise replies with an ERROR carrying `"bad payload"`. On a miss,
/// replies with `mask_bits=0, metric=0xFFFF, next_hop=0`.
fn handle_route_lookup(payload: &[u8], routing: &RoutingTable) -> Reply {
    if payload.len() < ROUTE_LOOKUP_REQUEST_LEN {
        return Reply::new(MSG_ERROR, b"bad payload".to_vec());
    }

    let ip = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);

    let (mask_bits, metric, next_hop) = match routing.lookup(ip) {
        Some(entry) => (entry.mask_bits, entry.metric, entry.next_hop),
        None => (0, 0xFFFF, 0),
    };

    let mut out = Vec::with_capacity(8);
    out.write_u8(mask_bits).expect("Vec writes never fail");
    out.write_u8(0).expect("Vec writes never fail"); // reserved
    out.write_u16::<BigEndian>(metric).expect("Vec writes never fail");
    out.write_u32::<BigEndian>(next_hop).expect("Vec writes never fail");

    Reply::new(MSG_ROUTE_REPLY, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn header(msg_type: u8) -> FrameHeader {
        FrameHeader { version: 1, msg_type, flags: 0, seq: 1, payload_len: 0, payload_crc: 0 }
    }

    fn ipv4(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from_be_bytes([a, b, c, d])
    }

    fn route_record(prefix: u32, mask_bits: u8, metric: u16, next_hop: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.write_u32::<BigEndian>(prefix).unwrap();
        out.write_u8(mask_bits).unwrap();
        out.write_u8(0).unwrap();
        out.write_u16::<BigEndian>(metric).unwrap();
        out.write_u32::<BigEndian>(next_hop).unwrap();
        out.write_u32::<BigEndian>(0).unwrap();
        out
    }

    #[test]
    fn ping_echoes_payload_as_pong() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let reply = dispatch(&header(MSG_PING), b"hello", &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.msg_type, MSG_PONG);
        assert_eq!(reply.payload, b"hello");
        assert_eq!(stats.total_requests(), 1);
    }

    #[test]
    fn ping_payload_over_2048_bytes_is_truncated() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let payload = vec![0xABu8; 3000];
        let reply = dispatch(&header(MSG_PING), &payload, &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.payload.len(), ECHO_TRUNCATE_LEN);
    }

    #[test]
    fn echo_mirrors_ping_behavior() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let reply = dispatch(&header(MSG_ECHO), b"ping-ping", &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.msg_type, MSG_ECHO_REPLY);
        assert_eq!(reply.payload, b"ping-ping");
    }

    #[test]
    fn get_stats_reports_state_prior_to_itself() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        dispatch(&header(MSG_PING), b"x", &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(stats.total_requests(), 1);

        let reply = dispatch(&header(MSG_GET_STATS), &[], &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.msg_type, MSG_STATS_REPLY);
        assert_eq!(reply.payload.len(), 40);

        let mut cursor = Cursor::new(&reply.payload[..]);
        let total_requests = cursor.read_u64::<BigEndian>().unwrap();
        // The GET_STATS request itself has not yet been counted when the
        // reply payload was built.
        assert_eq!(total_requests, 1);
        assert_eq!(stats.total_requests(), 2);
    }

    #[test]
    fn scenario_c_route_update_installs_two_records() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let mut payload = Vec::new();
        payload.extend(route_record(ipv4(10, 0, 0, 0), 8, 10, ipv4(10, 0, 0, 1)));
        payload.extend(route_record(ipv4(10, 1, 0, 0), 16, 5, ipv4(10, 1, 0, 1)));

        let reply =
            dispatch(&header(MSG_ROUTE_UPDATE), &payload, &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.msg_type, MSG_ROUTE_ACK);
        assert_eq!(reply.payload, vec![0x00, 0x00, 0x00, 0x02]);
        assert_eq!(stats.routes_installed(), 2);
        assert_eq!(routing.count(), 2);
    }

    #[test]
    fn route_update_trailing_short_bytes_are_ignored() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let mut payload = route_record(ipv4(1, 2, 3, 0), 24, 0, ipv4(1, 2, 3, 1));
        payload.extend([0xFF; 5]); // short trailing garbage, < 16 bytes

        let reply =
            dispatch(&header(MSG_ROUTE_UPDATE), &payload, &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.payload, vec![0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn route_update_full_table_drops_records_silently() {
        let mut routing = RoutingTable::new(1);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let mut payload = Vec::new();
        payload.extend(route_record(ipv4(1, 0, 0, 0), 8, 0, ipv4(1, 0, 0, 1)));
        payload.extend(route_record(ipv4(2, 0, 0, 0), 8, 0, ipv4(2, 0, 0, 1)));

        let reply =
            dispatch(&header(MSG_ROUTE_UPDATE), &payload, &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.payload, vec![0x00, 0x00, 0x00, 0x01]);
        assert_eq!(routing.count(), 1);
    }

    #[test]
    fn scenario_d_route_lookup_hit() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        routing.upsert(RouteEntry {
            prefix: ipv4(10, 0, 0, 0),
            mask_bits: 8,
            metric: 10,
            next_hop: ipv4(10, 0, 0, 1),
            last_updated: 0,
        });
        routing.upsert(RouteEntry {
            prefix: ipv4(10, 1, 0, 0),
            mask_bits: 16,
            metric: 5,
            next_hop: ipv4(10, 1, 0, 1),
            last_updated: 0,
        });

        let payload = vec![0x0A, 0x01, 0x02, 0x03];
        let reply =
            dispatch(&header(MSG_ROUTE_LOOKUP), &payload, &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.msg_type, MSG_ROUTE_REPLY);
        assert_eq!(reply.payload, vec![0x10, 0x00, 0x00, 0x05, 0x0A, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn route_lookup_miss_returns_sentinel_reply() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let payload = vec![0xC0, 0xA8, 0x00, 0x01];
        let reply =
            dispatch(&header(MSG_ROUTE_LOOKUP), &payload, &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.msg_type, MSG_ROUTE_REPLY);
        assert_eq!(reply.payload, vec![0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn route_lookup_short_payload_is_an_error_not_a_bad_frame() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let reply =
            dispatch(&header(MSG_ROUTE_LOOKUP), &[0x0A, 0x01], &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.msg_type, MSG_ERROR);
        assert_eq!(reply.payload, b"bad payload");
        assert_eq!(stats.bad_frames(), 0);
    }

    #[test]
    fn unknown_message_type_is_an_error() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        let reply = dispatch(&header(200), &[], &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(reply.msg_type, MSG_ERROR);
        assert_eq!(reply.payload, b"unknown message type");
    }

    #[test]
    fn dispatch_always_records_exactly_one_latency_sample() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();

        dispatch(&header(MSG_PING), &[], &mut routing, &mut stats, &clock, Instant::now());
        dispatch(&header(MSG_ERROR), &[], &mut routing, &mut stats, &clock, Instant::now());
        assert_eq!(stats.total_requests(), 2);
    }

    #[test]
    fn latency_duration_is_folded_into_stats() {
        let mut routing = RoutingTable::new(256);
        let mut stats = Stats::new();
        let clock = Clock::new();
        let started = Instant::now() - Duration::from_micros(500);

        dispatch(&header(MSG_PING), &[], &mut routing, &mut stats, &clock, started);
        assert!(stats.last_latency_us() >= 500);
    }
}
