//! mcrelay runtime metrics.
//!
//! Counters for the wire parser, the read buffer, the do-not-dump
//! allocator, and request-context lifecycle. Hot-path counters are
//! sharded per proxy thread (see [`crate::counter`]) and registered with
//! `metriken` for exposition by whatever admin endpoint the embedding
//! daemon runs.

use crate::counter::{Counter, CounterGroup};
use metriken::{metric, Gauge};

// Counter groups (sharded storage, one shard per proxy thread).
static PARSER: CounterGroup = CounterGroup::new();
static BUFFER: CounterGroup = CounterGroup::new();
static REQUESTS: CounterGroup = CounterGroup::new();
static RECORDING: CounterGroup = CounterGroup::new();
static BACKEND: CounterGroup = CounterGroup::new();

/// Counter slot indices for wire-parser metrics.
pub mod parser {
    pub const UMBRELLA: usize = 0;
    pub const CARET: usize = 1;
    pub const ASCII: usize = 2;
    pub const ERRORS: usize = 3;
    pub const DETECT_FAILURES: usize = 4;
}

/// Counter slot indices for read-buffer and allocator metrics.
pub mod buffer {
    pub const GROWS: usize = 0;
    pub const SHRINKS: usize = 1;
    pub const NODUMP_ALLOCATIONS: usize = 2;
    pub const NODUMP_FAILURES: usize = 3;
}

/// Counter slot indices for request-context metrics.
pub mod requests {
    pub const CREATED: usize = 0;
    pub const REPLIED: usize = 1;
    pub const CANCELED: usize = 2;
}

/// Counter slot indices for recording-context metrics.
pub mod recording {
    pub const DESTINATIONS: usize = 0;
    pub const SHARD_SPLITS: usize = 1;
}

/// Counter slot indices for backend-reply metrics.
pub mod backend {
    pub const REPLIES: usize = 0;
    pub const ERRORS: usize = 1;
    pub const LATENCY_US: usize = 2;
}

// ── Wire parser ──────────────────────────────────────────────────

#[metric(
    name = "mcrelay/parser/umbrella_frames",
    description = "Umbrella frames delivered"
)]
pub static UMBRELLA_FRAMES: Counter = Counter::new(&PARSER, parser::UMBRELLA);

#[metric(
    name = "mcrelay/parser/caret_frames",
    description = "Caret frames delivered"
)]
pub static CARET_FRAMES: Counter = Counter::new(&PARSER, parser::CARET);

#[metric(
    name = "mcrelay/parser/ascii_reads",
    description = "Reads handed to the ASCII sub-parser"
)]
pub static ASCII_READS: Counter = Counter::new(&PARSER, parser::ASCII);

#[metric(
    name = "mcrelay/parser/errors",
    description = "Malformed binary headers"
)]
pub static PARSE_ERRORS: Counter = Counter::new(&PARSER, parser::ERRORS);

#[metric(
    name = "mcrelay/parser/detect_failures",
    description = "Connections whose first byte matched no protocol"
)]
pub static PROTOCOL_DETECT_FAILURES: Counter = Counter::new(&PARSER, parser::DETECT_FAILURES);

// ── Read buffer ──────────────────────────────────────────────────

#[metric(
    name = "mcrelay/buffer/grows",
    description = "Read buffer growths for oversized frames"
)]
pub static BUFFER_GROWS: Counter = Counter::new(&BUFFER, buffer::GROWS);

#[metric(
    name = "mcrelay/buffer/shrinks",
    description = "Read buffer shrinks back to steady state"
)]
pub static BUFFER_SHRINKS: Counter = Counter::new(&BUFFER, buffer::SHRINKS);

// ── Do-not-dump allocator ────────────────────────────────────────

#[metric(
    name = "mcrelay/nodump/allocations",
    description = "Do-not-dump regions mapped"
)]
pub static NODUMP_ALLOCATIONS: Counter = Counter::new(&BUFFER, buffer::NODUMP_ALLOCATIONS);

#[metric(
    name = "mcrelay/nodump/failures",
    description = "Do-not-dump allocation failures (fell back to heap)"
)]
pub static NODUMP_FAILURES: Counter = Counter::new(&BUFFER, buffer::NODUMP_FAILURES);

// ── Request contexts ─────────────────────────────────────────────

#[metric(
    name = "mcrelay/requests/created",
    description = "Request contexts created"
)]
pub static REQUESTS_CREATED: Counter = Counter::new(&REQUESTS, requests::CREATED);

#[metric(
    name = "mcrelay/requests/replied",
    description = "Requests that sent an explicit reply"
)]
pub static REQUESTS_REPLIED: Counter = Counter::new(&REQUESTS, requests::REPLIED);

#[metric(
    name = "mcrelay/requests/canceled",
    description = "Requests destroyed without a reply (synthetic error sent)"
)]
pub static REQUESTS_CANCELED: Counter = Counter::new(&REQUESTS, requests::CANCELED);

#[metric(
    name = "mcrelay/requests/active",
    description = "Requests currently being processed"
)]
pub static REQUESTS_ACTIVE: Gauge = Gauge::new();

// ── Recording contexts ───────────────────────────────────────────

#[metric(
    name = "mcrelay/recording/destinations",
    description = "Destinations observed by recording contexts"
)]
pub static RECORDING_DESTINATIONS: Counter = Counter::new(&RECORDING, recording::DESTINATIONS);

#[metric(
    name = "mcrelay/recording/shard_splits",
    description = "Shard splitters observed by recording contexts"
)]
pub static RECORDING_SHARD_SPLITS: Counter = Counter::new(&RECORDING, recording::SHARD_SPLITS);

// ── Backend replies ──────────────────────────────────────────────

#[metric(
    name = "mcrelay/backend/replies",
    description = "Replies received from backends"
)]
pub static BACKEND_REPLIES: Counter = Counter::new(&BACKEND, backend::REPLIES);

#[metric(
    name = "mcrelay/backend/errors",
    description = "Backend replies carrying an error result"
)]
pub static BACKEND_ERRORS: Counter = Counter::new(&BACKEND, backend::ERRORS);

#[metric(
    name = "mcrelay/backend/latency_us_total",
    description = "Cumulative backend reply latency in microseconds"
)]
pub static BACKEND_LATENCY_US: Counter = Counter::new(&BACKEND, backend::LATENCY_US);
