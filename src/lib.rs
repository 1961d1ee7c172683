// Copyright (c) 2026 Marketmesh
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Marketmesh - peer-to-peer distribution and cooperative validation of
//! market-data records.
//!
//! This crate provides:
//! - Deterministic record types, canonical encoding, and content hashing
//! - Weighted-quorum cooperative validation (voting sessions, not BFT)
//! - A scored peer reputation ledger with adaptive threshold tuning
//! - Encrypted P2P transport (libp2p Noise + Yamux) with discovery, pub/sub,
//!   and an authority RPC service for on-demand validation
//! - Pluggable persistence behind a `Repository` trait
//! - Monitoring via Prometheus metrics and a `/healthz` status endpoint

/// Configuration loading and validation.
pub mod config;
/// Core protocol primitives (types, codec, reputation, security).
pub mod core;
/// Observability (metrics, `/metrics` + `/healthz` HTTP server).
pub mod monitoring;
/// P2P networking stack (libp2p transport, discovery, pub/sub, authority RPC).
pub mod networking;
/// Persistence behind the `Repository` trait.
pub mod repository;
/// Host supervisor: startup/shutdown ordering and component wiring.
pub mod supervisor;
/// Cooperative validation: voting sessions and the engine that owns them.
pub mod voting;
