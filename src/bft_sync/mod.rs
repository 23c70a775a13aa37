/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocol for fetching the vertices certified by a high QC that this replica has not seen.
//!
//! Every consensus event carries its author's [`HighQC`](crate::types::certificates::HighQC). Before an
//! event is processed, [`BFTSync::sync_to_qc`](implementation::BFTSync::sync_to_qc) makes sure that the
//! vertex its highest QC certifies is in the [vertex store](crate::vertex_store). If it is not, the event
//! is queued behind the sync, and BFT Sync fetches the missing vertices:
//!
//! 1. If the highest committed QC commits a vertex beyond what the ledger has committed, the ledger is
//!    asked to sync first, and asked again every `ledger_sync_timeout * 2^attempt` until `max_attempts`.
//!    Once it reports that it has caught up, the three vertices of the committed chain are fetched and the
//!    vertex store is rebuilt on top of them.
//! 2. The certified vertex is fetched, then its ancestors one at a time, until the fetched chain connects
//!    to the vertex store. The chain is then inserted oldest first.
//!
//! Requests go to the author of the high QC first, then to other validators. Each attempt times out after
//! `request_timeout * 2^attempt`, and after `max_attempts` the sync is abandoned and handed over to the
//! ledger. Syncs that need the same vertices share one request.
//!
//! A ledger update drops the syncs of vertices that the ledger has already gone past.
//!
//! The same component serves [`GetVerticesRequest`](messages::GetVerticesRequest)s from peers out of the
//! local vertex store.

pub mod implementation;
pub use implementation::{BFTSync, BFTSyncConfiguration, SyncResult};

pub mod messages;

pub(crate) mod sync_queues;
