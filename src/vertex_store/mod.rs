/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The tree of uncommitted vertices that a replica has inserted in the current epoch.
//!
//! The [`VertexStore`] is rooted at the last committed vertex. Inserting a vertex requires its parent to be
//! in the store, and executes it through the [`Ledger`](crate::ledger::Ledger) to obtain the
//! [`LedgerHeader`](crate::types::vertex::LedgerHeader) that votes for it certify.
//!
//! ## Committing
//!
//! Every QC that is added to the store, whether on its own or embedded in an inserted vertex, may commit
//! a vertex by the 3-chain rule. When it does:
//! 1. The committed vertex becomes the new root.
//! 2. The committed vertex and its uncommitted ancestors are handed to the ledger, oldest first.
//! 3. Every vertex that does not descend from the new root is pruned.
//!
//! ## Rebuilding
//!
//! When [BFT sync](crate::bft_sync) finds that the replica's root is far behind, it fetches the committed
//! vertices directly and [`rebuild`](VertexStore::rebuild)s the store from a new [`VertexStoreState`].

pub mod implementation;
pub use implementation::{VertexStore, VertexStoreError};

pub mod state;
pub use state::{PreparedVertex, VertexStoreState};

#[cfg(test)]
mod tests;
