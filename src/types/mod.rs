/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are shared across the sub-protocols of the consensus core.
//!
//! Types specific to a single component live in that component's module.

pub mod basic;

pub mod certificates;

pub mod crypto_primitives;

pub mod validators;

pub mod vertex;

pub mod voting;
