// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket plumbing.

pub mod multicast;

pub use multicast::bind_multicast;
