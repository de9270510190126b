// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Onboarding for Honeywell Tuxedo Touch controllers.
//!
//! Layers, bottom to top:
//!
//! *   [`pkt`]: framing of lines in this crate's key handshake.
//! *   [`msg`]: key request/response messages carried in those lines.
//! *   [`tokio`]: a framed TCP connection (with the `tokio` feature, on by default).
//! *   [`obtain`]: retrieving a session credential over that handshake.
//! *   [`flow`]: validating the user's setup form and producing the entry to persist.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod flow;
pub mod msg;
pub mod obtain;
pub mod pkt;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
#[cfg(feature = "tokio")]
pub mod tokio;
