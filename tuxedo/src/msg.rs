// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message layer: converts pkt lines into handshake messages.

use std::num::NonZeroU64;
use std::str::FromStr;

use serde::Serialize;

use crate::pkt::{LinePacket, Packet};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Error(String);

/// A user code (PIN) for the panel.
///
/// Always a nonzero value. Parsed from a non-empty string of ASCII digits;
/// leading zeros are accepted as long as the value itself is nonzero.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Code(NonZeroU64);

impl Code {
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Code)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl FromStr for Code {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `u64::from_str` also takes a leading `+`, which isn't a digit.
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error(format!("code must be decimal digits; got {:?}", s)));
        }
        let value = u64::from_str(s)
            .map_err(|_| Error(format!("code {:?} out of range", s)))?;
        Code::new(value).ok_or_else(|| Error(format!("code {:?} must be nonzero", s)))
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    KeyRequest(KeyRequest),
    KeyResponse(KeyResponse),
    KeyRejected(KeyRejected),
}

/// `KR`: asks the panel for a session key, optionally presenting a user code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRequest {
    pub code: Option<Code>,
}

impl KeyRequest {
    fn from_ascii_data(args: &str) -> Result<Self, String> {
        let code = match args {
            "" => None,
            a => Some(Code::from_str(a).map_err(|e| e.0)?),
        };
        Ok(KeyRequest { code })
    }

    fn to_ascii(&self) -> LinePacket {
        let msg = match self.code {
            None => "KR".to_owned(),
            Some(c) => format!("KR{}", c),
        };
        LinePacket::try_from(msg).expect("KeyRequest is always a valid line")
    }
}

/// `KS`: the panel's session key and initial value, comma-separated.
///
/// Both values are opaque to this crate; they're only checked to be
/// non-empty and representable on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyResponse {
    secret_key: String,
    initial_value: String,
}

impl KeyResponse {
    pub fn new(secret_key: String, initial_value: String) -> Result<Self, Error> {
        Self::check(&secret_key, &initial_value).map_err(Error)?;
        Ok(KeyResponse {
            secret_key,
            initial_value,
        })
    }

    fn check(secret_key: &str, initial_value: &str) -> Result<(), String> {
        for (name, v) in [("secret key", secret_key), ("initial value", initial_value)] {
            if v.is_empty() {
                return Err(format!("{} is empty", name));
            }
            if v.contains(',') {
                return Err(format!("{} contains a comma", name));
            }
            LinePacket::check_body_chars(v.as_bytes())
                .map_err(|e| format!("{}: {}", name, e))?;
        }
        let len = 3 + secret_key.len() + initial_value.len();
        if len > 250 {
            return Err(format!("key response body of {} bytes is too long", len));
        }
        Ok(())
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn initial_value(&self) -> &str {
        &self.initial_value
    }

    pub fn into_parts(self) -> (String, String) {
        (self.secret_key, self.initial_value)
    }

    fn from_ascii_data(args: &str) -> Result<Self, String> {
        let (secret_key, initial_value) = args
            .split_once(',')
            .ok_or_else(|| format!("expected <key>,<iv>; got {:?}", args))?;
        Self::check(secret_key, initial_value)?;
        Ok(KeyResponse {
            secret_key: secret_key.to_owned(),
            initial_value: initial_value.to_owned(),
        })
    }

    fn to_ascii(&self) -> LinePacket {
        LinePacket::try_from(format!("KS{},{}", self.secret_key, self.initial_value))
            .expect("KeyResponse checked on construction")
    }
}

// Keeps the key material out of logs.
impl std::fmt::Debug for KeyResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResponse")
            .field("secret_key", &"<redacted>")
            .field("initial_value", &"<redacted>")
            .finish()
    }
}

/// `KX`: the panel refused the key request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRejected {
    reason: String,
}

impl KeyRejected {
    pub fn new(reason: String) -> Result<Self, Error> {
        if reason.len() > 248 {
            return Err(Error(format!("reason of {} bytes is too long", reason.len())));
        }
        LinePacket::check_body_chars(reason.as_bytes()).map_err(Error)?;
        Ok(KeyRejected { reason })
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn to_ascii(&self) -> LinePacket {
        LinePacket::try_from(format!("KX{}", self.reason))
            .expect("KeyRejected checked on construction")
    }
}

impl From<KeyRequest> for Message {
    fn from(m: KeyRequest) -> Self {
        Message::KeyRequest(m)
    }
}

impl From<KeyResponse> for Message {
    fn from(m: KeyResponse) -> Self {
        Message::KeyResponse(m)
    }
}

impl From<KeyRejected> for Message {
    fn from(m: KeyRejected) -> Self {
        Message::KeyRejected(m)
    }
}

impl Message {
    pub fn parse(pkt: &Packet) -> Result<Option<Self>, Error> {
        match pkt {
            Packet::Line(msg) => Self::parse_line(msg),
            Packet::Invalid { .. } => Ok(None),
        }
    }

    fn parse_line(pkt: &LinePacket) -> Result<Option<Self>, Error> {
        let (cmd, args) = pkt.split_at(2);
        match cmd {
            "KR" => KeyRequest::from_ascii_data(args).map(Self::KeyRequest),
            "KS" => KeyResponse::from_ascii_data(args).map(Self::KeyResponse),
            "KX" => Ok(Self::KeyRejected(KeyRejected {
                reason: args.to_owned(),
            })),
            _ => return Ok(None),
        }
        .map(Some)
        .map_err(Error)
    }

    pub fn to_pkt(&self) -> Packet {
        Packet::Line(match self {
            Message::KeyRequest(m) => m.to_ascii(),
            Message::KeyResponse(m) => m.to_ascii(),
            Message::KeyRejected(m) => m.to_ascii(),
        })
    }
}
