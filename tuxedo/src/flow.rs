// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The user setup flow: validate submitted fields, fetch a key from the
//! panel, and produce the configuration entry to persist.
//!
//! The host drives this as a two-state machine. [`ConfigFlow::show_form`]
//! presents the empty form; each [`ConfigFlow::submit`] either finishes with
//! [`FlowResult::CreateEntry`] or re-presents the form with a single `base`
//! error. Nothing is remembered between submissions.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::msg::Code;
use crate::obtain::{ConnectError, KeySource};

pub const DOMAIN: &str = "tuxedo";

/// Title and name used when the user doesn't supply one.
pub const DEFAULT_NAME: &str = "Tuxedo Touch Controller";

const STEP_USER: &str = "user";

/// The fields of one form submission, as typed by the user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmittedInput {
    pub ip_address: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub code: Option<String>,
}

impl SubmittedInput {
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A submission which has passed [`validate`].
///
/// `ip_address` and `name` are kept exactly as typed; only `code` is
/// normalized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedInput {
    pub ip_address: String,
    pub name: Option<String>,
    pub code: Option<Code>,
    address: IpAddr,
}

impl ValidatedInput {
    /// The parsed form of `ip_address`, used to reach the panel.
    pub fn address(&self) -> IpAddr {
        self.address
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("not an IPv4 or IPv6 address")]
    InvalidAddress,

    #[error("code must be a nonzero number")]
    InvalidCode,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

impl FlowError {
    /// The error key shown against the form's `base` field.
    pub fn key(&self) -> &'static str {
        match self {
            FlowError::Validation(ValidationError::InvalidAddress) => "invalid_address",
            FlowError::Validation(ValidationError::InvalidCode) => "invalid_code",
            FlowError::Connect(ConnectError::CannotConnect(_)) => "cannot_connect",
        }
    }
}

/// Checks the syntax of a submission.
///
/// The address is checked before the code, so a submission with both wrong
/// reports `InvalidAddress`.
pub fn validate(input: SubmittedInput) -> Result<ValidatedInput, ValidationError> {
    let address =
        IpAddr::from_str(&input.ip_address).map_err(|_| ValidationError::InvalidAddress)?;
    let code = input
        .code
        .as_deref()
        .map(Code::from_str)
        .transpose()
        .map_err(|_| ValidationError::InvalidCode)?;
    Ok(ValidatedInput {
        ip_address: input.ip_address,
        name: input.name,
        code,
        address,
    })
}

/// The configuration entry data produced by a successful flow.
///
/// `name` and `code` are omitted from the serialized mapping when the user
/// didn't supply them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub ip_address: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,

    pub secret_key: String,
    pub initial_value: String,
}

impl ResolvedConfig {
    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }
}

/// One field of the user step's form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormField {
    pub name: &'static str,

    #[serde(rename = "type")]
    pub field_type: &'static str,

    pub required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
}

const USER_SCHEMA: [FormField; 3] = [
    FormField {
        name: "ip_address",
        field_type: "string",
        required: true,
        default: None,
    },
    FormField {
        name: "name",
        field_type: "string",
        required: false,
        default: Some(DEFAULT_NAME),
    },
    FormField {
        name: "code",
        field_type: "string",
        required: false,
        default: None,
    },
];

/// What the host should do next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    /// Show (or re-show) the form.
    Form {
        handler: &'static str,
        step_id: &'static str,
        data_schema: Vec<FormField>,
        errors: Option<BTreeMap<&'static str, &'static str>>,
    },

    /// Persist a new configuration entry.
    CreateEntry {
        handler: &'static str,
        title: String,
        data: ResolvedConfig,
    },
}

impl FlowResult {
    fn form(errors: Option<BTreeMap<&'static str, &'static str>>) -> Self {
        FlowResult::Form {
            handler: DOMAIN,
            step_id: STEP_USER,
            data_schema: USER_SCHEMA.to_vec(),
            errors,
        }
    }

    /// Returns the `base` error key, if this is a form with errors.
    pub fn base_error(&self) -> Option<&'static str> {
        match self {
            FlowResult::Form {
                errors: Some(errors),
                ..
            } => errors.get("base").copied(),
            _ => None,
        }
    }
}

pub struct ConfigFlow<S> {
    source: S,
}

impl<S: KeySource> ConfigFlow<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// The initial, empty form.
    pub fn show_form(&self) -> FlowResult {
        FlowResult::form(None)
    }

    /// Validates `input`, then obtains a credential for it.
    ///
    /// The key source is only consulted once validation passes.
    pub async fn run(&self, input: SubmittedInput) -> Result<ResolvedConfig, FlowError> {
        let input = validate(input)?;
        let credential = self.source.obtain(input.address(), input.code).await?;
        Ok(ResolvedConfig {
            ip_address: input.ip_address,
            name: input.name,
            code: input.code,
            secret_key: credential.secret_key,
            initial_value: credential.initial_value,
        })
    }

    /// Handles a form submission, returning the host's next step.
    pub async fn submit(&self, input: SubmittedInput) -> FlowResult {
        match self.run(input).await {
            Ok(data) => {
                tracing::info!(ip_address = %data.ip_address, title = data.title(), "setup complete");
                FlowResult::CreateEntry {
                    handler: DOMAIN,
                    title: data.title().to_owned(),
                    data,
                }
            }
            Err(e) => {
                tracing::info!(error = %e, "setup form rejected");
                let mut errors = BTreeMap::new();
                errors.insert("base", e.key());
                FlowResult::form(Some(errors))
            }
        }
    }
}
