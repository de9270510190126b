// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use bytes::BytesMut;
use clap::Parser;
use pretty_hex::PrettyHex;
use tuxedo::flow::{ConfigFlow, FlowResult, SubmittedInput};
use tuxedo::obtain::{ObtainerConfig, TcpKeySource, DEFAULT_PORT};

#[derive(Debug, Parser)]
enum Cmd {
    /// Runs the setup flow against the panel at the given address.
    Setup {
        ip_address: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(long)]
        code: Option<String>,

        #[clap(flatten)]
        transport: Transport,
    },

    /// Runs the setup flow with fields from a JSON form submission.
    Submit {
        filename: PathBuf,

        #[clap(flatten)]
        transport: Transport,
    },

    /// Decodes captured handshake traffic.
    Read { filename: PathBuf },
}

#[derive(Debug, clap::Args)]
struct Transport {
    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[clap(long, default_value_t = 10)]
    timeout_secs: u64,
}

impl From<Transport> for ObtainerConfig {
    fn from(t: Transport) -> Self {
        ObtainerConfig {
            port: t.port,
            timeout: Duration::from_secs(t.timeout_secs),
        }
    }
}

/// Runs one submission and prints the result. Returns false if the form was rejected.
async fn setup(input: SubmittedInput, transport: Transport) -> anyhow::Result<bool> {
    let flow = ConfigFlow::new(TcpKeySource::new(transport.into()));
    tracing::info!(ip_address = %input.ip_address, "requesting key from panel");
    let result = flow.submit(input).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(matches!(result, FlowResult::CreateEntry { .. }))
}

fn read_submission(filename: &Path) -> anyhow::Result<SubmittedInput> {
    let data = std::fs::read(filename)
        .with_context(|| format!("unable to read {}", filename.display()))?;
    serde_json::from_slice(&data[..])
        .with_context(|| format!("unable to parse form submission {}", filename.display()))
}

fn read(filename: PathBuf) -> anyhow::Result<()> {
    let data = std::fs::read(&filename)
        .with_context(|| format!("unable to read {}", filename.display()))?;
    let mut left = BytesMut::from(&data[..]);
    while let Some(pkt) = tuxedo::pkt::Packet::decode(&mut left) {
        match tuxedo::msg::Message::parse(&pkt) {
            Ok(Some(msg)) => println!("{:?}", msg),
            Ok(None) => println!("{:?}", pkt),
            Err(e) => println!("{:?}: {}", pkt, e),
        }
    }
    if !left.is_empty() {
        println!("incomplete data: {:?}", left.hex_dump());
    }
    Ok(())
}

fn setup_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;
    tracing_log::LogTracer::init()?;
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();
    let sub = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::Layer::new()
            .with_writer(std::io::stderr)
            .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339())
            .with_filter(filter),
    );
    tracing::subscriber::set_global_default(sub)?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // SAFETY: let's assume nothing touches environment variables.
    unsafe {
        time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Unsound);
    }

    setup_tracing()?;
    let accepted = match Cmd::parse() {
        Cmd::Setup {
            ip_address,
            name,
            code,
            transport,
        } => {
            let input = SubmittedInput {
                ip_address,
                name,
                code,
            };
            setup(input, transport).await?
        }
        Cmd::Submit {
            filename,
            transport,
        } => setup(read_submission(&filename)?, transport).await?,
        Cmd::Read { filename } => {
            read(filename)?;
            true
        }
    };
    Ok(if accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setup() {
        let cmd = Cmd::try_parse_from([
            "tuxedo-cli",
            "setup",
            "1.1.1.1",
            "--code",
            "1234",
            "--timeout-secs",
            "3",
        ])
        .unwrap();
        match cmd {
            Cmd::Setup {
                ip_address,
                name,
                code,
                transport,
            } => {
                assert_eq!(ip_address, "1.1.1.1");
                assert_eq!(name, None);
                assert_eq!(code.as_deref(), Some("1234"));
                assert_eq!(
                    ObtainerConfig::from(transport),
                    ObtainerConfig {
                        port: DEFAULT_PORT,
                        timeout: Duration::from_secs(3),
                    }
                );
            }
            o => panic!("unexpected {:?}", o),
        }
    }

    #[test]
    fn submission_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("form.json");
        std::fs::write(&path, br#"{"ip_address": "10.0.0.2", "name": "hall"}"#).unwrap();
        let input = read_submission(&path).unwrap();
        assert_eq!(input, SubmittedInput::new("10.0.0.2").with_name("hall"));
        read_submission(&dir.path().join("missing.json")).unwrap_err();
    }
}
