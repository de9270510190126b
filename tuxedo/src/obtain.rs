// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Obtaining a session credential from the panel.
//!
//! [`KeySource`] is the seam the setup flow depends on. [`TcpKeySource`]
//! speaks this crate's key handshake: it opens a connection, sends a `KR`
//! key request, and waits for a `KS` reply. The handshake is what this crate
//! expects of a key endpoint; Tuxedo Touch firmware does not document one. Every failure, from a refused connection
//! to a `KX` rejection, is reported as [`ConnectError::CannotConnect`]; the
//! caller decides whether to try again.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::msg::{Code, KeyResponse};

/// The session credential pair handed out by the panel.
///
/// Both values are opaque here; they're stored and later used to encrypt
/// traffic with the panel.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub secret_key: String,
    pub initial_value: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("secret_key", &"<redacted>")
            .field("initial_value", &"<redacted>")
            .finish()
    }
}

impl From<KeyResponse> for Credential {
    fn from(r: KeyResponse) -> Self {
        let (secret_key, initial_value) = r.into_parts();
        Credential {
            secret_key,
            initial_value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The panel couldn't be reached or wouldn't hand out a key.
    ///
    /// The string describes the underlying cause for logging only.
    #[error("cannot connect to panel: {0}")]
    CannotConnect(String),
}

#[async_trait]
pub trait KeySource: Send + Sync {
    /// Retrieves a credential from the panel at `ip_address`.
    async fn obtain(
        &self,
        ip_address: IpAddr,
        code: Option<Code>,
    ) -> Result<Credential, ConnectError>;
}

#[async_trait]
impl<S: KeySource + ?Sized> KeySource for std::sync::Arc<S> {
    async fn obtain(
        &self,
        ip_address: IpAddr,
        code: Option<Code>,
    ) -> Result<Credential, ConnectError> {
        (**self).obtain(ip_address, code).await
    }
}

#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
#[cfg(feature = "tokio")]
pub use self::tcp::{ObtainerConfig, TcpKeySource, DEFAULT_PORT, DEFAULT_TIMEOUT};

#[cfg(feature = "tokio")]
mod tcp {
    use std::net::{IpAddr, SocketAddr};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::{SinkExt as _, StreamExt as _};

    use super::{ConnectError, Credential, KeySource};
    use crate::msg::{self, Code, KeyRequest, Message};
    use crate::tokio::Connection;

    /// The port [`TcpKeySource`] connects to unless configured otherwise.
    pub const DEFAULT_PORT: u16 = 2101;

    /// Bound on connecting plus the whole exchange.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ObtainerConfig {
        pub port: u16,
        pub timeout: Duration,
    }

    impl Default for ObtainerConfig {
        fn default() -> Self {
            Self {
                port: DEFAULT_PORT,
                timeout: DEFAULT_TIMEOUT,
            }
        }
    }

    /// Reasons a single exchange failed, before they're collapsed into
    /// [`ConnectError::CannotConnect`].
    #[derive(Debug, thiserror::Error)]
    enum ExchangeError {
        #[error("{0}")]
        Io(#[from] std::io::Error),

        #[error("malformed reply: {0}")]
        Malformed(#[from] msg::Error),

        #[error("panel rejected key request: {0:?}")]
        Rejected(String),

        #[error("connection closed before key response")]
        Eof,

        #[error("no key response within {0:?}")]
        Timeout(Duration),
    }

    #[derive(Clone, Debug, Default)]
    pub struct TcpKeySource {
        config: ObtainerConfig,
    }

    impl TcpKeySource {
        pub fn new(config: ObtainerConfig) -> Self {
            Self { config }
        }

        pub fn config(&self) -> &ObtainerConfig {
            &self.config
        }

        /// Performs one request/response on a fresh connection.
        ///
        /// The connection lives only for the duration of this call.
        async fn exchange(addr: SocketAddr, code: Option<Code>) -> Result<Credential, ExchangeError> {
            let mut conn = Connection::connect(addr).await?;
            let req = Message::from(KeyRequest { code });
            tracing::debug!(%addr, "sending key request");
            conn.send(req.to_pkt()).await?;
            while let Some(pkt) = conn.next().await {
                let pkt = pkt?;
                match Message::parse(&pkt)? {
                    Some(Message::KeyResponse(r)) => {
                        tracing::debug!(%addr, "received key response");
                        return Ok(r.into());
                    }
                    Some(Message::KeyRejected(r)) => {
                        return Err(ExchangeError::Rejected(r.reason().to_owned()));
                    }
                    _ => tracing::debug!(?pkt, "ignoring packet while awaiting key response"),
                }
            }
            Err(ExchangeError::Eof)
        }
    }

    #[async_trait]
    impl KeySource for TcpKeySource {
        async fn obtain(
            &self,
            ip_address: IpAddr,
            code: Option<Code>,
        ) -> Result<Credential, ConnectError> {
            let addr = SocketAddr::new(ip_address, self.config.port);
            let result =
                match ::tokio::time::timeout(self.config.timeout, Self::exchange(addr, code)).await
                {
                    Ok(r) => r,
                    Err(_) => Err(ExchangeError::Timeout(self.config.timeout)),
                };
            result.map_err(|e| {
                tracing::warn!(%addr, error = %e, "unable to obtain key from panel");
                ConnectError::CannotConnect(e.to_string())
            })
        }
    }
}

#[cfg(all(test, feature = "tokio"))]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use futures::{SinkExt as _, StreamExt as _};
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    use super::*;
    use crate::msg::{KeyRejected, KeyRequest, Message};
    use crate::pkt::{LinePacket, Packet};
    use crate::tokio::Connection;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Binds a listener and returns a source pointed at it.
    async fn listen(timeout: Duration) -> (TcpListener, TcpKeySource) {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, TcpKeySource::new(ObtainerConfig { port, timeout }))
    }

    /// Accepts one connection and reads the key request from it.
    async fn accept_request(listener: &TcpListener) -> (Connection, KeyRequest) {
        let mut conn = Connection::from(listener.accept().await.unwrap().0);
        let pkt = conn.next().await.unwrap().unwrap();
        match Message::parse(&pkt).unwrap().unwrap() {
            Message::KeyRequest(r) => (conn, r),
            o => panic!("expected key request, got {:?}", o),
        }
    }

    /// A line that fails framing, as a panel with line noise might send.
    fn junk() -> Packet {
        let mut buf = bytes::BytesMut::from(&b"junk\r\n"[..]);
        let pkt = Packet::decode(&mut buf).unwrap();
        assert!(matches!(pkt, Packet::Invalid(_)));
        pkt
    }

    async fn send_line(conn: &mut Connection, body: &str) {
        conn.send(LinePacket::try_from(body).unwrap().into())
            .await
            .unwrap();
    }

    #[test]
    fn default_config() {
        assert_eq!(
            TcpKeySource::default().config(),
            &ObtainerConfig {
                port: 2101,
                timeout: Duration::from_secs(10),
            }
        );
    }

    #[tokio::test]
    async fn obtains_key() {
        let (listener, source) = listen(Duration::from_secs(5)).await;
        let code = Code::new(1234);
        let panel = async {
            let (mut conn, req) = accept_request(&listener).await;
            assert_eq!(req.code, code);

            // Unrelated traffic before the reply is skipped.
            send_line(&mut conn, "ZZstatus").await;
            conn.send(junk()).await.unwrap();
            send_line(&mut conn, "KSkey,iv").await;
        };
        let (_, cred) = tokio::join!(panel, source.obtain(LOCALHOST, code));
        assert_eq!(
            cred.unwrap(),
            Credential {
                secret_key: "key".to_owned(),
                initial_value: "iv".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn rejected() {
        let (listener, source) = listen(Duration::from_secs(5)).await;
        let panel = async {
            let (mut conn, req) = accept_request(&listener).await;
            assert_eq!(req.code, None);
            let reject = Message::from(KeyRejected::new("not enrolled".to_owned()).unwrap());
            conn.send(reject.to_pkt()).await.unwrap();
        };
        let (_, cred) = tokio::join!(panel, source.obtain(LOCALHOST, None));
        match cred.unwrap_err() {
            ConnectError::CannotConnect(cause) => assert!(cause.contains("not enrolled"), "{}", cause),
        }
    }

    #[tokio::test]
    async fn closed_without_reply() {
        let (listener, source) = listen(Duration::from_secs(5)).await;
        let panel = async {
            let (conn, _) = accept_request(&listener).await;
            drop(conn);
        };
        let (_, cred) = tokio::join!(panel, source.obtain(LOCALHOST, None));
        assert!(matches!(cred, Err(ConnectError::CannotConnect(_))));
    }

    #[tokio::test]
    async fn malformed_reply() {
        let (listener, source) = listen(Duration::from_secs(5)).await;
        let panel = async {
            let (mut conn, _) = accept_request(&listener).await;
            send_line(&mut conn, "KSnocomma").await;
        };
        let (_, cred) = tokio::join!(panel, source.obtain(LOCALHOST, None));
        assert!(matches!(cred, Err(ConnectError::CannotConnect(_))));
    }

    #[tokio::test]
    async fn refused() {
        let (listener, source) = listen(Duration::from_secs(5)).await;
        drop(listener);
        let cred = source.obtain(LOCALHOST, None).await;
        assert!(matches!(cred, Err(ConnectError::CannotConnect(_))));
    }

    #[tokio::test]
    async fn times_out() {
        let (listener, source) = listen(Duration::from_millis(100)).await;
        let panel = async {
            // Hold the connection open without replying until the client gives up.
            let (mut conn, _) = accept_request(&listener).await;
            assert!(conn.next().await.is_none());
        };
        let (_, cred) = tokio::join!(panel, source.obtain(LOCALHOST, None));
        match cred.unwrap_err() {
            ConnectError::CannotConnect(cause) => assert!(cause.contains("no key response"), "{}", cause),
        }
    }
}
