//! Message-framed socket to the peer
//!
//! [`Transport`] is the seam between the session layer and the wire. The
//! production implementation, [`WsTransport`], runs a websocket over plain
//! TCP or TLS on a dedicated I/O thread so that one dispatch thread can block
//! on [`Transport::receive`] while any number of callers [`Transport::send`].

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tracing::{debug, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Connector as TlsConnector, HandshakeError, Message, WebSocket};
use url::Url;

/// How long the I/O thread blocks in a read before servicing queued writes
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for the peer to answer our close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid socket url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("connection failed: {0}")]
    Connect(io::Error),
    #[error("websocket handshake timed out")]
    HandshakeTimeout,
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("socket error: {0}")]
    Io(String),
    #[error("socket is closed")]
    Closed,
}

/// A bidirectional, message-framed connection.
///
/// `receive` is only ever called from one thread at a time; `send` may be
/// called concurrently and must not interleave frames.
pub trait Transport: Send + Sync + 'static {
    /// Send one text frame
    fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Block until the next text frame. `Ok(None)` means the peer closed.
    fn receive(&self) -> Result<Option<String>, TransportError>;

    /// Start closing. A pending `receive` returns shortly afterwards.
    fn close(&self) -> Result<(), TransportError>;
}

/// Opens transports to URLs. Used for the control socket and again for any
/// secondary socket the peer hands out.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Caller-supplied dial policy
#[derive(Debug, Clone)]
pub struct DialConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Use `wss://` on port 3001 instead of `ws://` on port 3000
    pub secure: bool,
    /// Peers usually present self-signed certificates, so this is off by default
    pub verify_certificates: bool,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            secure: true,
            verify_certificates: false,
        }
    }
}

impl DialConfig {
    /// Control socket URL for a host name or address
    pub fn control_url(&self, host: &str) -> String {
        if self.secure {
            format!("wss://{host}:3001/")
        } else {
            format!("ws://{host}:3000/")
        }
    }
}

/// [`Connector`] that dials websockets with a [`DialConfig`]
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    config: DialConfig,
}

impl WsConnector {
    pub fn new(config: DialConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DialConfig {
        &self.config
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(WsTransport::connect(url, &self.config)?))
    }
}

enum Outgoing {
    Text(String, mpsc::SyncSender<Result<(), TransportError>>),
    Close,
}

/// Websocket transport driven by a background I/O thread
pub struct WsTransport {
    outgoing: Sender<Outgoing>,
    incoming: Mutex<Receiver<Result<Option<String>, TransportError>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Dial `url` and complete the websocket handshake
    pub fn connect(url: &str, config: &DialConfig) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        let secure = match parsed.scheme() {
            "ws" => false,
            "wss" => true,
            other => return Err(invalid(&format!("unsupported scheme {other}"))),
        };
        let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(TransportError::Connect)?
            .next()
            .ok_or_else(|| invalid("host did not resolve"))?;
        let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout)
            .map_err(TransportError::Connect)?;
        tcp.set_nodelay(true).map_err(TransportError::Connect)?;
        // Kept to adjust the read timeout after the handshake
        let control = tcp.try_clone().map_err(TransportError::Connect)?;
        control
            .set_read_timeout(Some(config.handshake_timeout))
            .map_err(TransportError::Connect)?;

        let connector = if secure {
            TlsConnector::Rustls(Arc::new(tls_config(config.verify_certificates)?))
        } else {
            TlsConnector::Plain
        };
        let request = url
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let (socket, _response) = tungstenite::client_tls_with_config(
            request,
            tcp,
            None,
            Some(connector),
        )
        .map_err(|e| match e {
            HandshakeError::Interrupted(_) => TransportError::HandshakeTimeout,
            HandshakeError::Failure(e) => TransportError::Handshake(e.to_string()),
        })?;

        control
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(TransportError::Connect)?;
        debug!(url, "websocket connected");

        Ok(Self::spawn(socket))
    }

    fn spawn(socket: WebSocket<MaybeTlsStream<TcpStream>>) -> Self {
        let (out_tx, out_rx) = mpsc::channel();
        let (in_tx, in_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("ssap-socket".into())
            .spawn(move || pump(socket, out_rx, in_tx));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("failed to spawn socket thread: {e}");
                None
            }
        };

        Self {
            outgoing: out_tx,
            incoming: Mutex::new(in_rx),
            worker: Mutex::new(worker),
        }
    }
}

impl Transport for WsTransport {
    fn send(&self, text: &str) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        self.outgoing
            .send(Outgoing::Text(text.to_string(), ack_tx))
            .map_err(|_| TransportError::Closed)?;
        ack_rx.recv().map_err(|_| TransportError::Closed)?
    }

    fn receive(&self) -> Result<Option<String>, TransportError> {
        let incoming = self.incoming.lock().unwrap_or_else(PoisonError::into_inner);
        match incoming.recv() {
            Ok(item) => item,
            // I/O thread is gone, nothing more will arrive
            Err(_) => Ok(None),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        // Already-closed sockets have no thread left to tell
        let _ = self.outgoing.send(Outgoing::Close);
        Ok(())
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        let _ = self.outgoing.send(Outgoing::Close);
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// I/O thread body: alternate between flushing queued writes and polling
/// the socket for the next message.
fn pump(
    mut socket: WebSocket<MaybeTlsStream<TcpStream>>,
    outgoing: Receiver<Outgoing>,
    incoming: Sender<Result<Option<String>, TransportError>>,
) {
    let mut closing_since: Option<Instant> = None;

    loop {
        loop {
            match outgoing.try_recv() {
                Ok(Outgoing::Text(text, ack)) => {
                    let result = socket
                        .send(Message::text(text))
                        .map_err(|e| TransportError::Io(e.to_string()));
                    let _ = ack.send(result);
                }
                Ok(Outgoing::Close) | Err(TryRecvError::Disconnected) => {
                    if closing_since.is_none() {
                        let _ = socket.close(None);
                        let _ = socket.flush();
                        closing_since = Some(Instant::now());
                    }
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        if closing_since.is_some_and(|since| since.elapsed() > CLOSE_GRACE) {
            let _ = incoming.send(Ok(None));
            return;
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                if incoming.send(Ok(Some(text))).is_err() {
                    closing_since.get_or_insert_with(Instant::now);
                }
            }
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => {
                    let _ = incoming.send(Ok(Some(text)));
                }
                Err(_) => warn!("dropping non-UTF-8 binary frame"),
            },
            // Pongs are queued by tungstenite and flushed on the next write
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                debug!(?frame, "peer sent close");
                closing_since.get_or_insert_with(Instant::now);
            }
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                let _ = socket.flush();
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                let _ = incoming.send(Ok(None));
                return;
            }
            Err(e) => {
                let _ = incoming.send(Err(TransportError::Io(e.to_string())));
                return;
            }
        }
    }
}

fn tls_config(verify: bool) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    let config = if verify {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    };
    Ok(config)
}

/// Accepts any server certificate but still checks handshake signatures
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
