use crate::client::{AsyncClient, ClientFactory, StreamHandle, Subscription};
use crate::Error;
use crate::EventSender;
use crate::IntoIpcResult;
use crate::OpConfirm;
use crate::QoS;
use crate::StreamEvent;
use crate::GREETINGS;
use crate::PROTOCOL_VERSION;
use crate::RESPONSE_OK;
use crate::{FrameKind, FrameOp, Message};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::marker::Unpin;
use std::sync::atomic;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
#[cfg(not(target_os = "windows"))]
use tokio::net::UnixStream;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use log::{error, trace, warn};

use async_trait::async_trait;

pub const SOCKET_PATH_ENV: &str = "AWS_GG_NUCLEUS_DOMAIN_SOCKET_FILEPATH_FOR_COMPONENT";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/busrt.sock";
pub const DEFAULT_CLIENT_NAME: &str = "edgeipc.sample";

type ResponseMap = Mutex<BTreeMap<u32, oneshot::Sender<Result<(), Error>>>>;
type RouteMap = Mutex<BTreeMap<String, EventSender>>;

struct Writer {
    inner: BufWriter<Box<dyn AsyncWrite + Unpin + Send>>,
}

impl Writer {
    fn new(writer: Box<dyn AsyncWrite + Unpin + Send>, cap: usize) -> Self {
        Self {
            inner: BufWriter::with_capacity(cap, writer),
        }
    }
    async fn write(&mut self, header: &[u8], body: &[&[u8]]) -> Result<(), Error> {
        self.inner.write_all(header).await?;
        for part in body {
            self.inner.write_all(part).await?;
        }
        self.inner.flush().await.map_err(Into::into)
    }
    async fn shutdown(&mut self) -> Result<(), Error> {
        self.inner.shutdown().await.map_err(Into::into)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    path: String,
    name: String,
    buf_size: usize,
    queue_size: usize,
    timeout: Duration,
}

impl Config {
    /// path - /path/to/socket (must end with .sock .socket or .ipc) or host:port,
    /// name - an unique client name
    pub fn new(path: &str, name: &str) -> Self {
        Self {
            path: path.to_owned(),
            name: name.to_owned(),
            buf_size: crate::DEFAULT_BUF_SIZE,
            queue_size: crate::DEFAULT_QUEUE_SIZE,
            timeout: crate::DEFAULT_TIMEOUT,
        }
    }
    /// Uses the socket path published by the edge runtime, if any
    pub fn from_env(name: &str) -> Self {
        let path =
            std::env::var(SOCKET_PATH_ENV).unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_owned());
        Self::new(&path, name)
    }
    pub fn buf_size(mut self, size: usize) -> Self {
        self.buf_size = size;
        self
    }
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
    #[allow(clippy::case_sensitive_file_extension_comparisons)]
    fn is_unix_socket(&self) -> bool {
        self.path.ends_with(".sock")
            || self.path.ends_with(".socket")
            || self.path.ends_with(".ipc")
            || self.path.starts_with('/')
    }
}

struct Shared {
    writer: tokio::sync::Mutex<Writer>,
    frame_id: atomic::AtomicU32,
    responses: ResponseMap,
    routes: RouteMap,
    connected: atomic::AtomicBool,
    timeout: Duration,
}

impl Shared {
    #[inline]
    fn next_frame_id(&self) -> u32 {
        loop {
            let id = self
                .frame_id
                .fetch_add(1, atomic::Ordering::Relaxed)
                .wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }
    #[inline]
    fn is_connected(&self) -> bool {
        self.connected.load(atomic::Ordering::Relaxed)
    }
    fn mark_disconnected(&self) {
        self.connected.store(false, atomic::Ordering::Relaxed);
        // pending confirmations get Eof
        self.responses.lock().clear();
    }
    async fn send_frame(&self, op: FrameOp, body: &[&[u8]], qos: QoS) -> Result<OpConfirm, Error> {
        let frame_id = self.next_frame_id();
        let len = u32::try_from(body.iter().map(|b| b.len()).sum::<usize>())
            .map_err(|_| Error::data("frame too large"))?;
        let mut header = frame_id.to_le_bytes().to_vec();
        header.push(op as u8 | (qos as u8) << 6);
        header.extend_from_slice(&len.to_le_bytes());
        let rx = if qos.needs_ack() {
            let (tx, rx) = oneshot::channel();
            self.responses.lock().insert(frame_id, tx);
            Some(rx)
        } else {
            None
        };
        trace!("sending IPC {:?} frame {} QoS={:?}", op, frame_id, qos);
        let result = tokio::time::timeout(self.timeout, async {
            self.writer.lock().await.write(&header, body).await
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(e)) => {
                self.mark_disconnected();
                Err(e)
            }
            Err(e) => {
                // the frame may have been written partially
                self.mark_disconnected();
                Err(e.into())
            }
        }
    }
    async fn route(&self, message: Message) {
        let tx = {
            let routes = self.routes.lock();
            routes.get(message.topic()).cloned().or_else(|| {
                routes
                    .iter()
                    .find(|(mask, _)| topic_matches(mask, message.topic()))
                    .map(|(_, tx)| tx.clone())
            })
        };
        if let Some(tx) = tx {
            let topic = message.topic().to_owned();
            if tx.send(StreamEvent::Message(message)).await.is_err() {
                trace!("subscription channel for {} is gone", topic);
            }
        } else {
            trace!("no subscription for the topic {}", message.topic());
        }
    }
    /// Ends all subscription streams
    fn close_routes(&self, err: Option<&Error>) {
        let routes: Vec<EventSender> = std::mem::take(&mut *self.routes.lock())
            .into_values()
            .collect();
        for tx in routes {
            end_stream(&tx, err);
        }
    }
}

/// Pushes the final events without waiting for the consumer, the channel is closed if the
/// queue is full
fn end_stream(tx: &EventSender, err: Option<&Error>) {
    if let Some(e) = err {
        if tx.try_send(StreamEvent::Error(e.clone())).is_err() {
            trace!("subscription queue is full, dropping the stream error");
            tx.close();
            return;
        }
    }
    if tx.try_send(StreamEvent::Closed).is_err() {
        trace!("subscription queue is full, closing the channel");
        tx.close();
    }
}

/// Matches a topic against a subscription mask, "+" matches a single level, "#" the rest
pub fn topic_matches(mask: &str, topic: &str) -> bool {
    let mut m = mask.split('/');
    let mut t = topic.split('/');
    loop {
        match (m.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(a), Some(b)) if a == b => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

pub struct Client {
    name: String,
    shared: Arc<Shared>,
    reader_fut: JoinHandle<()>,
    queue_size: usize,
    closed: bool,
}

impl Client {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        tokio::time::timeout(config.timeout, Self::connect_broker(config)).await?
    }
    async fn connect_broker(config: &Config) -> Result<Self, Error> {
        if config.is_unix_socket() {
            #[cfg(target_os = "windows")]
            {
                return Err(Error::not_supported("unix sockets"));
            }
            #[cfg(not(target_os = "windows"))]
            {
                let stream = UnixStream::connect(&config.path).await?;
                Self::connect_stream(config, stream).await
            }
        } else {
            let stream = TcpStream::connect(&config.path).await?;
            stream.set_nodelay(true)?;
            Self::connect_stream(config, stream).await
        }
    }
    /// Registers the client over an already established stream
    pub async fn connect_stream<S>(config: &Config, stream: S) -> Result<Self, Error>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (r, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::with_capacity(config.buf_size, r);
        chat(&config.name, &mut reader, &mut writer).await?;
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Writer::new(Box::new(writer), config.buf_size)),
            frame_id: atomic::AtomicU32::new(0),
            responses: <_>::default(),
            routes: <_>::default(),
            connected: atomic::AtomicBool::new(true),
            timeout: config.timeout,
        });
        let reader_shared = shared.clone();
        let reader_fut = tokio::spawn(async move {
            if let Err(e) = handle_read(reader, &reader_shared).await {
                if e.kind() == crate::ErrorKind::Eof {
                    warn!("IPC connection closed");
                } else {
                    error!("IPC client reader error: {}", e);
                }
                reader_shared.mark_disconnected();
                reader_shared.close_routes(Some(&e));
            }
        });
        Ok(Self {
            name: config.name.clone(),
            shared,
            reader_fut,
            queue_size: config.queue_size,
            closed: false,
        })
    }
    fn ensure_usable(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::io("client closed"))
        } else if self.shared.is_connected() {
            Ok(())
        } else {
            Err(Error::eof())
        }
    }
}

#[async_trait]
impl AsyncClient for Client {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<OpConfirm, Error> {
        self.ensure_usable()?;
        self.shared
            .send_frame(
                FrameOp::PublishTopic,
                &[topic.as_bytes(), &[0x00], &payload],
                qos,
            )
            .await
    }
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<Subscription, Error> {
        self.ensure_usable()?;
        let (tx, rx) = async_channel::bounded(self.queue_size);
        {
            let mut routes = self.shared.routes.lock();
            if routes.contains_key(topic) {
                return Err(Error::busy(format!("already subscribed to {}", topic)));
            }
            routes.insert(topic.to_owned(), tx);
        }
        let result = async {
            let confirm = self
                .shared
                .send_frame(FrameOp::SubscribeTopic, &[topic.as_bytes()], qos)
                .await?;
            if let Some(rx) = confirm {
                tokio::time::timeout(self.shared.timeout, rx).await???;
            }
            Ok::<(), Error>(())
        }
        .await;
        if let Err(e) = result {
            self.shared.routes.lock().remove(topic);
            return Err(e);
        }
        let handle = IpcStream {
            topic: topic.to_owned(),
            shared: self.shared.clone(),
            closed: atomic::AtomicBool::new(false),
        };
        Ok(Subscription::new(topic, rx, Box::new(handle)))
    }
    async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            trace!("IPC client {} is already closed", self.name);
            return Ok(());
        }
        self.closed = true;
        self.reader_fut.abort();
        let was_connected = self.shared.is_connected();
        self.shared.mark_disconnected();
        self.shared.close_routes(None);
        if was_connected {
            let mut writer =
                tokio::time::timeout(self.shared.timeout, self.shared.writer.lock()).await?;
            tokio::time::timeout(self.shared.timeout, writer.shutdown()).await??;
        }
        Ok(())
    }
    #[inline]
    fn is_connected(&self) -> bool {
        !self.closed && self.shared.is_connected()
    }
    #[inline]
    fn get_timeout(&self) -> Option<Duration> {
        Some(self.shared.timeout)
    }
    #[inline]
    fn get_name(&self) -> &str {
        self.name.as_str()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader_fut.abort();
    }
}

struct IpcStream {
    topic: String,
    shared: Arc<Shared>,
    closed: atomic::AtomicBool,
}

#[async_trait]
impl StreamHandle for IpcStream {
    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, atomic::Ordering::SeqCst) {
            return Ok(());
        }
        let tx = self.shared.routes.lock().remove(&self.topic);
        let result = if self.shared.is_connected() {
            self.shared
                .send_frame(
                    FrameOp::UnsubscribeTopic,
                    &[self.topic.as_bytes()],
                    QoS::AtMostOnce,
                )
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        if let Some(tx) = tx {
            end_stream(&tx, None);
        }
        result
    }
    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(atomic::Ordering::SeqCst)
    }
}

/// Builds IPC clients, each one registered under its own name
pub struct IpcClientFactory {
    config: Config,
    counter: atomic::AtomicUsize,
}

impl IpcClientFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            counter: atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClientFactory for IpcClientFactory {
    type Client = Client;
    async fn build(&self) -> Result<Client, Error> {
        let id = self.counter.fetch_add(1, atomic::Ordering::Relaxed) + 1;
        let mut config = self.config.clone();
        config.name = format!("{}.{}", self.config.name, id);
        trace!("connecting to {} as {}", config.path, config.name);
        Client::connect(&config).await
    }
}

fn parse_publish(buf: Vec<u8>) -> Result<Message, Error> {
    let (sender, topic, payload_pos) = {
        let mut sp = buf.splitn(3, |c| *c == 0);
        let s = sp.next().ok_or_else(|| Error::data("broken frame"))?;
        let sender = std::str::from_utf8(s)?.to_owned();
        let t = sp.next().ok_or_else(|| Error::data("broken frame"))?;
        let topic = std::str::from_utf8(t)?.to_owned();
        sp.next().ok_or_else(|| Error::data("broken frame"))?;
        let payload_pos = s.len() + t.len() + 2;
        (sender, topic, payload_pos)
    };
    Ok(Message::new(sender, topic, buf, payload_pos))
}

async fn handle_read<R>(mut reader: R, shared: &Shared) -> Result<(), Error>
where
    R: AsyncReadExt + Unpin,
{
    loop {
        let mut buf = [0_u8; 6];
        reader.read_exact(&mut buf).await?;
        let frame_type: FrameKind = buf[0].try_into()?;
        match frame_type {
            FrameKind::Nop => {}
            FrameKind::Acknowledge => {
                let ack_id = u32::from_le_bytes(buf[1..5].try_into()?);
                let tx_channel = { shared.responses.lock().remove(&ack_id) };
                if let Some(tx) = tx_channel {
                    let _r = tx.send(buf[5].to_ipc_result());
                } else {
                    warn!("orphaned IPC op ack {}", ack_id);
                }
            }
            FrameKind::Publish => {
                let frame_len = u32::from_le_bytes(buf[1..5].try_into()?);
                let mut buf = vec![0; frame_len as usize];
                tokio::time::timeout(shared.timeout, reader.read_exact(&mut buf)).await??;
                let message = parse_publish(buf)?;
                shared.route(message).await;
            }
        }
    }
}

async fn chat<R, W>(name: &str, reader: &mut R, writer: &mut W) -> Result<(), Error>
where
    R: AsyncReadExt + Unpin,
    W: AsyncWriteExt + Unpin,
{
    if name.len() > u16::MAX as usize {
        return Err(Error::data("name too long"));
    }
    let mut buf = [0_u8; 3];
    reader.read_exact(&mut buf).await?;
    if buf[0] != GREETINGS[0] {
        return Err(Error::not_supported("Invalid greetings"));
    }
    if u16::from_le_bytes(buf[1..3].try_into()?) != PROTOCOL_VERSION {
        return Err(Error::not_supported("Unsupported protocol version"));
    }
    writer.write_all(&buf).await?;
    let mut buf = [0_u8; 1];
    reader.read_exact(&mut buf).await?;
    if buf[0] != RESPONSE_OK {
        return Err(Error::new(
            buf[0].into(),
            Some(format!("Server greetings response: {:?}", buf[0])),
        ));
    }
    #[allow(clippy::cast_possible_truncation)]
    writer.write_all(&(name.len() as u16).to_le_bytes()).await?;
    writer.write_all(name.as_bytes()).await?;
    writer.flush().await?;
    let mut buf = [0_u8; 1];
    reader.read_exact(&mut buf).await?;
    if buf[0] != RESPONSE_OK {
        return Err(Error::new(
            buf[0].into(),
            Some(format!("Server registration response: {:?}", buf[0])),
        ));
    }
    Ok(())
}
