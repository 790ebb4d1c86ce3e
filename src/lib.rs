use std::fmt;
use std::time::Duration;

pub const OP_NOP: u8 = 0x00;
pub const OP_PUBLISH: u8 = 0x01;
pub const OP_SUBSCRIBE: u8 = 0x02;
pub const OP_UNSUBSCRIBE: u8 = 0x03;
pub const OP_ACK: u8 = 0xFE;

pub const PROTOCOL_VERSION: u16 = 0x01;

pub const RESPONSE_OK: u8 = 0x01;

pub const ERR_CLIENT_NOT_REGISTERED: u8 = 0x71;
pub const ERR_DATA: u8 = 0x72;
pub const ERR_IO: u8 = 0x73;
pub const ERR_OTHER: u8 = 0x74;
pub const ERR_NOT_SUPPORTED: u8 = 0x75;
pub const ERR_BUSY: u8 = 0x76;
pub const ERR_NOT_DELIVERED: u8 = 0x77;
pub const ERR_TIMEOUT: u8 = 0x78;
pub const ERR_ACCESS: u8 = 0x79;

pub const GREETINGS: [u8; 1] = [0xEB];

pub const DEFAULT_BUF_SIZE: usize = 8192;
pub const DEFAULT_QUEUE_SIZE: usize = 8192;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const PUB_TOPIC: &str = "sample/ipc/client/pub/topic";
pub const SUB_TOPIC: &str = "sample/ipc/client/sub/topic";
pub const SAMPLE_MESSAGE: &str = "sample message publisher";

pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);
pub const PUBLISH_GRACE: Duration = Duration::from_secs(1);
pub const WAIT_STEP: Duration = Duration::from_secs(10);

pub const EXIT_OK: i32 = 0;
pub const EXIT_SUBSCRIBE_FAILED: i32 = 1;
pub const EXIT_FAILED: i32 = -1;

/// When a frame is published with [`QoS::AtLeastOnce`], the Option contains a receiver of the
/// broker acknowledgement
///
/// ```rust,ignore
/// let confirm = client.publish("some/topic", payload, QoS::AtLeastOnce).await?;
/// if let Some(rx) = confirm {
///     rx.await??; // the broker has processed the frame
/// }
/// ```
pub type OpConfirm = Option<tokio::sync::oneshot::Receiver<Result<(), Error>>>;
pub type EventChannel = async_channel::Receiver<StreamEvent>;
pub type EventSender = async_channel::Sender<StreamEvent>;

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum ErrorKind {
    NotRegistered = ERR_CLIENT_NOT_REGISTERED,
    NotSupported = ERR_NOT_SUPPORTED,
    Io = ERR_IO,
    Timeout = ERR_TIMEOUT,
    Data = ERR_DATA,
    Busy = ERR_BUSY,
    NotDelivered = ERR_NOT_DELIVERED,
    Unauthorized = ERR_ACCESS,
    Other = ERR_OTHER,
    NotInitialized = 0xfe,
    Eof = 0xff,
}

impl From<u8> for ErrorKind {
    fn from(code: u8) -> Self {
        match code {
            ERR_CLIENT_NOT_REGISTERED => ErrorKind::NotRegistered,
            ERR_NOT_SUPPORTED => ErrorKind::NotSupported,
            ERR_IO => ErrorKind::Io,
            ERR_DATA => ErrorKind::Data,
            ERR_BUSY => ErrorKind::Busy,
            ERR_NOT_DELIVERED => ErrorKind::NotDelivered,
            ERR_TIMEOUT => ErrorKind::Timeout,
            ERR_ACCESS => ErrorKind::Unauthorized,
            _ => ErrorKind::Other,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ErrorKind::NotRegistered => "Client not registered",
                ErrorKind::NotSupported => "Feature not supported",
                ErrorKind::Io => "I/O Error",
                ErrorKind::Timeout => "Timeout",
                ErrorKind::Data => "Data Error",
                ErrorKind::Busy => "Busy",
                ErrorKind::NotDelivered => "Frame not delivered",
                ErrorKind::Unauthorized => "Access denied",
                ErrorKind::Other => "Error",
                ErrorKind::NotInitialized => "Client not initialized",
                ErrorKind::Eof => "Eof",
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.message {
            write!(f, "{}: {}", self.kind, message)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(kind: ErrorKind, message: Option<impl fmt::Display>) -> Self {
        Self {
            kind,
            message: message.map(|m| m.to_string()),
        }
    }
    pub fn io(e: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Io,
            message: Some(e.to_string()),
        }
    }
    pub fn data(e: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Data,
            message: Some(e.to_string()),
        }
    }
    pub fn not_supported(e: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::NotSupported,
            message: Some(e.to_string()),
        }
    }
    pub fn not_registered() -> Self {
        Self {
            kind: ErrorKind::NotRegistered,
            message: None,
        }
    }
    pub fn not_initialized(e: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::NotInitialized,
            message: Some(e.to_string()),
        }
    }
    pub fn unauthorized(e: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Unauthorized,
            message: Some(e.to_string()),
        }
    }
    pub fn busy(e: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Busy,
            message: Some(e.to_string()),
        }
    }
    pub fn timeout() -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: None,
        }
    }
    pub fn eof() -> Self {
        Self {
            kind: ErrorKind::Eof,
            message: None,
        }
    }
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub trait IntoIpcResult {
    fn to_ipc_result(self) -> Result<(), Error>;
}

impl IntoIpcResult for u8 {
    #[inline]
    fn to_ipc_result(self) -> Result<(), Error> {
        if self == RESPONSE_OK {
            Ok(())
        } else {
            Err(Error {
                kind: self.into(),
                message: None,
            })
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_e: tokio::time::error::Elapsed) -> Error {
        Error::timeout()
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::UnexpectedEof
            || e.kind() == std::io::ErrorKind::BrokenPipe
            || e.kind() == std::io::ErrorKind::ConnectionReset
        {
            Error::eof()
        } else {
            Error::io(e)
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Error {
        Error::data(e)
    }
}

impl From<std::array::TryFromSliceError> for Error {
    fn from(e: std::array::TryFromSliceError) -> Error {
        Error::data(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::data(e)
    }
}

impl<T> From<async_channel::SendError<T>> for Error {
    fn from(_e: async_channel::SendError<T>) -> Error {
        Error::eof()
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_e: tokio::sync::oneshot::error::RecvError) -> Error {
        Error::eof()
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum FrameOp {
    Nop = OP_NOP,
    PublishTopic = OP_PUBLISH,
    SubscribeTopic = OP_SUBSCRIBE,
    UnsubscribeTopic = OP_UNSUBSCRIBE,
}

/// Delivery guarantee
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

impl QoS {
    #[inline]
    pub fn needs_ack(self) -> bool {
        self == QoS::AtLeastOnce
    }
}

impl TryFrom<u8> for QoS {
    type Error = Error;
    fn try_from(q: u8) -> Result<Self, Error> {
        match q {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            _ => Err(Error::data(format!("Invalid QoS: {}", q))),
        }
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum FrameKind {
    Publish = OP_PUBLISH,
    Acknowledge = OP_ACK,
    Nop = OP_NOP,
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            OP_PUBLISH => Ok(FrameKind::Publish),
            OP_ACK => Ok(FrameKind::Acknowledge),
            OP_NOP => Ok(FrameKind::Nop),
            _ => Err(Error::data(format!("Invalid frame type: {:x}", code))),
        }
    }
}

/// A message delivered to a subscription
#[derive(Debug, Clone)]
pub struct Message {
    sender: String,
    topic: String,
    buf: Vec<u8>,
    payload_pos: usize,
}

impl Message {
    pub fn new(sender: String, topic: String, buf: Vec<u8>, payload_pos: usize) -> Self {
        Self {
            sender,
            topic,
            buf,
            payload_pos,
        }
    }
    #[inline]
    pub fn sender(&self) -> &str {
        &self.sender
    }
    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }
    #[inline]
    /// Messages keep the full incoming buffer + actual payload position
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.payload_pos..]
    }
}

/// Events pushed by a client into a subscription channel
#[derive(Debug)]
pub enum StreamEvent {
    Message(Message),
    Error(Error),
    Closed,
}

pub mod app;
pub mod client;
pub mod envelope;
pub mod ipc;
pub mod lifecycle;
pub mod logger;
pub mod publisher;
pub mod subscriber;
