#![allow(dead_code)]
use async_trait::async_trait;
use edgeipc::client::{AsyncClient, ClientFactory, StreamHandle, Subscription};
use edgeipc::logger::MemoryLogger;
use edgeipc::{Error, ErrorKind, EventSender, Message, OpConfirm, QoS, StreamEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub enum Ack {
    Confirm,
    Never,
    Refuse(ErrorKind),
}

/// What the scripted clients do
#[derive(Clone)]
pub struct Script {
    /// builds with this sequence number (1-based) and later fail
    pub fail_build_from: Option<usize>,
    pub disconnected: bool,
    pub publish_error: Option<ErrorKind>,
    pub ack: Ack,
    pub subscribe_error: Option<ErrorKind>,
    /// subscriptions are returned without the event channel
    pub events_taken: bool,
    pub stream_close_error: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_build_from: None,
            disconnected: false,
            publish_error: None,
            ack: Ack::Confirm,
            subscribe_error: None,
            events_taken: false,
            stream_close_error: false,
        }
    }
}

/// What the scripted clients have been asked to do
#[derive(Default)]
pub struct Probe {
    pub builds: AtomicUsize,
    pub client_closes: AtomicUsize,
    pub stream_closes: AtomicUsize,
    pub published: Mutex<Vec<(String, Vec<u8>, QoS)>>,
    pub subscribed: Mutex<Vec<String>>,
    pub events: Mutex<Option<EventSender>>,
    pending_acks: Mutex<Vec<oneshot::Sender<Result<(), Error>>>>,
}

impl Probe {
    pub fn is_subscribed(&self) -> bool {
        !self.subscribed.lock().is_empty()
    }
    pub async fn push(&self, event: StreamEvent) {
        let tx = self.events.lock().clone().expect("not subscribed");
        tx.send(event).await.unwrap();
    }
}

pub struct ScriptedFactory {
    pub script: Script,
    pub probe: Arc<Probe>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            probe: <_>::default(),
        }
    }
}

#[async_trait]
impl ClientFactory for ScriptedFactory {
    type Client = ScriptedClient;
    async fn build(&self) -> Result<ScriptedClient, Error> {
        let n = self.probe.builds.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(from) = self.script.fail_build_from {
            if n >= from {
                return Err(Error::io("broker socket not found"));
            }
        }
        Ok(ScriptedClient {
            name: format!("scripted.{}", n),
            script: self.script.clone(),
            probe: self.probe.clone(),
            closed: false,
        })
    }
}

pub struct ScriptedClient {
    name: String,
    script: Script,
    probe: Arc<Probe>,
    closed: bool,
}

impl ScriptedClient {
    pub fn new(script: Script, probe: Arc<Probe>) -> Self {
        Self {
            name: "scripted".to_owned(),
            script,
            probe,
            closed: false,
        }
    }
}

#[async_trait]
impl AsyncClient for ScriptedClient {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<OpConfirm, Error> {
        if let Some(kind) = self.script.publish_error {
            return Err(Error::new(kind, Some("scripted publish error")));
        }
        self.probe
            .published
            .lock()
            .push((topic.to_owned(), payload, qos));
        if !qos.needs_ack() {
            return Ok(None);
        }
        let (tx, rx) = oneshot::channel();
        match self.script.ack {
            Ack::Confirm => tx.send(Ok(())).unwrap(),
            Ack::Never => self.probe.pending_acks.lock().push(tx),
            Ack::Refuse(kind) => tx.send(Err(Error::new(kind, None::<&str>))).unwrap(),
        }
        Ok(Some(rx))
    }
    async fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<Subscription, Error> {
        if let Some(kind) = self.script.subscribe_error {
            return Err(Error::new(kind, Some(topic)));
        }
        let (tx, rx) = async_channel::bounded(1024);
        self.probe.events.lock().replace(tx.clone());
        self.probe.subscribed.lock().push(topic.to_owned());
        let handle = ScriptedStream {
            tx,
            probe: self.probe.clone(),
            closed: AtomicBool::new(false),
            fail: self.script.stream_close_error,
        };
        let mut sub = Subscription::new(topic, rx, Box::new(handle));
        if self.script.events_taken {
            sub.take_event_channel();
        }
        Ok(sub)
    }
    async fn close(&mut self) -> Result<(), Error> {
        self.probe.client_closes.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(Error::io("already closed"));
        }
        self.closed = true;
        Ok(())
    }
    fn is_connected(&self) -> bool {
        !self.closed && !self.script.disconnected
    }
    fn get_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }
    fn get_name(&self) -> &str {
        &self.name
    }
}

struct ScriptedStream {
    tx: EventSender,
    probe: Arc<Probe>,
    closed: AtomicBool,
    fail: bool,
}

#[async_trait]
impl StreamHandle for ScriptedStream {
    async fn close(&self) -> Result<(), Error> {
        self.probe.stream_closes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::io("scripted stream close error"));
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _r = self.tx.send(StreamEvent::Closed).await;
        }
        Ok(())
    }
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub fn message(topic: &str, payload: &[u8]) -> StreamEvent {
    StreamEvent::Message(Message::new(
        "scripted.broker".to_owned(),
        topic.to_owned(),
        payload.to_vec(),
        0,
    ))
}

/// Polls until the condition is met, panics after a few seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition has not been met in time");
}

/// Cancels the token once the scripted client has subscribed
pub fn cancel_when_subscribed(probe: &Arc<Probe>, cancel: &CancellationToken) {
    let probe = probe.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for(|| probe.is_subscribed()).await;
        cancel.cancel();
    });
}

/// Waits for the log line, then cancels
pub fn cancel_when_logged(logger: &Arc<MemoryLogger>, pattern: &str, cancel: &CancellationToken) {
    let logger = logger.clone();
    let pattern = pattern.to_owned();
    let cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for(|| logger.contains(&pattern)).await;
        cancel.cancel();
    });
}
