//! PowerLine Modem client.
//!
//! [`Plm::new`] takes ownership of the byte port and runs a task that writes
//! one packet at a time, waits for its echo and fans received traffic out to
//! device connections and packet subscribers.

mod linkdb;
pub mod packet;

pub use linkdb::{LinkCommand, LinkingMode};
pub use packet::{Packet, PlmCommand};

use crate::address::{Address, DevCat};
use crate::connection::{Connection, ConnectionHandle, MessageRequest};
use crate::engine::EngineVersion;
use crate::error::InsteonError;
use crate::message::{EXTENDED_MSG_LEN, Message};
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, trace, warn};

/// Timeouts and queue sizes for a modem session.
#[derive(Debug, Clone)]
pub struct PlmConfig {
    /// How long to wait for the modem to echo a command.
    pub ack_timeout: Duration,
    /// How long a write to the port may take.
    pub write_timeout: Duration,
    /// How long to wait for a device reply or a link record.
    pub read_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for PlmConfig {
    fn default() -> Self {
        PlmConfig {
            ack_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(5),
            queue_depth: 16,
        }
    }
}

/// Identification returned by the modem's GetInfo command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlmInfo {
    pub address: Address,
    pub devcat: DevCat,
    pub firmware: u8,
}

impl fmt::Display for PlmInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PLM {} DevCat:{} Firmware:0x{:02x}",
            self.address, self.devcat, self.firmware
        )
    }
}

enum PlmRequest {
    Send {
        packet: Packet,
        reply: oneshot::Sender<Result<Packet, InsteonError>>,
    },
    Subscribe {
        commands: Vec<PlmCommand>,
        tx: mpsc::Sender<Packet>,
    },
    Route {
        address: Address,
        tx: mpsc::Sender<Message>,
    },
}

/// Handle to the modem task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Plm {
    requests: mpsc::Sender<PlmRequest>,
    upstream: mpsc::Sender<MessageRequest>,
    config: PlmConfig,
}

impl fmt::Debug for PlmRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlmRequest::Send { packet, .. } => write!(f, "Send({packet})"),
            PlmRequest::Subscribe { commands, .. } => write!(f, "Subscribe({commands:?})"),
            PlmRequest::Route { address, .. } => write!(f, "Route({address})"),
        }
    }
}

impl Plm {
    /// Start a modem session on `port`.
    pub fn new<P>(port: P, config: PlmConfig) -> Self
    where
        P: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (requests_tx, requests) = mpsc::channel(config.queue_depth);
        let (upstream_tx, upstream) = mpsc::channel(config.queue_depth);
        let (reader, writer) = tokio::io::split(port);
        let actor = PlmActor {
            reader,
            writer,
            buf: BytesMut::with_capacity(256),
            config: config.clone(),
            requests,
            upstream,
            requests_open: true,
            upstream_open: true,
            queue: VecDeque::new(),
            in_flight: None,
            subscribers: Vec::new(),
            routes: HashMap::new(),
        };
        tokio::spawn(actor.run());
        Plm {
            requests: requests_tx,
            upstream: upstream_tx,
            config,
        }
    }

    pub fn config(&self) -> &PlmConfig {
        &self.config
    }

    /// Write a packet and return the modem's echo. A NAK echo is an error.
    pub async fn send(&self, packet: Packet) -> Result<Packet, InsteonError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(PlmRequest::Send { packet, reply })
            .await
            .map_err(|_| InsteonError::ConnectionClosed)?;
        rx.await.map_err(|_| InsteonError::ConnectionClosed)?
    }

    /// [`Plm::send`], repeated up to `retries` more times while the modem
    /// NAKs, does not answer or cannot be written to.
    pub async fn retry(&self, packet: Packet, retries: usize) -> Result<Packet, InsteonError> {
        let mut attempt = 0;
        loop {
            match self.send(packet.clone()).await {
                Err(err) if (matches!(err, InsteonError::Nak) || err.is_timeout()) && attempt < retries => {
                    attempt += 1;
                    warn!("{} failed ({}), retry {}/{}", packet.command, err, attempt, retries);
                }
                result => return result,
            }
        }
    }

    /// Receive every packet with one of `commands`, other than echoes of our
    /// own requests.
    pub async fn subscribe(&self, commands: &[PlmCommand]) -> Result<mpsc::Receiver<Packet>, InsteonError> {
        let (tx, rx) = mpsc::channel(self.config.queue_depth);
        self.requests
            .send(PlmRequest::Subscribe {
                commands: commands.to_vec(),
                tx,
            })
            .await
            .map_err(|_| InsteonError::ConnectionClosed)?;
        Ok(rx)
    }

    /// Open a connection to a device. Dialing an address again replaces the
    /// previous connection, which then closes.
    pub async fn dial(&self, address: Address, version: EngineVersion) -> Result<ConnectionHandle, InsteonError> {
        let (tx, inbound) = mpsc::channel(self.config.queue_depth);
        self.requests
            .send(PlmRequest::Route { address, tx })
            .await
            .map_err(|_| InsteonError::ConnectionClosed)?;
        Ok(Connection::spawn(
            address,
            version,
            self.config.read_timeout,
            self.upstream.clone(),
            inbound,
        ))
    }

    pub async fn info(&self) -> Result<PlmInfo, InsteonError> {
        let echo = self.retry(Packet::command(PlmCommand::GetInfo), 3).await?;
        let data = echo.data();
        if data.len() < 6 {
            return Err(InsteonError::BufferTooShort {
                expected: 6,
                actual: data.len(),
            });
        }
        Ok(PlmInfo {
            address: Address([data[0], data[1], data[2]]),
            devcat: DevCat([data[3], data[4]]),
            firmware: data[5],
        })
    }
}

enum Reply {
    Packet(oneshot::Sender<Result<Packet, InsteonError>>),
    Message(oneshot::Sender<Result<(), InsteonError>>),
}

impl Reply {
    fn complete(self, result: Result<Packet, InsteonError>) {
        match self {
            Reply::Packet(tx) => {
                let _ = tx.send(result);
            }
            Reply::Message(tx) => {
                let _ = tx.send(result.map(|_| ()));
            }
        }
    }
}

struct Outbound {
    packet: Packet,
    reply: Reply,
}

struct InFlight {
    command: PlmCommand,
    reply: Reply,
    deadline: Instant,
}

struct PlmActor<P> {
    reader: ReadHalf<P>,
    writer: WriteHalf<P>,
    buf: BytesMut,
    config: PlmConfig,
    requests: mpsc::Receiver<PlmRequest>,
    upstream: mpsc::Receiver<MessageRequest>,
    requests_open: bool,
    upstream_open: bool,
    queue: VecDeque<Outbound>,
    in_flight: Option<InFlight>,
    subscribers: Vec<(Vec<PlmCommand>, mpsc::Sender<Packet>)>,
    routes: HashMap<Address, mpsc::Sender<Message>>,
}

impl<P> PlmActor<P>
where
    P: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(mut self) {
        info!("PLM session started");
        loop {
            if self.in_flight.is_none() {
                if let Some(outbound) = self.queue.pop_front() {
                    self.write(outbound).await;
                    continue;
                }
                if !self.requests_open && !self.upstream_open {
                    break;
                }
            }

            let deadline = self.in_flight.as_ref().map(|f| f.deadline);
            tokio::select! {
                read = self.reader.read_buf(&mut self.buf) => match read {
                    Ok(0) => {
                        info!("PLM port closed");
                        break;
                    }
                    Ok(_) => self.drain_frames(),
                    Err(err) => {
                        warn!("PLM read failed: {}", err);
                        break;
                    }
                },
                request = self.requests.recv(), if self.requests_open => match request {
                    Some(request) => self.handle(request),
                    None => self.requests_open = false,
                },
                request = self.upstream.recv(), if self.upstream_open => match request {
                    Some(request) => self.queue_message(request),
                    None => self.upstream_open = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(in_flight) = self.in_flight.take() {
                        debug!("no echo for {}", in_flight.command);
                        in_flight.reply.complete(Err(InsteonError::AckTimeout));
                    }
                }
            }
        }
        self.shutdown();
    }

    fn handle(&mut self, request: PlmRequest) {
        match request {
            PlmRequest::Send { packet, reply } => self.queue.push_back(Outbound {
                packet,
                reply: Reply::Packet(reply),
            }),
            PlmRequest::Subscribe { commands, tx } => self.subscribers.push((commands, tx)),
            PlmRequest::Route { address, tx } => {
                debug!("routing messages from {}", address);
                self.routes.insert(address, tx);
            }
        }
    }

    fn queue_message(&mut self, request: MessageRequest) {
        // the modem takes the message without the source address
        let encoded = request.encode();
        let packet = Packet::new(PlmCommand::SendInsteonMsg, encoded.slice(3..));
        self.queue.push_back(Outbound {
            packet,
            reply: Reply::Message(request.done),
        });
    }

    async fn write(&mut self, outbound: Outbound) {
        let bytes = outbound.packet.encode();
        trace!("-> {}", hex::encode(&bytes));
        let written = timeout(self.config.write_timeout, async {
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => {
                self.in_flight = Some(InFlight {
                    command: outbound.packet.command,
                    reply: outbound.reply,
                    deadline: Instant::now() + self.config.ack_timeout,
                });
            }
            Ok(Err(err)) => outbound.reply.complete(Err(err.into())),
            Err(_) => outbound.reply.complete(Err(InsteonError::WriteTimeout)),
        }
    }

    fn drain_frames(&mut self) {
        while let Some(packet) = packet::next_packet(&mut self.buf) {
            trace!("<- {}", packet);
            self.dispatch(packet);
        }
    }

    fn dispatch(&mut self, packet: Packet) {
        match packet.command {
            PlmCommand::StandardMessageReceived | PlmCommand::ExtendedMessageReceived => {
                self.route_message(&packet.payload)
            }
            command if command.is_host_command() => {
                let Some(in_flight) = self.in_flight.take_if(|f| f.command == command) else {
                    debug!("unexpected echo {}", packet);
                    return;
                };
                if packet.is_nak() {
                    in_flight.reply.complete(Err(InsteonError::Nak));
                } else {
                    in_flight.reply.complete(Ok(packet));
                }
                return;
            }
            _ => {}
        }
        self.publish(packet);
    }

    fn route_message(&mut self, payload: &Bytes) {
        let msg = match Message::decode(&payload[..payload.len().min(EXTENDED_MSG_LEN)]) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("dropping undecodable message: {}", err);
                return;
            }
        };
        let Some(tx) = self.routes.get(&msg.src) else {
            debug!("no connection for {}", msg);
            return;
        };
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => warn!("connection to {} is full, dropping {}", msg.src, msg),
            Err(TrySendError::Closed(msg)) => {
                self.routes.remove(&msg.src);
            }
        }
    }

    fn publish(&mut self, packet: Packet) {
        self.subscribers.retain(|(commands, tx)| {
            if !commands.contains(&packet.command) {
                return !tx.is_closed();
            }
            match tx.try_send(packet.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("subscriber is full, dropping {}", packet);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    fn shutdown(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.reply.complete(Err(InsteonError::ConnectionClosed));
        }
        for outbound in self.queue.drain(..) {
            outbound.reply.complete(Err(InsteonError::ConnectionClosed));
        }
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            if let PlmRequest::Send { reply, .. } = request {
                let _ = reply.send(Err(InsteonError::ConnectionClosed));
            }
        }
        self.upstream.close();
        while let Ok(request) = self.upstream.try_recv() {
            let _ = request.done.send(Err(InsteonError::ConnectionClosed));
        }
        self.routes.clear();
        self.subscribers.clear();
        info!("PLM session ended");
    }
}
