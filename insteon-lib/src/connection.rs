//! Per-device connection actor.
//!
//! A [`Connection`] owns the conversation with one device: it queues
//! commands, keeps at most one of them in flight, matches the device's
//! Ack/Nak to it and bounds the whole exchange with a timeout. Callers talk
//! to it through a cloneable [`ConnectionHandle`].

use crate::address::Address;
use crate::command::Command;
use crate::engine::EngineVersion;
use crate::error::InsteonError;
use crate::message::Message;
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

const REQUEST_QUEUE_DEPTH: usize = 16;
const LISTENER_DEPTH: usize = 32;

/// A message to write to the bus, completed once the modem has taken it.
///
/// `version` is the engine of the destination device and decides how the
/// message is encoded on the wire.
#[derive(Debug)]
pub struct MessageRequest {
    pub message: Message,
    pub version: EngineVersion,
    pub done: oneshot::Sender<Result<(), InsteonError>>,
}

impl MessageRequest {
    pub fn new(message: Message, version: EngineVersion) -> (Self, oneshot::Receiver<Result<(), InsteonError>>) {
        let (done, rx) = oneshot::channel();
        (MessageRequest { message, version, done }, rx)
    }

    /// Wire bytes of the message, checksum applied when the engine checks it.
    pub fn encode(&self) -> Bytes {
        self.message.encode_for(self.version)
    }
}

/// Receives the non Ack traffic that follows a command.
#[derive(Debug)]
pub struct Listener {
    filter: Vec<Command>,
    tx: mpsc::Sender<Message>,
}

impl Listener {
    fn wants(&self, msg: &Message) -> bool {
        self.filter.is_empty() || self.filter.contains(&msg.command)
    }
}

/// A command for the device, completed with its Ack or an error.
#[derive(Debug)]
pub struct CommandRequest {
    pub command: Command,
    pub payload: Vec<u8>,
    listener: Option<Listener>,
    reply: oneshot::Sender<Result<Message, InsteonError>>,
}

impl CommandRequest {
    pub fn new(command: Command, payload: Vec<u8>) -> (Self, oneshot::Receiver<Result<Message, InsteonError>>) {
        let (reply, rx) = oneshot::channel();
        let request = CommandRequest {
            command,
            payload,
            listener: None,
            reply,
        };
        (request, rx)
    }

    /// Attach a listener for follow-up messages whose command is in `filter`
    /// (every message when `filter` is empty).
    pub fn listen(&mut self, filter: &[Command]) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(LISTENER_DEPTH);
        self.listener = Some(Listener {
            filter: filter.to_vec(),
            tx,
        });
        rx
    }

    fn fail(self, err: InsteonError) {
        let _ = self.reply.send(Err(err));
    }
}

#[derive(Debug)]
enum Request {
    Command(CommandRequest),
    Close,
}

pub struct Connection {
    address: Address,
    version: EngineVersion,
    timeout: Duration,
    queue: VecDeque<CommandRequest>,
    pending: Option<oneshot::Sender<Result<Message, InsteonError>>>,
    listener: Option<Listener>,
    upstream: mpsc::Sender<MessageRequest>,
    inbound: mpsc::Receiver<Message>,
    requests: mpsc::Receiver<Request>,
    closed: bool,
}

impl Connection {
    pub fn new(
        address: Address,
        version: EngineVersion,
        timeout: Duration,
        upstream: mpsc::Sender<MessageRequest>,
        inbound: mpsc::Receiver<Message>,
    ) -> (Self, ConnectionHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let connection = Connection {
            address,
            version,
            timeout,
            queue: VecDeque::new(),
            pending: None,
            listener: None,
            upstream,
            inbound,
            requests,
            closed: false,
        };
        let handle = ConnectionHandle {
            address,
            version,
            timeout,
            requests: tx,
        };
        (connection, handle)
    }

    /// Create a connection and run it on its own task.
    pub fn spawn(
        address: Address,
        version: EngineVersion,
        timeout: Duration,
        upstream: mpsc::Sender<MessageRequest>,
        inbound: mpsc::Receiver<Message>,
    ) -> ConnectionHandle {
        let (connection, handle) = Connection::new(address, version, timeout, upstream, inbound);
        tokio::spawn(connection.run());
        handle
    }

    pub fn enqueue(&mut self, request: CommandRequest) {
        if self.closed {
            request.fail(InsteonError::ConnectionClosed);
        } else {
            self.queue.push_back(request);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Write the head of the queue upstream and wait for the modem to take it.
    pub async fn send(&mut self) {
        let Some(request) = self.queue.pop_front() else {
            return;
        };

        let (command, payload) = self.version.prepare(request.command, &request.payload);
        let message = Message::direct(self.address, command, payload);

        self.listener = request.listener;
        self.pending = Some(request.reply);

        debug!("{} -> {}", self.address, message);
        let (upstream_request, done) = MessageRequest::new(message, self.version);
        let result = match self.upstream.send(upstream_request).await {
            Ok(()) => done.await.unwrap_or(Err(InsteonError::ConnectionClosed)),
            Err(_) => Err(InsteonError::ConnectionClosed),
        };

        if let Err(err) = result {
            debug!("{} write failed: {}", self.address, err);
            self.complete(Err(err));
        }
    }

    /// Handle one message received from the bus.
    pub fn receive(&mut self, msg: Message) {
        if msg.src != self.address {
            trace!("{} dropping message from {}", self.address, msg.src);
            return;
        }

        if msg.is_ack() || msg.is_nak() {
            if self.pending.is_none() {
                debug!("{} unsolicited {}", self.address, msg);
            } else if msg.is_nak() {
                self.listener = None;
                let err = self.version.classify_nak(msg.command.cmd2());
                debug!("{} nak: {}", self.address, err);
                self.complete(Err(err));
            } else {
                self.complete(Ok(msg));
            }
            return;
        }

        let Some(listener) = &self.listener else {
            trace!("{} no listener for {}", self.address, msg);
            return;
        };
        if !listener.wants(&msg) {
            return;
        }
        match listener.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => warn!("{} listener is full, dropping {}", self.address, msg),
            Err(TrySendError::Closed(_)) => self.listener = None,
        }
    }

    /// Service the head of the queue: send it and wait for the reply, bounded
    /// by the connection timeout.
    pub async fn process(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let timeout = self.timeout;
        if tokio::time::timeout(timeout, self.exchange()).await.is_err() {
            debug!("{} timed out after {:?}", self.address, timeout);
            self.complete(Err(InsteonError::ReadTimeout));
        }
    }

    async fn exchange(&mut self) {
        self.send().await;
        while self.pending.is_some() {
            match self.inbound.recv().await {
                Some(msg) => self.receive(msg),
                None => self.complete(Err(InsteonError::ConnectionClosed)),
            }
        }
    }

    fn complete(&mut self, result: Result<Message, InsteonError>) {
        if let Some(reply) = self.pending.take() {
            let _ = reply.send(result);
        }
    }

    pub async fn run(mut self) {
        info!("{} connection started ({})", self.address, self.version);
        'run: loop {
            loop {
                match self.requests.try_recv() {
                    Ok(Request::Command(request)) => self.enqueue(request),
                    Ok(Request::Close) => break 'run,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }

            if !self.queue.is_empty() {
                self.process().await;
                continue;
            }

            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(Request::Command(request)) => self.enqueue(request),
                    Some(Request::Close) | None => break,
                },
                msg = self.inbound.recv() => match msg {
                    Some(msg) => self.receive(msg),
                    None => break,
                },
            }
        }
        self.close();
    }

    /// Release every waiter with `ConnectionClosed`. Safe to call twice.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.complete(Err(InsteonError::ConnectionClosed));
        for request in self.queue.drain(..) {
            request.fail(InsteonError::ConnectionClosed);
        }
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            if let Request::Command(request) = request {
                request.fail(InsteonError::ConnectionClosed);
            }
        }
        self.inbound.close();
        self.listener = None;
        info!("{} connection closed", self.address);
    }
}

/// Caller side of a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    address: Address,
    version: EngineVersion,
    timeout: Duration,
    requests: mpsc::Sender<Request>,
}

impl ConnectionHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn engine_version(&self) -> EngineVersion {
        self.version
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn submit(&self, request: CommandRequest) -> Result<(), InsteonError> {
        self.requests
            .send(Request::Command(request))
            .await
            .map_err(|_| InsteonError::ConnectionClosed)
    }

    /// Send a command and wait for the device's Ack.
    pub async fn send(&self, command: Command, payload: &[u8]) -> Result<Message, InsteonError> {
        let (request, reply) = CommandRequest::new(command, payload.to_vec());
        self.submit(request).await?;
        reply.await.map_err(|_| InsteonError::ConnectionClosed)?
    }

    /// Send a command and, once it is acknowledged, return the stream of
    /// follow-up messages matching `filter`.
    pub async fn send_and_listen(
        &self,
        command: Command,
        payload: &[u8],
        filter: &[Command],
    ) -> Result<mpsc::Receiver<Message>, InsteonError> {
        let (mut request, reply) = CommandRequest::new(command, payload.to_vec());
        let rx = request.listen(filter);
        self.submit(request).await?;
        reply.await.map_err(|_| InsteonError::ConnectionClosed)??;
        Ok(rx)
    }

    pub async fn close(&self) {
        let _ = self.requests.send(Request::Close).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CMD_ENTER_LINKING_MODE_EXT, CMD_LIGHT_OFF, CMD_LIGHT_ON, CMD_PING, CMD_READ_WRITE_ALDB};
    use crate::message::Flags;

    const ADDR: Address = Address::new(1, 2, 3);

    fn reply_from(src: Address, flags: Flags, command: Command) -> Message {
        Message {
            src,
            dst: Address::new(0xaa, 0xbb, 0xcc),
            flags,
            command,
            payload: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn process_times_out_without_upstream() {
        let (upstream, _upstream_rx) = mpsc::channel(1);
        let (_inbound_tx, inbound) = mpsc::channel(1);
        let (mut conn, _handle) =
            Connection::new(ADDR, EngineVersion::I1, Duration::from_secs(1), upstream, inbound);

        let (request, reply) = CommandRequest::new(CMD_PING, Vec::new());
        conn.enqueue(request);
        conn.process().await;

        assert!(matches!(reply.await.unwrap(), Err(InsteonError::ReadTimeout)));
        assert_eq!(conn.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn process_on_empty_queue_is_noop() {
        let (upstream, mut upstream_rx) = mpsc::channel(1);
        let (_inbound_tx, inbound) = mpsc::channel(1);
        let (mut conn, _handle) =
            Connection::new(ADDR, EngineVersion::I1, Duration::from_secs(1), upstream, inbound);

        conn.process().await;
        assert!(upstream_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn ack_completes_request() {
        let (upstream, mut upstream_rx) = mpsc::channel::<MessageRequest>(1);
        let (inbound_tx, inbound) = mpsc::channel(4);
        let handle = Connection::spawn(ADDR, EngineVersion::I2, Duration::from_secs(1), upstream, inbound);

        tokio::spawn(async move {
            while let Some(request) = upstream_rx.recv().await {
                assert_eq!(request.message.dst, ADDR);
                assert_eq!(request.message.flags, Flags::STANDARD_DIRECT);
                let _ = request.done.send(Ok(()));
                // traffic for another device must be ignored
                let other = reply_from(Address::new(9, 9, 9), Flags::STANDARD_DIRECT_ACK, CMD_LIGHT_ON);
                inbound_tx.send(other).await.unwrap();
                let ack = reply_from(ADDR, Flags::STANDARD_DIRECT_ACK, CMD_LIGHT_ON);
                inbound_tx.send(ack).await.unwrap();
            }
        });

        let ack = handle.send(CMD_LIGHT_ON, &[]).await.unwrap();
        assert_eq!(ack.src, ADDR);
        assert!(ack.is_ack());
    }

    #[tokio::test(start_paused = true)]
    async fn nak_is_classified_by_engine() {
        for (version, cmd2, expected) in [
            (EngineVersion::I2Cs, 0xfb, "Illegal value in command"),
            (EngineVersion::I1, 0xff, "Not in All-Link group"),
        ] {
            let (upstream, mut upstream_rx) = mpsc::channel::<MessageRequest>(1);
            let (inbound_tx, inbound) = mpsc::channel(4);
            let handle = Connection::spawn(ADDR, version, Duration::from_secs(1), upstream, inbound);

            tokio::spawn(async move {
                let request = upstream_rx.recv().await.unwrap();
                let _ = request.done.send(Ok(()));
                let nak = reply_from(ADDR, Flags::STANDARD_DIRECT_NAK, CMD_PING.sub_command(cmd2));
                inbound_tx.send(nak).await.unwrap();
            });

            let err = handle.send(CMD_PING, &[]).await.unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_error_completes_request() {
        let (upstream, mut upstream_rx) = mpsc::channel::<MessageRequest>(1);
        let (_inbound_tx, inbound) = mpsc::channel(4);
        let handle = Connection::spawn(ADDR, EngineVersion::I1, Duration::from_secs(1), upstream, inbound);

        tokio::spawn(async move {
            let request = upstream_rx.recv().await.unwrap();
            let _ = request.done.send(Err(InsteonError::Nak));
        });

        assert!(matches!(handle.send(CMD_PING, &[]).await, Err(InsteonError::Nak)));
    }

    #[tokio::test(start_paused = true)]
    async fn i2cs_extended_message_carries_checksum() {
        let (upstream, mut upstream_rx) = mpsc::channel::<MessageRequest>(1);
        let (inbound_tx, inbound) = mpsc::channel(4);
        let handle = Connection::spawn(ADDR, EngineVersion::I2Cs, Duration::from_secs(1), upstream, inbound);

        let writer = tokio::spawn(async move {
            let request = upstream_rx.recv().await.unwrap();
            let wire = request.encode();
            let version = request.version;
            let _ = request.done.send(Ok(()));
            let ack = reply_from(ADDR, Flags::STANDARD_DIRECT_ACK, CMD_ENTER_LINKING_MODE_EXT);
            inbound_tx.send(ack).await.unwrap();
            (version, wire)
        });

        handle
            .send(CMD_ENTER_LINKING_MODE_EXT.sub_command(1), &[0; 14])
            .await
            .unwrap();
        let (version, wire) = writer.await.unwrap();
        assert_eq!(version, EngineVersion::I2Cs);
        assert_eq!(wire.len(), 23);
        assert_eq!(wire[6], Flags::EXTENDED_DIRECT.0);
        assert_eq!(wire[22], 0xf6);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_gets_follow_up_messages() {
        let (upstream, mut upstream_rx) = mpsc::channel::<MessageRequest>(1);
        let (inbound_tx, inbound) = mpsc::channel(4);
        let handle = Connection::spawn(ADDR, EngineVersion::I2, Duration::from_secs(1), upstream, inbound);

        tokio::spawn(async move {
            let request = upstream_rx.recv().await.unwrap();
            let _ = request.done.send(Ok(()));
            let ack = reply_from(ADDR, Flags::STANDARD_DIRECT_ACK, CMD_READ_WRITE_ALDB);
            inbound_tx.send(ack).await.unwrap();
            let unrelated = reply_from(ADDR, Flags::STANDARD_DIRECT, CMD_LIGHT_ON);
            inbound_tx.send(unrelated).await.unwrap();
            let mut record = reply_from(ADDR, Flags::EXTENDED_DIRECT, CMD_READ_WRITE_ALDB);
            record.payload = vec![0; 14];
            inbound_tx.send(record).await.unwrap();
        });

        let mut rx = handle
            .send_and_listen(CMD_READ_WRITE_ALDB, &[0; 14], &[CMD_READ_WRITE_ALDB])
            .await
            .unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.command, CMD_READ_WRITE_ALDB);
        assert!(msg.flags.is_extended());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_go_upstream_one_at_a_time_in_order() {
        let (upstream, mut upstream_rx) = mpsc::channel::<MessageRequest>(4);
        let (inbound_tx, inbound) = mpsc::channel(4);
        let handle = Connection::spawn(ADDR, EngineVersion::I1, Duration::from_secs(1), upstream, inbound);

        let modem = tokio::spawn(async move {
            let mut seen = Vec::new();

            // answered with an Ack
            let request = upstream_rx.recv().await.unwrap();
            seen.push(request.message.command.bytes());
            let _ = request.done.send(Ok(()));
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(upstream_rx.try_recv().is_err(), "next request forwarded before the Ack");
            inbound_tx
                .send(reply_from(ADDR, Flags::STANDARD_DIRECT_ACK, CMD_PING))
                .await
                .unwrap();

            // never answered
            let request = upstream_rx.recv().await.unwrap();
            seen.push(request.message.command.bytes());
            let _ = request.done.send(Ok(()));
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert!(upstream_rx.try_recv().is_err(), "next request forwarded before the timeout");

            let request = upstream_rx.recv().await.unwrap();
            seen.push(request.message.command.bytes());
            let _ = request.done.send(Ok(()));
            inbound_tx
                .send(reply_from(ADDR, Flags::STANDARD_DIRECT_ACK, CMD_LIGHT_OFF))
                .await
                .unwrap();
            seen
        });

        let (first, second, third) = tokio::join!(
            handle.send(CMD_PING, &[]),
            handle.send(CMD_LIGHT_ON, &[]),
            handle.send(CMD_LIGHT_OFF, &[]),
        );

        assert_eq!(first.unwrap().command, CMD_PING);
        assert!(matches!(second, Err(InsteonError::ReadTimeout)));
        assert_eq!(third.unwrap().command, CMD_LIGHT_OFF);
        assert_eq!(
            modem.await.unwrap(),
            vec![[0x00, 0x0f, 0x00], [0x00, 0x11, 0xff], [0x00, 0x13, 0x00]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_releases_every_waiter() {
        let (upstream, _upstream_rx) = mpsc::channel(1);
        let (_inbound_tx, inbound) = mpsc::channel(1);
        let (mut conn, _handle) =
            Connection::new(ADDR, EngineVersion::I1, Duration::from_secs(1), upstream, inbound);

        let (first, first_reply) = CommandRequest::new(CMD_PING, Vec::new());
        let (second, second_reply) = CommandRequest::new(CMD_LIGHT_ON, Vec::new());
        conn.enqueue(first);
        conn.enqueue(second);

        conn.close();
        conn.close();

        assert!(matches!(first_reply.await.unwrap(), Err(InsteonError::ConnectionClosed)));
        assert!(matches!(second_reply.await.unwrap(), Err(InsteonError::ConnectionClosed)));

        let (late, late_reply) = CommandRequest::new(CMD_PING, Vec::new());
        conn.enqueue(late);
        assert!(matches!(late_reply.await.unwrap(), Err(InsteonError::ConnectionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_fails_after_close() {
        let (upstream, _upstream_rx) = mpsc::channel(1);
        let (_inbound_tx, inbound) = mpsc::channel(1);
        let handle = Connection::spawn(ADDR, EngineVersion::I1, Duration::from_secs(1), upstream, inbound);

        handle.close().await;
        tokio::task::yield_now().await;
        assert!(matches!(
            handle.send(CMD_PING, &[]).await,
            Err(InsteonError::ConnectionClosed)
        ));
    }
}
