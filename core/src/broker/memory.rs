//! In-process broker
//!
//! Keeps named destinations as FIFO queues in memory. Besides serving tests
//! and demos it counts every open handle and can inject a failure at any
//! acquisition or send step, which makes resource-leak checks possible.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arcstr::ArcStr;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{
	AcknowledgeMode, BrokerError, BrokerResult, Connection, ConnectionFactory,
	Credentials, Destination, DestinationKind, MessageProducer, QueueBrowser,
	Session,
};
use crate::message::{DeliverySettings, OutgoingMessage};

/// Step at which [`MemoryBroker::fail_next`] injects a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
	/// `ConnectionFactory::create_connection`
	CreateConnection,
	/// `Connection::create_session`
	CreateSession,
	/// `Session::create_producer`
	CreateProducer,
	/// `Connection::start`
	StartConnection,
	/// `MessageProducer::apply_settings`
	ApplySettings,
	/// `MessageProducer::send`
	Send,
	/// `Session::create_browser` and `QueueBrowser::depth`
	Browse,
	/// `Session::commit`
	Commit,
	/// `Connection::stop`
	StopConnection,
	/// `MessageProducer::close`
	CloseProducer,
	/// `Session::close`
	CloseSession,
	/// `Connection::close`
	CloseConnection,
}

/// Number of handles currently open on a [`MemoryBroker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenHandles {
	/// Open connections
	pub connections: usize,
	/// Open sessions
	pub sessions: usize,
	/// Open producers
	pub producers: usize,
	/// Open browsers
	pub browsers: usize,
}

impl OpenHandles {
	/// Whether every handle has been closed.
	pub fn is_empty(&self) -> bool {
		*self == Self::default()
	}
}

/// A message as stored by the broker.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
	id: String,
	destination: ArcStr,
	message: OutgoingMessage,
	sent_at: SystemTime,
	expires_at: Option<Instant>,
}

impl ReceivedMessage {
	/// Broker-assigned message id.
	pub fn id(&self) -> &str {
		&self.id
	}

	/// Destination the message was sent to.
	pub fn destination(&self) -> &ArcStr {
		&self.destination
	}

	/// The message with the headers stamped by its producer.
	pub fn message(&self) -> &OutgoingMessage {
		&self.message
	}

	/// Wall-clock send time.
	pub fn sent_at(&self) -> SystemTime {
		self.sent_at
	}

	/// Expiry instant, `None` when the message never expires.
	pub fn expires_at(&self) -> Option<Instant> {
		self.expires_at
	}

	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| at <= now)
	}
}

#[derive(Debug)]
struct StoredDestination {
	kind: DestinationKind,
	messages: VecDeque<ReceivedMessage>,
}

impl StoredDestination {
	fn new(kind: DestinationKind) -> Self {
		Self {
			kind,
			messages: VecDeque::new(),
		}
	}

	fn purge_expired(&mut self) {
		let now = Instant::now();
		let before = self.messages.len();
		self.messages.retain(|m| !m.is_expired(now));
		let expired = before - self.messages.len();
		if expired > 0 {
			debug!(expired, "Purged expired messages");
		}
	}
}

#[derive(Debug, Default)]
struct BrokerState {
	destinations: Mutex<HashMap<ArcStr, StoredDestination>>,
	required_credentials: Mutex<Option<Credentials>>,
	faults: Mutex<HashSet<FaultPoint>>,
	connections: AtomicUsize,
	sessions: AtomicUsize,
	producers: AtomicUsize,
	browsers: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
enum HandleKind {
	Connection,
	Session,
	Producer,
	Browser,
}

impl HandleKind {
	fn label(self) -> &'static str {
		match self {
			| HandleKind::Connection => "connection",
			| HandleKind::Session => "session",
			| HandleKind::Producer => "producer",
			| HandleKind::Browser => "browser",
		}
	}
}

/// Open/closed bookkeeping shared by every handle type.
#[derive(Debug)]
struct Tracked {
	kind: HandleKind,
	closed: AtomicBool,
	state: Arc<BrokerState>,
}

impl Tracked {
	fn open(kind: HandleKind, state: &Arc<BrokerState>) -> Self {
		state.counter(kind).fetch_add(1, Ordering::SeqCst);
		Self {
			kind,
			closed: AtomicBool::new(false),
			state: state.clone(),
		}
	}

	fn ensure_open(&self) -> BrokerResult<()> {
		if self.closed.load(Ordering::SeqCst) {
			Err(BrokerError::Closed(self.kind.label()))
		} else {
			Ok(())
		}
	}

	/// Marks the handle closed; only the first call decrements the count.
	fn release(&self) {
		if !self.closed.swap(true, Ordering::SeqCst) {
			self.state.counter(self.kind).fetch_sub(1, Ordering::SeqCst);
		}
	}
}

impl BrokerState {
	fn counter(&self, kind: HandleKind) -> &AtomicUsize {
		match kind {
			| HandleKind::Connection => &self.connections,
			| HandleKind::Session => &self.sessions,
			| HandleKind::Producer => &self.producers,
			| HandleKind::Browser => &self.browsers,
		}
	}

	fn check_fault(&self, point: FaultPoint) -> BrokerResult<()> {
		if self.faults.lock().remove(&point) {
			Err(BrokerError::Transport(format!("injected fault at {point:?}")))
		} else {
			Ok(())
		}
	}

	fn deliver(&self, messages: Vec<ReceivedMessage>) {
		let mut destinations = self.destinations.lock();
		for message in messages {
			destinations
				.entry(message.destination.clone())
				.or_insert_with(|| StoredDestination::new(DestinationKind::Queue))
				.messages
				.push_back(message);
		}
	}
}

/// Process-local broker; clones share the same destinations.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
	state: Arc<BrokerState>,
}

impl MemoryBroker {
	/// Creates an empty broker.
	pub fn new() -> Self {
		Self::default()
	}

	/// Declares a queue and returns it.
	pub fn queue(&self, name: impl Into<ArcStr>) -> Destination {
		self.declare(Destination::queue(name))
	}

	/// Declares a topic and returns it.
	pub fn topic(&self, name: impl Into<ArcStr>) -> Destination {
		self.declare(Destination::topic(name))
	}

	fn declare(&self, destination: Destination) -> Destination {
		self.state
			.destinations
			.lock()
			.entry(destination.name().clone())
			.or_insert_with(|| StoredDestination::new(destination.kind()));
		destination
	}

	/// Rejects connections that do not present `credentials`.
	pub fn require_credentials(&self, credentials: Credentials) {
		*self.state.required_credentials.lock() = Some(credentials);
	}

	/// Connection factory for this broker.
	pub fn connection_factory(&self) -> MemoryConnectionFactory {
		MemoryConnectionFactory {
			broker: self.clone(),
		}
	}

	/// Makes the next operation at `point` fail once.
	pub fn fail_next(&self, point: FaultPoint) {
		self.state.faults.lock().insert(point);
	}

	/// Currently open handles.
	pub fn open_handles(&self) -> OpenHandles {
		OpenHandles {
			connections: self.state.connections.load(Ordering::SeqCst),
			sessions: self.state.sessions.load(Ordering::SeqCst),
			producers: self.state.producers.load(Ordering::SeqCst),
			browsers: self.state.browsers.load(Ordering::SeqCst),
		}
	}

	/// Number of unexpired messages pending on `name`.
	pub fn depth(&self, name: &str) -> usize {
		let mut destinations = self.state.destinations.lock();
		destinations.get_mut(name).map_or(0, |d| {
			d.purge_expired();
			d.messages.len()
		})
	}

	/// Removes and returns the oldest unexpired message on `name`.
	pub fn receive(&self, name: &str) -> Option<ReceivedMessage> {
		let mut destinations = self.state.destinations.lock();
		let destination = destinations.get_mut(name)?;
		destination.purge_expired();
		destination.messages.pop_front()
	}

	/// Removes and returns every unexpired message on `name`.
	pub fn drain(&self, name: &str) -> Vec<ReceivedMessage> {
		let mut destinations = self.state.destinations.lock();
		destinations.get_mut(name).map_or_else(Vec::new, |d| {
			d.purge_expired();
			d.messages.drain(..).collect()
		})
	}

	/// Discards every message on `name`.
	pub fn clear(&self, name: &str) {
		if let Some(d) = self.state.destinations.lock().get_mut(name) {
			d.messages.clear();
		}
	}

	/// Places a message on `destination` directly, bypassing producers.
	pub fn inject(&self, destination: &Destination, message: OutgoingMessage) {
		self.state.deliver(vec![new_received(destination, message)]);
	}

	fn kind_of(&self, name: &str) -> Option<DestinationKind> {
		self.state.destinations.lock().get(name).map(|d| d.kind)
	}
}

fn new_received(
	destination: &Destination,
	message: OutgoingMessage,
) -> ReceivedMessage {
	let ttl = message.time_to_live();
	ReceivedMessage {
		id: format!("ID:{}", Uuid::new_v4()),
		destination: destination.name().clone(),
		expires_at: (!ttl.is_zero()).then(|| Instant::now() + ttl),
		sent_at: SystemTime::now(),
		message,
	}
}

/// Connection factory of a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryConnectionFactory {
	broker: MemoryBroker,
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
	async fn create_connection(
		&self,
		credentials: Option<&Credentials>,
	) -> BrokerResult<Box<dyn Connection>> {
		let state = &self.broker.state;
		state.check_fault(FaultPoint::CreateConnection)?;
		if let Some(required) = state.required_credentials.lock().as_ref() {
			if credentials != Some(required) {
				return Err(BrokerError::Authentication {
					principal: credentials
						.map(|c| c.principal().to_string())
						.unwrap_or_default(),
				});
			}
		}
		Ok(Box::new(MemoryConnection {
			broker: self.broker.clone(),
			handle: Tracked::open(HandleKind::Connection, state),
		}))
	}
}

/// Start and stop only gate consumption, so producers send either way.
struct MemoryConnection {
	broker: MemoryBroker,
	handle: Tracked,
}

#[async_trait]
impl Connection for MemoryConnection {
	async fn create_session(
		&self,
		transacted: bool,
		acknowledge_mode: AcknowledgeMode,
	) -> BrokerResult<Box<dyn Session>> {
		self.handle.ensure_open()?;
		self.broker.state.check_fault(FaultPoint::CreateSession)?;
		debug!(transacted, %acknowledge_mode, "Opening in-memory session");
		Ok(Box::new(MemorySession {
			broker: self.broker.clone(),
			pending: transacted.then(|| Arc::new(Mutex::new(Vec::new()))),
			handle: Tracked::open(HandleKind::Session, &self.broker.state),
		}))
	}

	async fn start(&self) -> BrokerResult<()> {
		self.handle.ensure_open()?;
		self.broker.state.check_fault(FaultPoint::StartConnection)
	}

	async fn stop(&self) -> BrokerResult<()> {
		self.handle.ensure_open()?;
		self.broker.state.check_fault(FaultPoint::StopConnection)
	}

	async fn close(&self) -> BrokerResult<()> {
		let result = self.broker.state.check_fault(FaultPoint::CloseConnection);
		self.handle.release();
		result
	}
}

type PendingSends = Arc<Mutex<Vec<ReceivedMessage>>>;

struct MemorySession {
	broker: MemoryBroker,
	pending: Option<PendingSends>,
	handle: Tracked,
}

#[async_trait]
impl Session for MemorySession {
	async fn create_producer(
		&self,
		destination: &Destination,
	) -> BrokerResult<Box<dyn MessageProducer>> {
		self.handle.ensure_open()?;
		self.broker.state.check_fault(FaultPoint::CreateProducer)?;
		Ok(Box::new(MemoryProducer {
			broker: self.broker.clone(),
			destination: destination.clone(),
			settings: DeliverySettings::default(),
			pending: self.pending.clone(),
			handle: Tracked::open(HandleKind::Producer, &self.broker.state),
		}))
	}

	async fn create_browser(
		&self,
		destination: &Destination,
	) -> BrokerResult<Option<Box<dyn QueueBrowser>>> {
		self.handle.ensure_open()?;
		self.broker.state.check_fault(FaultPoint::Browse)?;
		let kind = self
			.broker
			.kind_of(destination.name())
			.unwrap_or(destination.kind());
		if kind != DestinationKind::Queue {
			return Ok(None);
		}
		Ok(Some(Box::new(MemoryBrowser {
			broker: self.broker.clone(),
			name: destination.name().clone(),
			handle: Tracked::open(HandleKind::Browser, &self.broker.state),
		})))
	}

	fn is_transacted(&self) -> bool {
		self.pending.is_some()
	}

	async fn commit(&self) -> BrokerResult<()> {
		self.handle.ensure_open()?;
		let pending = self.pending.as_ref().ok_or_else(|| {
			BrokerError::Unsupported("commit on a non-transacted session".into())
		})?;
		self.broker.state.check_fault(FaultPoint::Commit)?;
		let messages = std::mem::take(&mut *pending.lock());
		self.broker.state.deliver(messages);
		Ok(())
	}

	async fn rollback(&self) -> BrokerResult<()> {
		self.handle.ensure_open()?;
		let pending = self.pending.as_ref().ok_or_else(|| {
			BrokerError::Unsupported(
				"rollback on a non-transacted session".into(),
			)
		})?;
		pending.lock().clear();
		Ok(())
	}

	async fn close(&self) -> BrokerResult<()> {
		if let Some(pending) = &self.pending {
			let discarded = std::mem::take(&mut *pending.lock()).len();
			if discarded > 0 {
				debug!(discarded, "Discarding uncommitted sends on session close");
			}
		}
		let result = self.broker.state.check_fault(FaultPoint::CloseSession);
		self.handle.release();
		result
	}
}

struct MemoryProducer {
	broker: MemoryBroker,
	destination: Destination,
	settings: DeliverySettings,
	pending: Option<PendingSends>,
	handle: Tracked,
}

#[async_trait]
impl MessageProducer for MemoryProducer {
	fn apply_settings(&mut self, settings: DeliverySettings) -> BrokerResult<()> {
		self.handle.ensure_open()?;
		self.broker.state.check_fault(FaultPoint::ApplySettings)?;
		self.settings = settings;
		Ok(())
	}

	async fn send(&self, mut message: OutgoingMessage) -> BrokerResult<()> {
		self.handle.ensure_open()?;
		self.broker.state.check_fault(FaultPoint::Send)?;
		message.stamp(&self.settings);
		let received = new_received(&self.destination, message);
		match &self.pending {
			| Some(pending) => pending.lock().push(received),
			| None => self.broker.state.deliver(vec![received]),
		}
		Ok(())
	}

	async fn close(&self) -> BrokerResult<()> {
		let result = self.broker.state.check_fault(FaultPoint::CloseProducer);
		self.handle.release();
		result
	}
}

struct MemoryBrowser {
	broker: MemoryBroker,
	name: ArcStr,
	handle: Tracked,
}

#[async_trait]
impl QueueBrowser for MemoryBrowser {
	async fn depth(&self) -> BrokerResult<usize> {
		self.handle.ensure_open()?;
		self.broker.state.check_fault(FaultPoint::Browse)?;
		let mut destinations = self.broker.state.destinations.lock();
		Ok(destinations.get_mut(self.name.as_str()).map_or(0, |d| {
			d.purge_expired();
			d.messages.iter().count()
		}))
	}

	async fn close(&self) -> BrokerResult<()> {
		self.handle.release();
		Ok(())
	}
}
