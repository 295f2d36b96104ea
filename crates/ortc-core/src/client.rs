//! The ORTC session.
//!
//! A [`Client`] owns one logical connection to the service, including every
//! retry after the connection is lost. Public operations validate their
//! arguments, update the shared session under a short lock and queue frames
//! on the current link; acknowledgments and messages arrive asynchronously
//! on the [`EventStream`] and on each subscription's handler.

use ortc_protocol::multipart::{self, random_id};
use ortc_protocol::{address, codec, Command, MAX_MESSAGE_SIZE};
use ortc_transport::{Connection, Transport, WebSocketConfig, WebSocketTransport};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::{is_safe_input, validate_channel_name, ChannelRegistry, MessageHandler};
use crate::cluster::{ClusterResolver, HttpClusterResolver};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::event::{self, ClientEvent, EventSender, EventStream};
use crate::link::Link;
use crate::metrics;
use crate::permissions::{Action, PatternPermissionHash, PermissionHash, Permissions};
use crate::reassembly::Reassembler;
use crate::rest::{Endpoint, PresenceInfo, RestClient, RestError};
use crate::router;
use crate::state::ConnectionState;

/// Token used by [`Client::connect_anonymous`].
pub const DEFAULT_AUTH_TOKEN: &str = "PM.Anonymous";

/// Maximum size of the connection metadata, in bytes.
pub const MAX_CONNECTION_METADATA_SIZE: usize = 255;

/// Length of the session identifier.
pub const SESSION_ID_LENGTH: usize = 16;

/// Mutable session data, guarded by one lock that is never held across I/O.
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub(crate) state: ConnectionState,
    pub(crate) app_key: String,
    pub(crate) auth_token: String,
    pub(crate) session_id: String,
    pub(crate) permissions: Permissions,
    pub(crate) link: Option<Arc<Link>>,
    pub(crate) heartbeat: Option<CancellationToken>,
    pub(crate) reconnect: Option<CancellationToken>,
    /// Incremented by every connect attempt; a slower attempt never installs
    /// its connection over a newer one.
    pub(crate) attempt: u64,
}

impl Session {
    /// Whether `link` is the session's current link.
    pub(crate) fn is_current(&self, link: &Arc<Link>) -> bool {
        self.link.as_ref().is_some_and(|l| Arc::ptr_eq(l, link))
    }

    /// The current link, if the session is connected.
    fn live_link(&self) -> Result<Arc<Link>, ClientError> {
        match (&self.state, &self.link) {
            (ConnectionState::Connected, Some(link)) => Ok(Arc::clone(link)),
            _ => Err(ClientError::NotConnected),
        }
    }
}

pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) resolver: Arc<dyn ClusterResolver>,
    pub(crate) hasher: Arc<dyn PermissionHash>,
    pub(crate) rest: RestClient,
    pub(crate) session: Mutex<Session>,
    pub(crate) channels: ChannelRegistry,
    pub(crate) reassembler: Reassembler,
    /// Set by every inbound frame, cleared by the heartbeat monitor.
    pub(crate) alive: AtomicBool,
    pub(crate) events: EventSender,
}

/// A realtime messaging session.
///
/// Cloning is cheap; every clone drives the same session.
///
/// ```rust,ignore
/// let config = ClientConfig::default().with_cluster_url("https://ortc-developers.realtime.co/server/ssl/2.1");
/// let (client, mut events) = Client::new(config);
///
/// client.connect("app-key", "auth-token").await?;
/// while let Some(event) = events.recv().await {
///     if event == ClientEvent::Connected {
///         client.subscribe("blue", true, |_, channel, message| {
///             println!("{}: {}", channel, message);
///         })?;
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("Client")
            .field("state", &session.state)
            .field("session_id", &session.session_id)
            .field("channels", &self.inner.channels.len())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Client`] with custom collaborators.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn ClusterResolver>>,
    hasher: Option<Arc<dyn PermissionHash>>,
}

impl ClientBuilder {
    /// Use a custom transport instead of WebSocket.
    #[must_use]
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a custom cluster resolver.
    #[must_use]
    pub fn cluster_resolver<R: ClusterResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Use a custom permission hash.
    #[must_use]
    pub fn permission_hash<H: PermissionHash + 'static>(mut self, hasher: H) -> Self {
        self.hasher = Some(Arc::new(hasher));
        self
    }

    /// Build the client and its event stream.
    #[must_use]
    pub fn build(self) -> (Client, EventStream) {
        let config = self.config;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(WebSocketTransport::new(WebSocketConfig {
                connect_timeout: config.transport.connect_timeout(),
            })),
        };
        let resolver: Arc<dyn ClusterResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(HttpClusterResolver::new(config.rest.timeout())),
        };
        let hasher: Arc<dyn PermissionHash> = match self.hasher {
            Some(hasher) => hasher,
            None => Arc::new(PatternPermissionHash),
        };
        let rest = RestClient::with_resolver(config.rest.timeout(), Arc::clone(&resolver));
        let reassembler = Reassembler::with_limit(config.max_pending_messages);
        let (events, stream) = event::channel();

        let client = Client {
            inner: Arc::new(Inner {
                config,
                transport,
                resolver,
                hasher,
                rest,
                session: Mutex::new(Session::default()),
                channels: ChannelRegistry::new(),
                reassembler,
                alive: AtomicBool::new(false),
                events,
            }),
        };
        (client, stream)
    }
}

impl Client {
    /// Create a client using WebSocket and HTTP cluster discovery.
    #[must_use]
    pub fn new(config: ClientConfig) -> (Self, EventStream) {
        Self::builder(config).build()
    }

    /// Start building a client with custom collaborators.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            resolver: None,
            hasher: None,
        }
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Whether the handshake completed and the connection is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Identifier of the latest connect attempt.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        let session = self.inner.session.lock();
        (!session.session_id.is_empty()).then(|| session.session_id.clone())
    }

    /// Whether the server acknowledged a subscription to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.inner.channels.is_subscribed(channel)
    }

    /// Whether a subscription to `channel` awaits acknowledgment.
    #[must_use]
    pub fn is_subscribing(&self, channel: &str) -> bool {
        self.inner.channels.is_subscribing(channel)
    }

    /// Connect with an application key and an authentication token.
    ///
    /// Returns once the transport is open; [`ClientEvent::Connected`] follows
    /// when the server validates the session. Called while reconnecting, it
    /// starts a new handshake and the session stays reconnecting until then.
    ///
    /// # Errors
    ///
    /// Returns an error, also reported as [`ClientEvent::Exception`], if the
    /// session is already connected or connecting, an argument or the
    /// configuration is invalid, or the server cannot be reached.
    pub async fn connect(&self, app_key: &str, auth_token: &str) -> Result<(), ClientError> {
        let result = self.try_connect(app_key, auth_token).await;
        self.reported(result)
    }

    /// Connect with the anonymous token.
    ///
    /// # Errors
    ///
    /// See [`Client::connect`].
    pub async fn connect_anonymous(&self, app_key: &str) -> Result<(), ClientError> {
        self.connect(app_key, DEFAULT_AUTH_TOKEN).await
    }

    async fn try_connect(&self, app_key: &str, auth_token: &str) -> Result<(), ClientError> {
        let (attempt, retry) = {
            let mut session = self.inner.session.lock();
            match session.state {
                ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
                ConnectionState::Connecting => return Err(ClientError::AlreadyConnecting),
                ConnectionState::Disconnecting => return Err(ClientError::Disconnecting),
                ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
            }
            validate_connect(&self.inner.config, app_key, auth_token)?;

            let retry = session.state == ConnectionState::Reconnecting;
            if !retry {
                session.state = ConnectionState::Connecting;
            }
            session.app_key = app_key.to_string();
            session.auth_token = auth_token.to_string();
            session.session_id = random_id(SESSION_ID_LENGTH);
            session.attempt += 1;
            (session.attempt, retry)
        };

        info!(app_key = %app_key, retry, "Connecting");

        match self.open_link(app_key, attempt).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut session = self.inner.session.lock();
                if !retry
                    && session.attempt == attempt
                    && session.state == ConnectionState::Connecting
                {
                    session.state = ConnectionState::Disconnected;
                }
                Err(e)
            }
        }
    }

    async fn open_link(&self, app_key: &str, attempt: u64) -> Result<(), ClientError> {
        let server = self.resolve_server(app_key).await?;
        let url = address::websocket_url(&server)
            .ok_or_else(|| ClientError::Validation("Invalid URL".into()))?;

        debug!(url = %url, transport = self.inner.transport.name(), "Opening transport");
        let Connection { id, sink, stream } = self.inner.transport.open(&url).await.map_err(|e| {
            warn!(url = %url, error = %e, "Transport open failed");
            ClientError::from(e)
        })?;

        // Install the connection only if no newer attempt or disconnect
        // happened while it was opening.
        let installed = {
            let mut session = self.inner.session.lock();
            let current = session.attempt == attempt
                && matches!(
                    session.state,
                    ConnectionState::Connecting | ConnectionState::Reconnecting
                );
            if current {
                let link = Arc::new(Link::spawn(id, sink, self.inner.events.clone()));
                if let Some(previous) = session.link.replace(Arc::clone(&link)) {
                    previous.close();
                }
                Ok(link)
            } else {
                Err(sink)
            }
        };

        let link = match installed {
            Ok(link) => link,
            Err(mut sink) => {
                debug!(connection = %id, "Connect attempt superseded");
                let _ = sink.close().await;
                return Ok(());
            }
        };

        self.inner.reassembler.clear();
        self.inner.alive.store(true, Ordering::SeqCst);
        tokio::spawn(router::receive_loop(self.clone(), link, stream));
        Ok(())
    }

    async fn resolve_server(&self, app_key: &str) -> Result<String, ClientError> {
        let config = &self.inner.config;
        if let Some(cluster_url) = non_empty(&config.cluster_url) {
            return self
                .inner
                .resolver
                .resolve(cluster_url, app_key)
                .await
                .map_err(|e| {
                    warn!(cluster_url = %cluster_url, error = %e, "Cluster resolution failed");
                    ClientError::Connectivity("Host is not reachable".into())
                });
        }
        non_empty(&config.url)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Validation("URL and Cluster URL are null or empty".into()))
    }

    /// Disconnect and forget every subscription.
    ///
    /// Stops the background loops and closes the connection, then emits
    /// [`ClientEvent::Disconnected`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] unless the session is connected
    /// or reconnecting.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        let result = self.try_disconnect();
        self.reported(result)
    }

    fn try_disconnect(&self) -> Result<(), ClientError> {
        let link = {
            let mut session = self.inner.session.lock();
            if !session.state.can_disconnect() {
                return Err(ClientError::NotConnected);
            }
            session.state = ConnectionState::Disconnecting;
            if let Some(token) = session.heartbeat.take() {
                token.cancel();
            }
            if let Some(token) = session.reconnect.take() {
                token.cancel();
            }
            session.link.take()
        };

        info!("Disconnecting");
        self.inner.channels.clear();
        self.inner.reassembler.clear();
        if let Some(link) = link {
            link.close();
        }

        self.inner.session.lock().state = ConnectionState::Disconnected;
        self.emit(ClientEvent::Disconnected);
        Ok(())
    }

    /// Subscribe to a channel.
    ///
    /// `handler` receives every complete message published on the channel.
    /// With `resubscribe_on_reconnect`, the subscription survives a lost
    /// connection and is renewed once the session reconnects.
    ///
    /// # Errors
    ///
    /// Returns an error, also reported as [`ClientEvent::Exception`], if the
    /// session is not connected, the channel name is invalid, the channel is
    /// already subscribed or subscribing, or the session has no permission
    /// for it. No frame is sent in any of these cases.
    pub fn subscribe<F>(
        &self,
        channel: &str,
        resubscribe_on_reconnect: bool,
        handler: F,
    ) -> Result<(), ClientError>
    where
        F: Fn(&Client, &str, &str) + Send + Sync + 'static,
    {
        self.subscribe_with(channel, resubscribe_on_reconnect, Arc::new(handler))
    }

    /// Subscribe with a shared handler.
    ///
    /// # Errors
    ///
    /// See [`Client::subscribe`].
    pub fn subscribe_with(
        &self,
        channel: &str,
        resubscribe_on_reconnect: bool,
        handler: MessageHandler,
    ) -> Result<(), ClientError> {
        let result = self.try_subscribe(channel, resubscribe_on_reconnect, handler);
        self.reported(result)
    }

    fn try_subscribe(
        &self,
        channel: &str,
        resubscribe_on_reconnect: bool,
        handler: MessageHandler,
    ) -> Result<(), ClientError> {
        let (link, command) = {
            let session = self.inner.session.lock();
            let link = session.live_link()?;
            validate_channel(channel)?;
            if self.inner.channels.is_subscribing(channel)
                || self.inner.channels.is_subscribed(channel)
            {
                return Err(ClientError::AlreadySubscribed(channel.to_string()));
            }
            let hash = self.permission_hash(&session.permissions, channel, Action::Subscribe)?;
            let command = Command::subscribe(&session.app_key, &session.auth_token, channel, hash);
            (link, command)
        };

        let frame = codec::encode(&command)?;
        self.inner
            .channels
            .begin_subscribe(channel, resubscribe_on_reconnect, handler)?;
        if let Err(e) = link.send(frame) {
            self.inner.channels.remove(channel);
            return Err(e);
        }
        Ok(())
    }

    /// Unsubscribe from a channel.
    ///
    /// The channel stays tracked, and its handler keeps receiving messages,
    /// until the server acknowledges with [`ClientEvent::Unsubscribed`]. It
    /// will not be renewed by a reconnect in the meantime.
    ///
    /// # Errors
    ///
    /// Returns an error, also reported as [`ClientEvent::Exception`], if the
    /// session is not connected, the channel name is invalid or the channel
    /// is not tracked.
    pub fn unsubscribe(&self, channel: &str) -> Result<(), ClientError> {
        let result = self.try_unsubscribe(channel);
        self.reported(result)
    }

    fn try_unsubscribe(&self, channel: &str) -> Result<(), ClientError> {
        let (link, command) = {
            let session = self.inner.session.lock();
            let link = session.live_link()?;
            validate_channel(channel)?;
            if !self.inner.channels.contains(channel) {
                return Err(ClientError::NotSubscribed(channel.to_string()));
            }
            (link, Command::unsubscribe(&session.app_key, channel))
        };

        let frame = codec::encode(&command)?;
        self.inner.channels.disable_resubscribe(channel);
        link.send(frame)
    }

    /// Publish a message on a channel.
    ///
    /// Messages longer than [`MAX_MESSAGE_SIZE`] characters are split into
    /// parts sharing one message identifier. Each part is queued on its
    /// own; a part that cannot be queued is reported and the others are
    /// still sent.
    ///
    /// # Errors
    ///
    /// Returns an error, also reported as [`ClientEvent::Exception`], if the
    /// session is not connected, an argument is invalid, the session has no
    /// permission to publish on the channel, or a part could not be queued.
    pub fn send(&self, channel: &str, message: &str) -> Result<(), ClientError> {
        let prepared = self.prepare_send(channel, message);
        let (link, app_key, auth_token, hash) = self.reported(prepared)?;

        let message_id = multipart::generate_message_id();
        let parts = multipart::encode_parts(&message_id, message, MAX_MESSAGE_SIZE);
        debug!(channel = %channel, message_id = %message_id, parts = parts.len(), "Sending message");

        let mut outcome = Ok(());
        for payload in parts {
            let command = Command::send(&app_key, &auth_token, channel, &hash, payload);
            let sent = codec::encode(&command)
                .map_err(ClientError::from)
                .and_then(|frame| link.send(frame));
            if let Err(e) = sent {
                self.report(&e);
                outcome = Err(e);
            }
        }
        outcome
    }

    fn prepare_send(
        &self,
        channel: &str,
        message: &str,
    ) -> Result<(Arc<Link>, String, String, String), ClientError> {
        let session = self.inner.session.lock();
        let link = session.live_link()?;
        validate_channel(channel)?;
        if message.is_empty() {
            return Err(ClientError::Validation("Message is null or empty".into()));
        }
        let hash = self.permission_hash(&session.permissions, channel, Action::Send)?;
        Ok((
            link,
            session.app_key.clone(),
            session.auth_token.clone(),
            hash,
        ))
    }

    fn permission_hash(
        &self,
        permissions: &Permissions,
        channel: &str,
        action: Action,
    ) -> Result<String, ClientError> {
        self.inner
            .hasher
            .hash(permissions, channel, action)
            .ok_or_else(|| ClientError::Permission {
                action,
                channel: channel.to_string(),
            })
    }

    /// Get the presence data of a channel, using the session's URL and credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if no URL is configured, the session never connected,
    /// or the request fails.
    pub async fn presence(&self, channel: &str) -> Result<PresenceInfo, RestError> {
        let endpoint = self.endpoint()?;
        let (app_key, auth_token) = self.credentials()?;
        self.inner
            .rest
            .presence(&endpoint, &app_key, &auth_token, channel)
            .await
    }

    /// Enable presence on a channel, using the session's URL and application key.
    ///
    /// # Errors
    ///
    /// See [`Client::presence`].
    pub async fn enable_presence(
        &self,
        private_key: &str,
        channel: &str,
        metadata: bool,
    ) -> Result<String, RestError> {
        let endpoint = self.endpoint()?;
        let (app_key, _) = self.credentials()?;
        self.inner
            .rest
            .enable_presence(&endpoint, &app_key, private_key, channel, metadata)
            .await
    }

    /// Disable presence on a channel, using the session's URL and application key.
    ///
    /// # Errors
    ///
    /// See [`Client::presence`].
    pub async fn disable_presence(
        &self,
        private_key: &str,
        channel: &str,
    ) -> Result<String, RestError> {
        let endpoint = self.endpoint()?;
        let (app_key, _) = self.credentials()?;
        self.inner
            .rest
            .disable_presence(&endpoint, &app_key, private_key, channel)
            .await
    }

    fn endpoint(&self) -> Result<Endpoint, RestError> {
        let config = &self.inner.config;
        if let Some(cluster_url) = non_empty(&config.cluster_url) {
            return Ok(Endpoint::Cluster(cluster_url.to_string()));
        }
        non_empty(&config.url)
            .map(|url| Endpoint::Server(url.to_string()))
            .ok_or_else(|| RestError::Validation("URL and Cluster URL are null or empty".into()))
    }

    fn credentials(&self) -> Result<(String, String), RestError> {
        let session = self.inner.session.lock();
        if session.app_key.is_empty() {
            return Err(RestError::Validation("Application Key is null or empty".into()));
        }
        Ok((session.app_key.clone(), session.auth_token.clone()))
    }

    /// Credentials of the latest connect call, for the reconnection loop.
    pub(crate) fn last_credentials(&self) -> (String, String) {
        let session = self.inner.session.lock();
        (session.app_key.clone(), session.auth_token.clone())
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("Event stream dropped");
        }
    }

    /// Report an error as an exception event.
    pub(crate) fn report(&self, error: &ClientError) {
        debug!(error = %error, "Exception");
        metrics::record_exception(error.kind());
        self.emit(ClientEvent::Exception(error.to_string()));
    }

    fn reported<T>(&self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn is_valid_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
    })
}

fn validate_channel(channel: &str) -> Result<(), ClientError> {
    validate_channel_name(channel).map_err(|msg| ClientError::Validation(msg.to_string()))
}

/// Check the arguments and configuration of a connect call, in the order
/// their errors take precedence.
fn validate_connect(
    config: &ClientConfig,
    app_key: &str,
    auth_token: &str,
) -> Result<(), ClientError> {
    let invalid = |msg: &str| Err(ClientError::Validation(msg.to_string()));

    if app_key.is_empty() {
        return invalid("Wrong Application Key");
    }

    let url = non_empty(&config.url);
    let cluster_url = non_empty(&config.cluster_url);
    if url.is_none() && cluster_url.is_none() {
        return invalid("URL and Cluster URL are null or empty");
    }
    if url.is_some_and(|u| !is_valid_url(u)) {
        return invalid("Invalid URL");
    }
    if cluster_url.is_some_and(|u| !is_valid_url(u)) {
        return invalid("Invalid Cluster URL");
    }

    if !is_safe_input(app_key) {
        return invalid("Application Key has invalid characters");
    }
    if !is_safe_input(auth_token) {
        return invalid("Authentication Token has invalid characters");
    }
    if !is_safe_input(&config.announcement_subchannel) {
        return invalid("Announcement Subchannel has invalid characters");
    }
    if config.connection_metadata.len() > MAX_CONNECTION_METADATA_SIZE {
        return Err(ClientError::Validation(format!(
            "Metadata exceeds the limit of {} bytes",
            MAX_CONNECTION_METADATA_SIZE
        )));
    }

    Ok(())
}
