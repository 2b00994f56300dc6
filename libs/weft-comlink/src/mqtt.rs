//! MQTT Protocol Implementation
//!
//! Publish/subscribe against a single broker connection. The communicator
//! opens and authenticates the connection during initialization and runs the
//! event-loop dispatcher; clients publish with per-call QoS and receive from
//! per-subscription delivery queues filtered by exact topic match.

use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, Transport, TlsConfiguration,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::communicator::{CommunicationClient, Communicator, CommunicatorKind};
use crate::error::{ComlinkError, CommStatus, Result};
use crate::identity::derive_client_identity;
use crate::payload::{MediaKind, MessageMeta, PayloadDecoder, PayloadResolver};
use crate::profile::{
    CommunicationProperties, InterfaceProfile, MessageProperties, ProfileKey, Protocol, QosLevel,
};
use crate::tls::read_store;

const DEFAULT_TOPIC: &str = "/";
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Compose a wire topic: base topic plus one `/segment` per path variable.
fn compose_topic(base: &str, path_variables: &[String]) -> String {
    let mut topic = base.trim_end_matches('/').to_string();
    if topic.is_empty() {
        topic.push('/');
    }
    for variable in path_variables {
        if !topic.ends_with('/') {
            topic.push('/');
        }
        topic.push_str(variable);
    }
    topic
}

/// Message handed from the dispatcher to a subscriber queue
#[derive(Debug, Clone)]
struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
    qos: u8,
    retained: bool,
}

/// Exact-topic fan-out between the broker event loop and client delivery
/// queues. The dispatcher only inserts into queues; decoding happens on the
/// receiving client's task.
#[derive(Default)]
struct SubscriptionRouter {
    routes: DashMap<String, Vec<(u64, mpsc::UnboundedSender<InboundMessage>)>>,
    next_id: AtomicU64,
}

impl SubscriptionRouter {
    fn register(&self, topic: &str) -> (u64, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes.entry(topic.to_string()).or_default().push((id, tx));
        (id, rx)
    }

    fn unregister(&self, topic: &str, id: u64) {
        if let Some(mut entry) = self.routes.get_mut(topic) {
            entry.retain(|(subscriber, _)| *subscriber != id);
        }
        self.routes.remove_if(topic, |_, subscribers| subscribers.is_empty());
    }

    fn dispatch(&self, message: InboundMessage) {
        let Some(mut entry) = self.routes.get_mut(&message.topic) else {
            return;
        };
        entry.retain(|(_, tx)| tx.send(message.clone()).is_ok());
    }
}

/// Protocol-scoped factory for MQTT clients, bound to one broker.
pub struct MqttCommunicator {
    broker_address: String,
    broker_port: u16,
    username: String,
    password: String,
    connection_timeout_secs: u64,

    props: Option<CommunicationProperties>,
    decoder: Option<Arc<dyn PayloadDecoder>>,
    client_identity: Option<String>,
    broker_client: Option<AsyncClient>,
    router: Arc<SubscriptionRouter>,
    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for MqttCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttCommunicator")
            .field("broker_address", &self.broker_address)
            .field("broker_port", &self.broker_port)
            .field("client_identity", &self.client_identity)
            .finish_non_exhaustive()
    }
}

impl MqttCommunicator {
    pub fn new(
        broker_address: impl Into<String>,
        broker_port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let broker_address = broker_address.into();
        if broker_address.trim().is_empty() {
            return Err(ComlinkError::developer("broker address is empty"));
        }
        if broker_port == 0 {
            return Err(ComlinkError::developer("broker port is out of range"));
        }

        Ok(Self {
            broker_address,
            broker_port,
            username: username.into(),
            password: password.into(),
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            props: None,
            decoder: None,
            client_identity: None,
            broker_client: None,
            router: Arc::new(SubscriptionRouter::default()),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn set_connection_timeout(&mut self, seconds: u64) {
        self.connection_timeout_secs = seconds;
    }

    pub fn client_identity(&self) -> Option<&str> {
        self.client_identity.as_deref()
    }

    fn build_options(&self, props: &CommunicationProperties, client_id: &str) -> Result<MqttOptions> {
        let mut options =
            MqttOptions::new(client_id, self.broker_address.clone(), self.broker_port);
        options.set_credentials(self.username.clone(), self.password.clone());
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        // The broker-client library takes the store contents directly
        let ca = read_store(&props.truststore_path, "truststore")?;
        let keystore = read_store(&props.keystore_path, "keystore")?;
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((keystore.clone(), keystore)),
        }));
        Ok(options)
    }
}

#[async_trait]
impl Communicator for MqttCommunicator {
    fn kind(&self) -> CommunicatorKind {
        CommunicatorKind::Mqtt
    }

    fn properties(&mut self, props: CommunicationProperties) -> Result<()> {
        self.props = Some(props);
        Ok(())
    }

    fn decoder(&mut self, decoder: Arc<dyn PayloadDecoder>) -> Result<()> {
        self.decoder = Some(decoder);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        let props = self
            .props
            .clone()
            .ok_or_else(|| ComlinkError::developer("CommunicationProperties is not set"))?;

        let identity = derive_client_identity(&props.keystore_path)?;
        let options = self.build_options(&props, &identity)?;
        let (client, mut eventloop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);

        // Drive the event loop until the broker acknowledges the session
        let connect_deadline = Duration::from_secs(self.connection_timeout_secs);
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            return Ok(());
                        }
                        return Err(ComlinkError::initialization(format!(
                            "broker rejected connection: {:?}",
                            ack.code
                        )));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        return Err(ComlinkError::initialization(format!(
                            "cannot connect to MQTT broker {}:{}: {}",
                            self.broker_address, self.broker_port, e
                        )))
                    }
                }
            }
        };
        tokio::time::timeout(connect_deadline, handshake)
            .await
            .map_err(|_| {
                ComlinkError::initialization(format!(
                    "timed out connecting to MQTT broker {}:{}",
                    self.broker_address, self.broker_port
                ))
            })??;

        info!(
            broker = %self.broker_address,
            port = self.broker_port,
            identity = %identity,
            "connected to MQTT broker"
        );

        // Dispatcher: queue insertion only, no decoding on this task
        let router = Arc::clone(&self.router);
        let connected = Arc::clone(&self.connected);
        connected.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        router.dispatch(InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                            qos: publish.qos as u8,
                            retained: publish.retain,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT connection lost");
                        connected.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        self.client_identity = Some(identity);
        self.broker_client = Some(client);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.broker_client.is_some() && self.decoder.is_some()
    }

    fn client(&self, profile: InterfaceProfile) -> Result<Box<dyn CommunicationClient>> {
        if !self.is_initialized() {
            return Err(ComlinkError::initialization(
                "MqttCommunicator is not initialized",
            ));
        }
        let broker_client = self
            .broker_client
            .as_ref()
            .ok_or_else(|| ComlinkError::developer("broker client is not set"))?;
        let decoder = self
            .decoder
            .as_ref()
            .ok_or_else(|| ComlinkError::developer("PayloadDecoder is not set"))?;

        let client = MqttClient::new(
            broker_client.clone(),
            profile,
            Arc::clone(decoder),
            Arc::clone(&self.router),
            Arc::clone(&self.connected),
            Duration::from_secs(self.connection_timeout_secs),
        )?;
        Ok(Box::new(client))
    }
}

struct ActiveSubscription {
    topic: String,
    id: u64,
    queue: mpsc::UnboundedReceiver<InboundMessage>,
}

/// One MQTT session: publishes to the profile's publish topic and owns at
/// most one active subscription with its delivery queue.
pub struct MqttClient {
    broker_client: AsyncClient,
    profile: InterfaceProfile,
    decoder: Arc<dyn PayloadDecoder>,
    router: Arc<SubscriptionRouter>,
    connected: Arc<AtomicBool>,
    receive_timeout: Duration,
    subscription: Option<ActiveSubscription>,
}

impl std::fmt::Debug for MqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttClient")
            .field("profile", &self.profile)
            .field("receive_timeout", &self.receive_timeout)
            .finish_non_exhaustive()
    }
}

impl MqttClient {
    fn new(
        broker_client: AsyncClient,
        profile: InterfaceProfile,
        decoder: Arc<dyn PayloadDecoder>,
        router: Arc<SubscriptionRouter>,
        connected: Arc<AtomicBool>,
        receive_timeout: Duration,
    ) -> Result<Self> {
        profile.require_protocol(Protocol::Mqtt, "MqttClient")?;
        Ok(Self {
            broker_client,
            profile,
            decoder,
            router,
            connected,
            receive_timeout,
            subscription: None,
        })
    }

    fn publish_topic(&self, props: &MessageProperties) -> String {
        compose_topic(
            self.profile.get_str_or(ProfileKey::TopicPublish, DEFAULT_TOPIC),
            &props.path_variables,
        )
    }

    fn subscribe_topic(&self, props: &MessageProperties) -> String {
        compose_topic(
            self.profile.get_str_or(ProfileKey::TopicSubscribe, DEFAULT_TOPIC),
            &props.path_variables,
        )
    }

    async fn subscribe_if_needed(&mut self, props: &MessageProperties) -> Result<()> {
        if self.subscription.is_some() {
            return Ok(());
        }

        let topic = self.subscribe_topic(props);
        let (id, queue) = self.router.register(&topic);
        // The receiver's own book-keeping is exactly-once; duplicate
        // suppression up to that level is the broker's responsibility
        if let Err(e) = self.broker_client.subscribe(&topic, QoS::ExactlyOnce).await {
            self.router.unregister(&topic, id);
            return Err(e.into());
        }
        debug!(topic = %topic, "subscribed");
        self.subscription = Some(ActiveSubscription { topic, id, queue });
        Ok(())
    }

    async fn next_message(&mut self, timed: bool) -> Result<InboundMessage> {
        let timeout = self.receive_timeout;
        let subscription = self
            .subscription
            .as_mut()
            .ok_or_else(|| ComlinkError::developer("receive called without a subscription"))?;

        let received = if timed {
            tokio::time::timeout(timeout, subscription.queue.recv())
                .await
                .map_err(|_| ComlinkError::timeout("no message received within the timeout"))?
        } else {
            subscription.queue.recv().await
        };

        received.ok_or_else(|| {
            ComlinkError::communication(
                CommStatus::ServiceUnavailable,
                "MQTT delivery queue closed, connection lost",
            )
        })
    }
}

#[async_trait]
impl CommunicationClient for MqttClient {
    async fn send(
        &mut self,
        props: Option<&MessageProperties>,
        payload: Option<&Value>,
    ) -> Result<()> {
        let payload = payload.ok_or_else(|| ComlinkError::developer("payload is null"))?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ComlinkError::communication(
                CommStatus::ServiceUnavailable,
                "not connected to MQTT broker",
            ));
        }

        let defaults = MessageProperties::default();
        let props = props.unwrap_or(&defaults);
        let topic = self.publish_topic(props);
        let qos = match props.qos.unwrap_or(QosLevel::AtMostOnce) {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        };
        let retained = props.retained.unwrap_or(false);

        let bytes = serde_json::to_vec(payload)?;
        self.broker_client.publish(&topic, qos, retained, bytes).await?;
        debug!(topic = %topic, "published message");
        Ok(())
    }

    async fn receive(
        &mut self,
        props: Option<&MessageProperties>,
        resolver: &mut PayloadResolver,
    ) -> Result<()> {
        let defaults = MessageProperties::default();
        let props = props.unwrap_or(&defaults);

        self.subscribe_if_needed(props).await?;
        let message = self.next_message(props.timed_receive).await?;

        let meta = MessageMeta::Mqtt {
            topic: message.topic.clone(),
            qos: message.qos,
            retained: message.retained,
        };
        if message.payload.is_empty() {
            resolver.add_raw(meta);
            return Ok(());
        }

        resolver.add_decoded_bytes(&*self.decoder, MediaKind::Json, &message.payload, meta)
    }

    async fn terminate(&mut self) -> Result<()> {
        if let Some(subscription) = self.subscription.take() {
            self.router.unregister(&subscription.topic, subscription.id);
            self.broker_client.unsubscribe(&subscription.topic).await?;
            debug!(topic = %subscription.topic, "unsubscribed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_topic_appends_path_variables() {
        let vars = vec!["a".to_string(), "b".to_string()];
        assert_eq!(compose_topic("/rooms", &vars), "/rooms/a/b");
        assert_eq!(compose_topic("/rooms/", &vars), "/rooms/a/b");
        assert_eq!(compose_topic("/rooms", &[]), "/rooms");
    }

    #[test]
    fn test_compose_topic_from_root() {
        let vars = vec!["1".to_string()];
        assert_eq!(compose_topic("/", &vars), "/1");
    }

    #[test]
    fn test_router_exact_topic_match() {
        let router = SubscriptionRouter::default();
        let (_, mut queue) = router.register("/rooms/1");

        router.dispatch(InboundMessage {
            topic: "/rooms/1".to_string(),
            payload: br#"{"temp":21}"#.to_vec(),
            qos: 2,
            retained: false,
        });
        router.dispatch(InboundMessage {
            topic: "/rooms/12".to_string(),
            payload: b"{}".to_vec(),
            qos: 2,
            retained: false,
        });

        let delivered = queue.try_recv().unwrap();
        assert_eq!(delivered.topic, "/rooms/1");
        assert!(queue.try_recv().is_err());
    }

    #[test]
    fn test_router_fans_out_to_all_subscribers_of_a_topic() {
        let router = SubscriptionRouter::default();
        let (_, mut first) = router.register("/status");
        let (_, mut second) = router.register("/status");

        router.dispatch(InboundMessage {
            topic: "/status".to_string(),
            payload: b"{}".to_vec(),
            qos: 0,
            retained: false,
        });

        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn test_router_unregister_stops_delivery() {
        let router = SubscriptionRouter::default();
        let (id, mut queue) = router.register("/status");
        router.unregister("/status", id);

        router.dispatch(InboundMessage {
            topic: "/status".to_string(),
            payload: b"{}".to_vec(),
            qos: 0,
            retained: false,
        });
        assert!(queue.try_recv().is_err());
    }

    #[test]
    fn test_communicator_constructor_validation() {
        assert!(matches!(
            MqttCommunicator::new("", 1883, "user", "secret"),
            Err(ComlinkError::Developer(_))
        ));
        assert!(matches!(
            MqttCommunicator::new("broker.local", 0, "user", "secret"),
            Err(ComlinkError::Developer(_))
        ));
        assert!(MqttCommunicator::new("broker.local", 8883, "user", "secret").is_ok());
    }

    #[test]
    fn test_client_before_initialize_fails() {
        let communicator = MqttCommunicator::new("broker.local", 8883, "user", "secret").unwrap();
        let profile = InterfaceProfile::new(Protocol::Mqtt)
            .with(ProfileKey::TopicPublish, "/rooms")
            .unwrap();
        let err = communicator.client(profile).unwrap_err();
        assert!(matches!(err, ComlinkError::Initialization(_)));
    }
}
