//! Device session.
//!
//! A [`Session`] owns everything that lives for one connection: the
//! transaction table, reassembly state, the state store and the capability
//! profile resolved at identification. Nothing survives [`Session::close`].

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::state::{DeviceStateStore, StateChange, StateSnapshot};
use crate::transaction::TransactionManager;
use crate::transport::Transport;
use aquaclean_core::{
    CapabilityTable, DataPointId, DataPointRegistry, DataPointValue, DeviceCapabilityProfile,
};
use aquaclean_protocol::{
    CollectorEvent, Command, DataPointReport, Decoder, FrameCollector, Message, Request,
    TransactionId, WriteAck,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, trace, warn};

/// Notification-side protocol state.
struct Inbound {
    decoder: Decoder,
    collector: FrameCollector,
}

/// A session with one connected device.
pub struct Session<T> {
    config: SessionConfig,
    registry: Arc<DataPointRegistry>,
    capabilities: Arc<CapabilityTable>,
    transactions: TransactionManager<T>,
    inbound: Mutex<Inbound>,
    store: DeviceStateStore,
    profile: RwLock<Option<DeviceCapabilityProfile>>,
    /// Held while the model identifier is being read.
    identifying: AsyncMutex<()>,
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        config: SessionConfig,
        registry: Arc<DataPointRegistry>,
        capabilities: Arc<CapabilityTable>,
    ) -> Self {
        let inbound = Inbound {
            decoder: Decoder::with_max_buffered(config.max_message_size),
            collector: FrameCollector::new()
                .with_max_pending_age(config.max_pending_age)
                .with_max_message_size(config.max_message_size),
        };
        Self {
            store: DeviceStateStore::new(config.event_capacity),
            transactions: TransactionManager::new(transport, config.clone()),
            inbound: Mutex::new(inbound),
            profile: RwLock::new(None),
            identifying: AsyncMutex::new(()),
            config,
            registry,
            capabilities,
        }
    }

    /// Creates a session using the built-in data point and capability tables.
    pub fn with_builtin_tables(transport: T, config: SessionConfig) -> Result<Self, ClientError> {
        Ok(Self::new(
            transport,
            config,
            Arc::new(DataPointRegistry::builtin()?),
            Arc::new(CapabilityTable::builtin()?),
        ))
    }

    /// Feeds bytes received on the notify characteristic.
    ///
    /// Malformed frames and reassembly anomalies are logged and dropped.
    pub fn handle_notification(&self, data: &[u8]) {
        if self.config.verbosity.dumps_frames() {
            trace!("RX {}", hex::encode(data));
        }

        let messages = {
            let mut inbound = self.inbound.lock();
            inbound.decoder.extend(data);

            let mut complete = Vec::new();
            while let Some(result) = inbound.decoder.decode_frame() {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Dropping malformed frame: {}", e);
                        continue;
                    }
                };
                match inbound.collector.on_frame(frame) {
                    CollectorEvent::MessageComplete(message) => complete.push(message),
                    CollectorEvent::AwaitingMore => {}
                    CollectorEvent::Error(e) => debug!("Dropping frame: {}", e),
                }
            }
            complete
        };

        for message in messages {
            if let Some(unsolicited) = self.transactions.on_message(message) {
                self.apply_notification(&unsolicited);
            }
        }
    }

    /// Processes notifications until the channel closes, then tears the
    /// session down. A closed channel means the link is gone.
    pub async fn run(&self, mut notifications: mpsc::Receiver<Bytes>) {
        info!("Session started");
        while let Some(data) = notifications.recv().await {
            self.handle_notification(&data);
        }
        info!("Notification stream ended");
        self.close();
    }

    /// Reads the model identifier and resolves the capability profile.
    ///
    /// Runs once; later calls return the cached profile. A failed read
    /// resolves the basic tier. Only a lost link is reported as an error.
    pub async fn identify(&self) -> Result<DeviceCapabilityProfile, ClientError> {
        if let Some(profile) = self.capability_profile() {
            return Ok(profile);
        }
        let _identifying = self.identifying.lock().await;
        if let Some(profile) = self.capability_profile() {
            return Ok(profile);
        }

        let model = match self.read(self.config.model_data_point).await {
            Ok(Some(DataPointValue::Text(model))) => model,
            Ok(Some(other)) => other.to_string(),
            Ok(None) => String::new(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Could not read model identifier: {}", e);
                String::new()
            }
        };

        let profile = self.capabilities.resolve(&model);
        info!(
            model = %model,
            tier = %profile.tier,
            data_points = profile.data_points.len(),
            "Device identified"
        );
        *self.profile.write() = Some(profile.clone());
        Ok(profile)
    }

    /// Reads a data point from the device.
    ///
    /// Returns `Ok(None)` when the device has no value or the payload could
    /// not be decoded; the store then marks the value unavailable.
    pub async fn read(&self, id: DataPointId) -> Result<Option<DataPointValue>, ClientError> {
        self.registry.check_readable(id)?;

        let request = Request::ReadDataPoint { id: id.value() };
        let response = self.transactions.send(request.encode()).await?;
        let report = DataPointReport::parse(&response.body)?;
        if report.id != id.value() {
            // Still a device-reported value; keep it.
            self.apply_notification(&response);
            return Err(ClientError::UnexpectedResponse {
                reason: format!("read of {} answered for {}", id, report.id),
            });
        }

        let value = match self.registry.decode(id, &report.value) {
            Ok(value) => value,
            Err(e) if e.is_decode() => {
                warn!("Value of data point {} unavailable: {}", id, e);
                None
            }
            Err(e) => return Err(e.into()),
        };
        self.store.apply(id, value.clone());
        Ok(value)
    }

    /// Writes a data point. Invalid values are rejected before sending.
    pub async fn write(&self, id: DataPointId, value: DataPointValue) -> Result<(), ClientError> {
        let payload = self.registry.encode_write(id, &value)?;

        let request = Request::WriteDataPoint {
            id: id.value(),
            value: payload,
        };
        let response = self.transactions.send(request.encode()).await?;
        let ack = WriteAck::parse(&response.body)?;
        if ack.id != id.value() {
            self.apply_notification(&response);
            return Err(ClientError::UnexpectedResponse {
                reason: format!("write of {} acknowledged for {}", id, ack.id),
            });
        }
        if !ack.is_accepted() {
            return Err(ClientError::Rejected {
                id,
                status: ack.status,
            });
        }

        self.store.apply(id, Some(value));
        Ok(())
    }

    /// Sends a high-level command and waits for the device to answer.
    pub async fn execute(&self, command: Command) -> Result<(), ClientError> {
        debug!("Executing {:?}", command);
        self.transactions
            .send(Request::Command(command).encode())
            .await?;
        Ok(())
    }

    /// Returns the profile resolved by [`Session::identify`].
    pub fn capability_profile(&self) -> Option<DeviceCapabilityProfile> {
        self.profile.read().clone()
    }

    /// Subscribes to data point value changes.
    pub fn state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.store.snapshot()
    }

    pub fn registry(&self) -> &DataPointRegistry {
        &self.registry
    }

    /// Cancels a pending request. Returns whether one was pending.
    pub fn cancel(&self, transaction: TransactionId) -> bool {
        self.transactions.cancel(transaction)
    }

    /// Returns the ids of requests awaiting a response.
    pub fn pending_transactions(&self) -> Vec<TransactionId> {
        self.transactions.pending_ids()
    }

    /// Tears the session down: pending requests fail and state is dropped.
    pub fn close(&self) {
        if self.transactions.is_closed() {
            return;
        }
        info!("Closing session");
        self.transactions.close();
        {
            let mut inbound = self.inbound.lock();
            inbound.decoder.clear();
            inbound.collector.clear();
        }
        self.store.clear();
        *self.profile.write() = None;
    }

    pub fn is_closed(&self) -> bool {
        self.transactions.is_closed()
    }

    fn apply_notification(&self, message: &Message) {
        let report = match DataPointReport::parse(&message.body) {
            Ok(report) => report,
            Err(e) => {
                debug!(
                    "Ignoring unsolicited message on transaction {}: {}",
                    message.transaction, e
                );
                return;
            }
        };

        let id = DataPointId(report.id);
        if !self.registry.contains(id) {
            self.store.apply_unrecognized(id, report.value);
            return;
        }
        match self.registry.decode(id, &report.value) {
            Ok(value) => {
                self.store.apply(id, value);
            }
            Err(e) => {
                warn!("Value of data point {} unavailable: {}", id, e);
                self.store.apply(id, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use aquaclean_core::ModelTier;
    use aquaclean_protocol::{Encoder, DEFAULT_MTU};
    use std::collections::HashMap;
    use tokio::sync::mpsc::UnboundedReceiver;

    type TestSession = Arc<Session<ChannelTransport>>;

    fn session() -> (TestSession, UnboundedReceiver<Bytes>) {
        let (transport, sent) = ChannelTransport::new();
        let session =
            Session::with_builtin_tables(transport, SessionConfig::default()).unwrap();
        (Arc::new(session), sent)
    }

    fn wire(transaction: TransactionId, body: &[u8]) -> Vec<u8> {
        Encoder::encode_message(transaction, true, body, DEFAULT_MTU)
            .unwrap()
            .concat()
    }

    /// Simulated device answering requests from a value table.
    ///
    /// Writes to ids in `reject` are refused with status 1.
    fn spawn_device(
        session: TestSession,
        mut sent: UnboundedReceiver<Bytes>,
        mut values: HashMap<u16, Vec<u8>>,
        reject: Vec<u16>,
    ) -> Arc<Mutex<Vec<Request>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let mut collector = FrameCollector::new();

            while let Some(bytes) = sent.recv().await {
                decoder.extend(&bytes);
                while let Some(frame) = decoder.decode_frame() {
                    let CollectorEvent::MessageComplete(message) =
                        collector.on_frame(frame.unwrap())
                    else {
                        continue;
                    };
                    let request = Request::decode(&message.body).unwrap();
                    let reply = match &request {
                        Request::ReadDataPoint { id } => {
                            let value = values.get(id).cloned().unwrap_or_default();
                            DataPointReport::new(*id, value).encode()
                        }
                        Request::WriteDataPoint { id, value } => {
                            let status = if reject.contains(id) { 1 } else { 0 };
                            if status == 0 {
                                values.insert(*id, value.to_vec());
                            }
                            WriteAck { id: *id, status }.encode()
                        }
                        Request::Command(command) => {
                            Bytes::copy_from_slice(&command.id().to_le_bytes())
                        }
                    };
                    log.lock().push(request);
                    session.handle_notification(&wire(message.transaction, &reply));
                }
            }
        });
        seen
    }

    #[tokio::test]
    async fn test_identify_sela_full_tier() {
        let (session, sent) = session();
        let values = HashMap::from([(2, b"146.220.11.1".to_vec())]);
        spawn_device(session.clone(), sent, values, vec![]);

        assert!(session.capability_profile().is_none());
        let profile = session.identify().await.unwrap();
        assert_eq!(profile.tier, ModelTier::Full);
        assert_eq!(profile.family.as_deref(), Some("Sela"));
        assert_eq!(session.capability_profile(), Some(profile.clone()));

        // Cached: no second read.
        assert_eq!(session.identify().await.unwrap(), profile);
        assert_eq!(
            session.snapshot().get(DataPointId(2)),
            Some(&DataPointValue::Text("146.220.11.1".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_without_answer_falls_back_to_basic() {
        let (session, _sent) = session();
        let profile = session.identify().await.unwrap();
        assert_eq!(profile.tier, ModelTier::Basic);
        assert!(profile.is_fallback());
        assert_eq!(profile.model_identifier, "");
    }

    #[tokio::test]
    async fn test_write_updates_store() {
        let (session, sent) = session();
        let device = spawn_device(session.clone(), sent, HashMap::new(), vec![]);
        let mut changes = session.state_changes();

        session
            .write(DataPointId(340), DataPointValue::Percent(50))
            .await
            .unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            StateChange {
                id: DataPointId(340),
                value: Some(DataPointValue::Percent(50)),
            }
        );

        assert_eq!(
            device.lock()[0],
            Request::WriteDataPoint {
                id: 340,
                value: Bytes::from_static(&[50]),
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_write_sends_nothing() {
        let (session, mut sent) = session();
        let err = session
            .write(DataPointId(340), DataPointValue::Percent(150))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Core(ref e) if e.is_validation()));

        let err = session
            .write(DataPointId(341), DataPointValue::Percent(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Core(_)));
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_values() {
        let (session, sent) = session();
        let values = HashMap::from([
            (341, vec![75]),
            (382, vec![0xFF, 0x80, 0x00]),
            (590, vec![]),
            (585, vec![9]),
        ]);
        spawn_device(session.clone(), sent, values, vec![]);

        assert_eq!(
            session.read(DataPointId(341)).await.unwrap(),
            Some(DataPointValue::Percent(75))
        );
        assert_eq!(
            session.read(DataPointId(382)).await.unwrap(),
            Some(DataPointValue::Rgb(aquaclean_core::Rgb::new(0xFF, 0x80, 0x00)))
        );
        // No data.
        assert_eq!(session.read(DataPointId(590)).await.unwrap(), None);
        // Out-of-range enum: unavailable, not an error.
        assert_eq!(session.read(DataPointId(585)).await.unwrap(), None);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.get(DataPointId(341)), Some(&DataPointValue::Percent(75)));
        assert!(snapshot.values.contains_key(&DataPointId(585)));
        assert_eq!(snapshot.get(DataPointId(585)), None);
    }

    #[tokio::test]
    async fn test_unknown_data_point() {
        let (session, mut sent) = session();
        assert!(matches!(
            session.read(DataPointId(9999)).await,
            Err(ClientError::Core(aquaclean_core::CoreError::UnknownDataPoint(_)))
        ));
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_write() {
        let (session, sent) = session();
        spawn_device(session.clone(), sent, HashMap::new(), vec![43]);

        let err = session
            .write(DataPointId(43), DataPointValue::Bool(true))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rejected {
                id: DataPointId(43),
                status: 1
            }
        ));
        assert_eq!(session.snapshot().get(DataPointId(43)), None);
    }

    #[tokio::test]
    async fn test_execute_command() {
        let (session, sent) = session();
        let device = spawn_device(session.clone(), sent, HashMap::new(), vec![]);

        session.execute(Command::TriggerFlushManually).await.unwrap();
        assert_eq!(
            *device.lock(),
            vec![Request::Command(Command::TriggerFlushManually)]
        );
    }

    #[tokio::test]
    async fn test_unsolicited_notifications() {
        let (session, _sent) = session();
        let mut changes = session.state_changes();
        let tid = TransactionId::new(5).unwrap();

        let body = DataPointReport::new(564, vec![1]).encode();
        session.handle_notification(&wire(tid, &body));
        assert_eq!(
            changes.try_recv().unwrap(),
            StateChange {
                id: DataPointId(564),
                value: Some(DataPointValue::Enum(1)),
            }
        );

        // Same value again: no event.
        session.handle_notification(&wire(tid, &body));
        assert!(changes.try_recv().is_err());

        let unknown = DataPointReport::new(4242, vec![7, 7]).encode();
        session.handle_notification(&wire(tid, &unknown));
        assert_eq!(
            session
                .snapshot()
                .unrecognized
                .get(&DataPointId(4242))
                .unwrap()
                .as_ref(),
            &[7, 7]
        );
    }

    #[tokio::test]
    async fn test_notification_split_and_malformed() {
        let (session, _sent) = session();
        let tid = TransactionId::new(1).unwrap();
        let mut name = vec![0x10, 0x00];
        name.extend_from_slice(b"Bathroom upstairs");
        let bytes = wire(tid, &name);
        assert!(bytes.len() > DEFAULT_MTU);

        session.handle_notification(&[0x09, 0x10, 0x00]);
        for chunk in bytes.chunks(7) {
            session.handle_notification(chunk);
        }
        assert_eq!(
            session.snapshot().get(DataPointId(16)),
            Some(&DataPointValue::Text("Bathroom upstairs".into()))
        );
    }

    #[tokio::test]
    async fn test_run_tears_down_on_disconnect() {
        let (session, _sent) = session();
        let (tx, rx) = mpsc::channel(8);
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run(rx).await })
        };

        let tid = TransactionId::new(2).unwrap();
        let body = DataPointReport::new(341, vec![30]).encode();
        tx.send(Bytes::from(wire(tid, &body))).await.unwrap();
        drop(tx);
        runner.await.unwrap();

        assert!(session.is_closed());
        assert!(session.snapshot().is_empty());
        assert!(matches!(
            session.read(DataPointId(341)).await,
            Err(ClientError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_identify_reads_once() {
        let (session, sent) = session();
        let values = HashMap::from([(2, b"146.270.00.1".to_vec())]);
        let device = spawn_device(session.clone(), sent, values, vec![]);

        let (first, second) = tokio::join!(session.identify(), session.identify());
        assert_eq!(first.unwrap().tier, ModelTier::Mid);
        assert_eq!(second.unwrap().tier, ModelTier::Mid);
        assert_eq!(
            device.lock().as_slice(),
            &[Request::ReadDataPoint { id: 2 }]
        );
    }

    #[tokio::test]
    async fn test_report_for_other_data_point_reaches_store() {
        let (session, mut sent) = session();
        let reader = {
            let session = session.clone();
            tokio::spawn(async move { session.read(DataPointId(341)).await })
        };

        sent.recv().await.unwrap();
        let transaction = session.pending_transactions()[0];
        let report = DataPointReport::new(564, vec![1]).encode();
        session.handle_notification(&wire(transaction, &report));

        assert!(matches!(
            reader.await.unwrap(),
            Err(ClientError::UnexpectedResponse { .. })
        ));
        assert_eq!(
            session.snapshot().get(DataPointId(564)),
            Some(&DataPointValue::Enum(1))
        );
        assert_eq!(session.snapshot().get(DataPointId(341)), None);
    }

    #[tokio::test]
    async fn test_cancel_pending_read() {
        let (session, mut sent) = session();
        let reader = {
            let session = session.clone();
            tokio::spawn(async move { session.read(DataPointId(341)).await })
        };

        sent.recv().await.unwrap();
        let pending = session.pending_transactions();
        assert_eq!(pending.len(), 1);
        assert!(session.cancel(pending[0]));
        assert!(matches!(
            reader.await.unwrap(),
            Err(ClientError::Cancelled(_))
        ));
        assert!(session.pending_transactions().is_empty());
    }
}
