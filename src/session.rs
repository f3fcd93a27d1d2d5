use crate::config::{SessionConfig, MAX_RETRIES};
use crate::engine::RequestEngine;
use crate::protocol::{Command, Payload};
use crate::transport::Transport;
use crate::Result;

/// Receives each decoded payload as soon as its request completes.
pub trait SnapshotConsumer: Send {
    fn on_payload(&mut self, payload: Payload);
}

impl<F> SnapshotConsumer for F
where
    F: FnMut(Payload) + Send,
{
    fn on_payload(&mut self, payload: Payload) {
        self(payload)
    }
}

/// Reads a BMS over one transport and feeds the results to a consumer.
pub struct BmsSession<T, C> {
    transport: T,
    engine: RequestEngine,
    consumer: C,
    config: SessionConfig,
}

impl<T, C> BmsSession<T, C>
where
    T: Transport,
    C: SnapshotConsumer,
{
    pub fn new(transport: T, consumer: C, config: SessionConfig) -> Self {
        Self {
            engine: RequestEngine::new(&config),
            transport,
            consumer,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &RequestEngine {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    pub fn into_parts(self) -> (T, C) {
        (self.transport, self.consumer)
    }

    async fn request(&mut self, command: Command) -> Result<()> {
        let payload = self.engine.request(&mut self.transport, command).await?;
        self.consumer.on_payload(payload);
        Ok(())
    }

    /// Reads version, basic info, cell voltages and version again.
    ///
    /// Expects the transport to be connected and subscribed. The first
    /// version read only wakes the device up and may fail with any
    /// recoverable error.
    pub async fn read_cycle(&mut self) -> Result<()> {
        match self.request(Command::ReadVersion).await {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => {
                log::debug!("Warm-up read failed, continuing ({err})");
            }
            Err(err) => return Err(err),
        }
        self.request(Command::ReadBasic).await?;
        self.request(Command::ReadVoltages).await?;
        self.request(Command::ReadVersion).await?;
        Ok(())
    }

    /// Connects, runs one [`read_cycle`](Self::read_cycle) and disconnects.
    ///
    /// The whole sequence is repeated after transport failures, at most
    /// `max_retries` times (capped at [`MAX_RETRIES`]). Timeouts and decode
    /// errors end the read without a retry.
    pub async fn read_once(&mut self, max_retries: u8) -> Result<()> {
        let retries = max_retries.min(MAX_RETRIES);
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            self.engine.reset();
            let result = self.connect_and_read().await;
            self.close().await;
            match result {
                Err(err) if err.is_transport() && attempt <= retries => {
                    log::warn!(
                        "Failed try {} of {}, repeating ({err})",
                        attempt,
                        retries + 1
                    );
                }
                result => return result,
            }
        }
    }

    async fn connect_and_read(&mut self) -> Result<()> {
        if !self.transport.is_connected().await {
            log::info!("Connecting");
            self.transport.connect().await?;
        }
        self.transport
            .subscribe_notifications(self.engine.notification_handler())
            .await?;
        tokio::time::sleep(self.config.settle_delay).await;
        self.read_cycle().await
    }

    /// Abandons any outstanding request, unsubscribes and disconnects.
    ///
    /// Teardown failures are logged, not returned.
    pub async fn close(&mut self) {
        self.engine.reset();
        if let Err(err) = self.transport.unsubscribe_notifications().await {
            log::warn!("Cannot unsubscribe from notifications: {err}");
        }
        tokio::time::sleep(self.config.settle_delay).await;
        if let Err(err) = self.transport.disconnect().await {
            log::warn!("Cannot disconnect: {err}");
        }
    }
}
