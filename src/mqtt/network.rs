//! Network facade used by the driver loop and by the items
//!
//! ```text
//! driver ──connect()──► Network ──► Transport::prepare_link ──► ConnectionManager::connect
//! driver ──poll()────► Network ──► prepare_link ──► poll_tick ──► dispatcher::route
//!                                                              └─► PublishScheduler
//! items  ──add_item()─► Network ──► TopicRegistry (+ immediate subscribe when connected)
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::config::NetworkSettings;
use super::connection::{ConnectionManager, ConnectionState, SessionStats, CONNECTIVITY, ONLINE};
use super::dispatcher;
use super::registry::{InboundCallback, OutboundEntry, TopicRegistry};
use super::scheduler::PublishScheduler;
use super::transport::{LinkError, Transport};
use crate::items::{RegisteredItem, TopicDecl};
use crate::scripts::ScriptCore;

/// Outbound entry name (and topic suffix) of the active script topic.
pub const ACTIVE_SCRIPT: &str = "active_script";

/// Errors that end the process. Everything recoverable is absorbed below this layer.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Network link failed: {0}")]
    Link(#[from] LinkError),
}

pub struct Network<T> {
    prefix: String,
    connection: ConnectionManager<T>,
    registry: TopicRegistry,
    scheduler: PublishScheduler,
    script_core: Rc<RefCell<ScriptCore>>,
    displays: Vec<String>,
}

impl<T: Transport> Network<T> {
    pub fn new(transport: T, settings: NetworkSettings) -> Self {
        let prefix = settings.topic_prefix();
        let connection = ConnectionManager::new(transport, &settings);
        let script_core = Rc::new(RefCell::new(ScriptCore::new()));

        let mut registry = TopicRegistry::new();
        registry.register_outbound(
            CONNECTIVITY,
            OutboundEntry::new(
                connection.connectivity_topic(),
                true,
                false,
                Box::new(|| Some(ONLINE.to_string())),
            ),
        );
        let core = Rc::downgrade(&script_core);
        registry.register_outbound(
            ACTIVE_SCRIPT,
            OutboundEntry::new(
                format!("{}/{}", prefix, ACTIVE_SCRIPT),
                false,
                false,
                Box::new(move || {
                    core.upgrade()
                        .map(|core| core.borrow().active_script().to_string())
                }),
            ),
        );

        info!("Network initialised for {}", prefix);
        Self {
            prefix,
            connection,
            registry,
            scheduler: PublishScheduler::new(),
            script_core,
            displays: Vec::new(),
        }
    }

    /// Brings up the link and makes the first broker attempt. Only a link failure is returned;
    /// a broker failure is logged and retried from [`Network::poll`].
    pub async fn connect(&mut self) -> Result<(), NetworkError> {
        self.connection.transport_mut().prepare_link().await?;
        if let Err(e) = self.connection.connect(&mut self.registry).await {
            warn!("Initial broker connection failed ({}), will retry", e);
        }
        Ok(())
    }

    pub async fn poll(&mut self) -> Result<(), NetworkError> {
        self.connection.transport_mut().prepare_link().await?;

        let inbound = self.connection.poll_tick(&mut self.registry).await;
        for message in &inbound {
            dispatcher::route(&mut self.registry, message);
        }

        if self.connection.is_connected() {
            self.scheduler
                .publish_all(&mut self.registry, &mut self.connection);
            self.scheduler
                .publish_telemetry(&self.prefix, &mut self.connection);
        }
        Ok(())
    }

    /// Polls every `period` until `shutdown` resolves, applying queued script commands after
    /// each tick. `shutdown` is pinned once and polled across ticks.
    pub async fn serve<F: Future>(
        &mut self,
        period: Duration,
        shutdown: F,
    ) -> Result<(), NetworkError> {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.poll().await?;
                    self.script_core.borrow_mut().apply_pending();
                }
            }
        }
    }

    /// Registers every topic the item declares. The network only keeps weak handles to the
    /// item; once the caller drops it, its outbound topics stop publishing.
    pub fn add_item(&mut self, item: RegisteredItem) {
        let category = item.category();
        let shared = item.item().clone();
        let (id, name, topics) = {
            let borrowed = shared.borrow();
            (
                borrowed.id().to_string(),
                borrowed.name().to_string(),
                borrowed.topics(),
            )
        };
        info!(
            "Adding {} '{}' with {} topics",
            item.kind(),
            id,
            topics.len()
        );
        if matches!(item, RegisteredItem::Display(_)) {
            self.displays.push(id.clone());
        }

        for decl in topics {
            match decl {
                TopicDecl::Inbound { suffix } => {
                    let topic = format!("{}/{}/{}", self.prefix, category, suffix);
                    let callback: InboundCallback = match &item {
                        RegisteredItem::Script(_) => {
                            self.script_core.borrow_mut().register(&topic, &id, &name);
                            let core = Rc::clone(&self.script_core);
                            Box::new(move |topic, payload| core.borrow_mut().dispatch(topic, payload))
                        }
                        RegisteredItem::Control(target) | RegisteredItem::Display(target) => {
                            let target = Rc::downgrade(target);
                            Box::new(move |topic, payload| match target.upgrade() {
                                Some(target) => target.borrow_mut().on_message(topic, payload),
                                None => debug!("Item for {} is gone, dropping message", topic),
                            })
                        }
                    };
                    self.registry.register_inbound(topic.clone(), callback);
                    if self.connection.is_connected() {
                        self.connection.subscribe(&topic);
                    }
                }
                TopicDecl::Outbound {
                    suffix,
                    retain,
                    repeat,
                    key,
                } => {
                    let topic = format!("{}/{}/{}", self.prefix, category, suffix);
                    let source = Rc::downgrade(&shared);
                    self.registry.register_outbound(
                        format!("{}/{}", category, suffix),
                        OutboundEntry::new(
                            topic,
                            retain,
                            repeat,
                            Box::new(move || source.upgrade().and_then(|item| item.borrow().read(&key))),
                        ),
                    );
                }
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn stats(&self) -> &SessionStats {
        self.connection.stats()
    }

    pub fn topic_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn script_core(&self) -> Rc<RefCell<ScriptCore>> {
        Rc::clone(&self.script_core)
    }

    pub fn displays(&self) -> &[String] {
        &self.displays
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }
}
