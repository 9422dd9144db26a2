//! The async driver that runs an input buffer on a clock.
//!
//! [`ComboEngine`] owns one [`InputBuffer`] and one [`SignalManager`] and never
//! shares them: everything reaches them through the cloneable [`EngineHandle`]
//! as commands, and everything leaves them as broadcast events. The buffer is
//! confined to the task running [`ComboEngine::run`], so no lock is needed.

use crate::common::{Signal, TimeStamp};
use crate::components::buffer::{InputBuffer, RegistrationChange};
use crate::config::ComboEngineConfig;
use crate::document::parse_combo;
use crate::error::{ComboError, ComboResult};
use crate::events::{ComboEvent, SystemEvent};
use crate::signal::{SignalManager, SignalRegistry};
use crate::time::{EngineClock, TickEvent};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

const COMMAND_CAPACITY: usize = 256;

enum Command {
    Fire {
        name: String,
    },
    Register {
        document: Value,
        reply: oneshot::Sender<ComboResult<Signal>>,
    },
    Unregister {
        document: Value,
        reply: oneshot::Sender<ComboResult<Signal>>,
    },
    Intern {
        name: String,
        reply: oneshot::Sender<Signal>,
    },
    Shutdown,
}

#[derive(Clone)]
struct EventSenders {
    tick: broadcast::Sender<Arc<TickEvent>>,
    system: broadcast::Sender<SystemEvent>,
    combo: broadcast::Sender<ComboEvent>,
}

impl EventSenders {
    fn new() -> Self {
        let (tick, _) = broadcast::channel(256);
        let (system, _) = broadcast::channel(64);
        let (combo, _) = broadcast::channel(256);
        Self { tick, system, combo }
    }
}

/// The combo engine. Consumed by [`run`](Self::run).
pub struct ComboEngine {
    config: Arc<ComboEngineConfig>,
    buffer: InputBuffer<SignalManager>,
    commands: mpsc::Receiver<Command>,
    events: EventSenders,
}

/// A cloneable handle to a running [`ComboEngine`].
///
/// When every handle is dropped the engine shuts down.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: EventSenders,
}

impl ComboEngine {
    /// Creates an engine and the handle used to drive it.
    pub fn new(config: ComboEngineConfig) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let events = EventSenders::new();
        let buffer = InputBuffer::new(config.input, SignalManager::new());
        let engine = Self {
            config: Arc::new(config),
            buffer,
            commands: command_rx,
            events: events.clone(),
        };
        let handle = EngineHandle {
            commands: command_tx,
            events,
        };
        (engine, handle)
    }

    pub fn config(&self) -> &ComboEngineConfig {
        &self.config
    }

    /// Runs the tick loop until [`EngineHandle::shutdown`] is called or every
    /// handle is dropped.
    pub async fn run(mut self) -> ComboResult<()> {
        info!("ComboEngine starting up...");
        let clock = EngineClock::start();
        let mut ticker = tokio::time::interval(self.config.resolution.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick_count = 0u64;

        self.buffer.init();
        self.events
            .system
            .send(SystemEvent::EngineStarted {
                timestamp: clock.origin(),
            })
            .ok();
        info!("Engine running at {:?}.", self.config.resolution);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.process_command(command, clock.now()),
                },
                _ = ticker.tick() => {
                    tick_count += 1;
                    self.process_tick(tick_count, clock.now());
                }
            }
        }

        info!("Shutdown requested. Releasing every registration...");
        let subscriptions: Vec<Signal> = self.buffer.registry().subscriptions().collect();
        self.buffer.shutdown();
        for signal in subscriptions {
            self.publish_unsubscribed(signal);
        }
        self.events.system.send(SystemEvent::EngineShutdown).ok();
        info!("ComboEngine has shut down.");
        Ok(())
    }

    fn process_tick(&mut self, tick_count: u64, now: TimeStamp) {
        let report = self.buffer.update(now);
        let fired = self.buffer.registry_mut().fire_pending();
        if !fired.is_empty() || report.merged > 0 {
            trace!(tick_count, now, merged = report.merged, fired = fired.len(), "Tick processed.");
        }

        let wall_time = Utc::now();
        for signal in fired {
            let name = self.buffer.registry().display_name(signal);
            info!(tick_count, %signal, name = %name, "Combo fired.");
            if self.buffer.registry().is_subscribed(signal) {
                self.buffer.on_signal(signal, now);
            }
            self.events
                .combo
                .send(ComboEvent {
                    signal,
                    name,
                    tick: tick_count,
                    timestamp: now,
                    wall_time,
                })
                .ok();
        }

        self.events
            .tick
            .send(Arc::new(TickEvent {
                tick_count,
                timestamp: now,
                wall_time,
            }))
            .ok();
    }

    fn process_command(&mut self, command: Command, now: TimeStamp) {
        match command {
            Command::Fire { name } => match self.buffer.registry().lookup(&name) {
                Some(signal) if self.buffer.registry().is_subscribed(signal) => {
                    self.buffer.on_signal(signal, now);
                }
                _ => trace!(name = %name, "No combo listens to this signal. Dropped."),
            },
            Command::Register { document, reply } => {
                reply.send(self.register(&document)).ok();
            }
            Command::Unregister { document, reply } => {
                reply.send(self.unregister(&document)).ok();
            }
            Command::Intern { name, reply } => {
                reply.send(self.buffer.registry_mut().to_signal(&name)).ok();
            }
            Command::Shutdown => {}
        }
    }

    fn register(&mut self, document: &Value) -> ComboResult<Signal> {
        let combo = parse_combo(document, self.buffer.registry_mut())?;
        let change = self.buffer.register_action_combo(&combo)?;
        self.publish_change(&change);
        if let Some(id) = self.buffer.combo_id(&combo) {
            self.events
                .system
                .send(SystemEvent::ComboRegistered {
                    id,
                    signal: combo.signal(),
                    refs: change.refs,
                })
                .ok();
        }
        Ok(combo.signal())
    }

    fn unregister(&mut self, document: &Value) -> ComboResult<Signal> {
        let combo = parse_combo(document, self.buffer.registry_mut())?;
        let change = self.buffer.unregister_action_combo(&combo)?;
        self.publish_change(&change);
        self.events
            .system
            .send(SystemEvent::ComboUnregistered {
                signal: combo.signal(),
                refs: change.refs,
            })
            .ok();
        Ok(combo.signal())
    }

    fn publish_change(&self, change: &RegistrationChange) {
        for &signal in &change.subscribed {
            let name = self.buffer.registry().display_name(signal);
            debug!(%signal, name = %name, "Signal subscribed.");
            self.events
                .system
                .send(SystemEvent::SignalSubscribed { signal, name })
                .ok();
        }
        for &signal in &change.unsubscribed {
            self.publish_unsubscribed(signal);
        }
    }

    fn publish_unsubscribed(&self, signal: Signal) {
        let name = self.buffer.registry().display_name(signal);
        debug!(%signal, name = %name, "Signal unsubscribed.");
        self.events
            .system
            .send(SystemEvent::SignalUnsubscribed { signal, name })
            .ok();
    }
}

impl EngineHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> ComboResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ComboError::EngineStopped)?;
        response.await.map_err(|_| ComboError::EngineStopped)
    }

    /// Fires a raw signal by name. It is timestamped when the engine receives it.
    pub async fn fire(&self, name: impl Into<String>) -> ComboResult<()> {
        self.commands
            .send(Command::Fire { name: name.into() })
            .await
            .map_err(|_| ComboError::EngineStopped)
    }

    /// Registers a combo document, returning its output signal.
    pub async fn register(&self, document: Value) -> ComboResult<Signal> {
        self.request(|reply| Command::Register { document, reply }).await?
    }

    /// Drops one registration of a combo document, returning its output signal.
    pub async fn unregister(&self, document: Value) -> ComboResult<Signal> {
        self.request(|reply| Command::Unregister { document, reply }).await?
    }

    /// Interns a signal name.
    pub async fn intern(&self, name: impl Into<String>) -> ComboResult<Signal> {
        let name = name.into();
        self.request(|reply| Command::Intern { name, reply }).await
    }

    /// Asks the engine to stop after the commands already queued.
    pub async fn shutdown(&self) -> ComboResult<()> {
        if self.commands.send(Command::Shutdown).await.is_err() {
            warn!("Shutdown requested but the engine is not running.");
            return Err(ComboError::EngineStopped);
        }
        Ok(())
    }

    pub fn subscribe_tick_events(&self) -> broadcast::Receiver<Arc<TickEvent>> {
        self.events.tick.subscribe()
    }

    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.events.system.subscribe()
    }

    pub fn subscribe_combo_events(&self) -> broadcast::Receiver<ComboEvent> {
        self.events.combo.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn spawn_engine() -> (EngineHandle, tokio::task::JoinHandle<ComboResult<()>>) {
        let (engine, handle) = ComboEngine::new(ComboEngineConfig::default());
        (handle, tokio::spawn(engine.run()))
    }

    #[tokio::test(start_paused = true)]
    async fn fired_inputs_produce_a_combo_event() {
        let (handle, task) = spawn_engine();
        let mut combos = handle.subscribe_combo_events();

        let out = handle
            .register(json!({"sequence": ["a", "b"], "signal": "ab"}))
            .await
            .unwrap();
        handle.fire("a").await.unwrap();
        handle.fire("b").await.unwrap();

        let event = combos.recv().await.unwrap();
        assert_eq!(event.signal, out);
        assert_eq!(event.name, "ab");

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn registration_publishes_subscriptions() {
        let (handle, task) = spawn_engine();
        let mut system = handle.subscribe_system_events();
        let document = json!({"sequence": ["a", "b"], "signal": "ab"});

        handle.register(document.clone()).await.unwrap();
        assert!(matches!(system.recv().await.unwrap(), SystemEvent::EngineStarted { .. }));
        let subscribed: Vec<String> = [system.recv().await.unwrap(), system.recv().await.unwrap()]
            .into_iter()
            .filter_map(|event| match event {
                SystemEvent::SignalSubscribed { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(subscribed, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(
            system.recv().await.unwrap(),
            SystemEvent::ComboRegistered { refs: 1, .. }
        ));

        handle.unregister(document.clone()).await.unwrap();
        assert!(matches!(system.recv().await.unwrap(), SystemEvent::SignalUnsubscribed { .. }));
        assert!(matches!(system.recv().await.unwrap(), SystemEvent::SignalUnsubscribed { .. }));
        assert!(matches!(
            system.recv().await.unwrap(),
            SystemEvent::ComboUnregistered { refs: 0, .. }
        ));
        assert!(matches!(
            handle.unregister(document).await,
            Err(ComboError::NotRegistered(_))
        ));

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(matches!(system.recv().await.unwrap(), SystemEvent::EngineShutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn combo_outputs_chain_into_other_combos() {
        let (handle, task) = spawn_engine();
        let mut combos = handle.subscribe_combo_events();

        handle
            .register(json!({"sequence": ["a", "b"], "signal": "ab"}))
            .await
            .unwrap();
        handle
            .register(json!({"sequence": ["ab", "c"], "signal": "abc"}))
            .await
            .unwrap();
        handle.fire("a").await.unwrap();
        handle.fire("b").await.unwrap();
        assert_eq!(combos.recv().await.unwrap().name, "ab");

        handle.fire("c").await.unwrap();
        assert_eq!(combos.recv().await.unwrap().name, "abc");

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_documents_are_rejected() {
        let (handle, task) = spawn_engine();
        let result = handle
            .register(json!({"sequence": [{"$and": []}], "signal": "broken"}))
            .await;
        assert!(matches!(result, Err(ComboError::MalformedDocument(_))));
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn interning_is_stable_and_stopped_engine_refuses_commands() {
        let (handle, task) = spawn_engine();
        let first = handle.intern("jump").await.unwrap();
        assert_eq!(handle.intern("jump").await.unwrap(), first);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(matches!(handle.fire("jump").await, Err(ComboError::EngineStopped)));
        assert!(matches!(handle.intern("jump").await, Err(ComboError::EngineStopped)));
    }
}
