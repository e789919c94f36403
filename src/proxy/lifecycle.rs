use tracing::{debug, info, warn};

use super::engine::ProxyEngine;
use super::error::{ConfigError, StartError, StopError};
use crate::ports::{find_available, ConnectionTable, PortNumber, PortChecker};

/// A validated port pair ready to hand to the engine.
///
/// Built by [`ProxyLifecycleController::configure`]; the two ports never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyConfig {
    external_port: PortNumber,
    internal_port: PortNumber,
    rewrite_host_headers: bool,
}

impl ProxyConfig {
    pub(super) fn new(
        external_port: PortNumber,
        internal_port: PortNumber,
        rewrite_host_headers: bool,
    ) -> Result<Self, ConfigError> {
        if external_port == internal_port {
            return Err(ConfigError::PortCollision(internal_port.get()));
        }
        Ok(Self {
            external_port,
            internal_port,
            rewrite_host_headers,
        })
    }

    pub fn external_port(&self) -> PortNumber {
        self.external_port
    }

    pub fn internal_port(&self) -> PortNumber {
        self.internal_port
    }

    pub fn rewrite_host_headers(&self) -> bool {
        self.rewrite_host_headers
    }
}

/// Token for a running proxy. The engine instance behind it stays with the
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHandle {
    id: u64,
    config: ProxyConfig,
}

impl ProxyHandle {
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Validating,
    Starting,
    Running,
    /// Terminal
    Stopped,
}

struct LiveProxy<I> {
    handle: ProxyHandle,
    instance: I,
}

/// Owns at most one running proxy for the lifetime of a process invocation
pub struct ProxyLifecycleController<E: ProxyEngine, T> {
    engine: E,
    checker: PortChecker<T>,
    state: LifecycleState,
    live: Option<LiveProxy<E::Instance>>,
    next_id: u64,
}

impl<E: ProxyEngine, T: ConnectionTable> ProxyLifecycleController<E, T> {
    pub fn new(engine: E, checker: PortChecker<T>) -> Self {
        Self {
            engine,
            checker,
            state: LifecycleState::Idle,
            live: None,
            next_id: 0,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[cfg(test)]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Handle of the running proxy, if any
    pub fn current(&self) -> Option<ProxyHandle> {
        self.live.as_ref().map(|live| live.handle)
    }

    /// Validate the requested ports and resolve the external port.
    ///
    /// The external port is the first free port at or above the request.
    /// The internal port is taken as-is: it is expected to be served already.
    pub fn configure(
        &mut self,
        external_request: i64,
        internal_request: i64,
        rewrite_host_headers: bool,
    ) -> Result<ProxyConfig, ConfigError> {
        if self.state == LifecycleState::Idle {
            self.state = LifecycleState::Validating;
        }

        let result = self.resolve(external_request, internal_request, rewrite_host_headers);

        if result.is_err() && self.state == LifecycleState::Validating {
            self.state = LifecycleState::Idle;
        }
        result
    }

    fn resolve(
        &self,
        external_request: i64,
        internal_request: i64,
        rewrite_host_headers: bool,
    ) -> Result<ProxyConfig, ConfigError> {
        let external = PortNumber::try_from(external_request).map_err(ConfigError::InvalidPort)?;
        let internal = PortNumber::try_from(internal_request).map_err(ConfigError::InvalidPort)?;

        if external == internal {
            return Err(ConfigError::PortCollision(external.get()));
        }

        let external_port = find_available(&self.checker, external)
            .ok_or(ConfigError::PortUnavailable(external.get()))?;

        let config = ProxyConfig::new(external_port, internal, rewrite_host_headers)?;

        if !self.checker.is_available(external_port) {
            return Err(ConfigError::PortUnavailable(external_port.get()));
        }

        debug!(
            "Resolved external port {} (requested {}), internal port {}",
            external_port, external, internal
        );

        Ok(config)
    }

    /// Start the engine. Only one proxy may run per controller.
    pub fn start(&mut self, config: ProxyConfig) -> Result<ProxyHandle, StartError> {
        match self.state {
            LifecycleState::Running => return Err(StartError::AlreadyRunning),
            LifecycleState::Stopped => return Err(StartError::Closed),
            _ => {}
        }

        self.state = LifecycleState::Starting;
        let instance = match self.engine.start(&config) {
            Ok(instance) => instance,
            Err(e) => {
                warn!("Proxy engine failed to start: {}", e);
                self.state = LifecycleState::Idle;
                return Err(StartError::EngineStartFailed(e));
            }
        };

        self.next_id += 1;
        let handle = ProxyHandle {
            id: self.next_id,
            config,
        };
        self.live = Some(LiveProxy { handle, instance });
        self.state = LifecycleState::Running;

        info!(
            "Proxy running: {} => {}",
            config.external_port, config.internal_port
        );
        Ok(handle)
    }

    /// Stop the proxy behind `handle`. Stopping an already stopped proxy is
    /// a no-op.
    pub fn stop(&mut self, handle: ProxyHandle) -> Result<(), StopError> {
        let live = match self.live.take() {
            Some(live) if live.handle == handle => live,
            other => {
                self.live = other;
                debug!("Proxy {} already stopped", handle.id);
                return Ok(());
            }
        };

        self.state = LifecycleState::Stopped;
        self.engine
            .stop(live.instance)
            .map_err(StopError::EngineStopFailed)
    }

    /// Shut down: stop the running proxy, if any, and refuse further starts
    pub fn close(&mut self) -> Result<(), StopError> {
        info!("Proxy-connection closed");
        let result = match self.current() {
            Some(handle) => self.stop(handle),
            None => Ok(()),
        };
        self.state = LifecycleState::Stopped;
        result
    }
}

impl<E: ProxyEngine, T> Drop for ProxyLifecycleController<E, T> {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            if let Err(e) = self.engine.stop(live.instance) {
                warn!("Failed to stop proxy engine on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::checker::tests::{occupied_port, taken_then_free, FakeTable};
    use crate::proxy::error::EngineError;
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::io;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingEngine {
        fail_start: bool,
        fail_stop: bool,
        started: Vec<ProxyConfig>,
        stopped: Vec<u32>,
    }

    impl ProxyEngine for RecordingEngine {
        type Instance = u32;

        fn start(&mut self, config: &ProxyConfig) -> Result<u32, EngineError> {
            if self.fail_start {
                return Err(EngineError::ExitedEarly(1));
            }
            self.started.push(*config);
            Ok(self.started.len() as u32)
        }

        fn stop(&mut self, instance: u32) -> Result<(), EngineError> {
            self.stopped.push(instance);
            if self.fail_stop {
                return Err(EngineError::Io(io::Error::other("kill failed")));
            }
            Ok(())
        }
    }

    /// Connection table that counts how often it is consulted
    struct CountingTable {
        ports: HashSet<u16>,
        reads: Rc<Cell<usize>>,
    }

    impl ConnectionTable for CountingTable {
        fn local_tcp_ports(&self) -> io::Result<HashSet<u16>> {
            self.reads.set(self.reads.get() + 1);
            Ok(self.ports.clone())
        }
    }

    fn controller(engine: RecordingEngine) -> ProxyLifecycleController<RecordingEngine, FakeTable> {
        ProxyLifecycleController::new(engine, PortChecker::new(FakeTable(HashSet::new())))
    }

    fn free_pair() -> (i64, i64) {
        let (listener, port) = occupied_port();
        drop(listener);
        (port.get() as i64, 8887)
    }

    fn running(
        controller: &mut ProxyLifecycleController<RecordingEngine, FakeTable>,
    ) -> ProxyHandle {
        let (external, internal) = free_pair();
        let config = controller.configure(external, internal, false).unwrap();
        controller.start(config).unwrap()
    }

    #[test]
    fn test_out_of_range_ports_are_invalid() {
        let mut controller = controller(RecordingEngine::default());
        for port in [0, -1, 65536, 100_000] {
            assert_eq!(
                controller.configure(port, 8887, false),
                Err(ConfigError::InvalidPort(port))
            );
            assert_eq!(
                controller.configure(5000, port, false),
                Err(ConfigError::InvalidPort(port))
            );
        }
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_equal_ports_collide_before_probing() {
        let reads = Rc::new(Cell::new(0));
        let table = CountingTable {
            ports: HashSet::new(),
            reads: Rc::clone(&reads),
        };
        let mut controller =
            ProxyLifecycleController::new(RecordingEngine::default(), PortChecker::new(table));

        for port in [1, 8887, 65535] {
            assert_eq!(
                controller.configure(port, port, false),
                Err(ConfigError::PortCollision(port as u16))
            );
        }
        assert_eq!(reads.get(), 0);
        assert!(controller.engine().started.is_empty());
    }

    #[test]
    fn test_occupied_external_port_moves_up() {
        // The requested port is held by another socket as far as the OS table is concerned
        let (taken, free) = taken_then_free();
        let checker = PortChecker::new(FakeTable(HashSet::from([taken.get()])));
        let mut controller = ProxyLifecycleController::new(RecordingEngine::default(), checker);

        let config = controller.configure(taken.get() as i64, 8887, false).unwrap();
        assert_eq!(config.external_port(), free);
        assert_eq!(config.internal_port().get(), 8887);
        assert!(!config.rewrite_host_headers());
    }

    #[test]
    fn test_bound_listener_moves_external_port_up() {
        let (_listener, port) = occupied_port();
        let mut controller = controller(RecordingEngine::default());

        let config = controller.configure(port.get() as i64, 8887, true).unwrap();
        assert!(config.external_port() > port);
        assert!(config.rewrite_host_headers());
    }

    #[test]
    fn test_allocated_port_colliding_with_internal() {
        // The requested external port is taken and the next free one is the internal port
        let (taken, free) = taken_then_free();
        let checker = PortChecker::new(FakeTable(HashSet::from([taken.get()])));
        let mut controller = ProxyLifecycleController::new(RecordingEngine::default(), checker);

        let result = controller.configure(taken.get() as i64, free.get() as i64, false);
        assert_eq!(result, Err(ConfigError::PortCollision(free.get())));
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert!(controller.engine().started.is_empty());
    }

    #[test]
    fn test_config_with_equal_ports_cannot_be_built() {
        let port = PortNumber::new(8887).unwrap();
        assert_eq!(
            ProxyConfig::new(port, port, false),
            Err(ConfigError::PortCollision(8887))
        );

        let other = PortNumber::new(5000).unwrap();
        let config = ProxyConfig::new(other, port, true).unwrap();
        assert_eq!(config.external_port(), other);
        assert_eq!(config.internal_port(), port);
    }

    #[test]
    fn test_exhausted_scan_is_unavailable() {
        let checker = PortChecker::new(FakeTable(HashSet::from([65534, 65535])));
        let mut controller = ProxyLifecycleController::new(RecordingEngine::default(), checker);
        assert_eq!(
            controller.configure(65534, 8887, false),
            Err(ConfigError::PortUnavailable(65534))
        );
    }

    #[test]
    fn test_start_runs_engine_with_config() {
        let mut controller = controller(RecordingEngine::default());
        let handle = running(&mut controller);

        assert_eq!(controller.state(), LifecycleState::Running);
        assert_eq!(controller.current(), Some(handle));
        assert_eq!(controller.engine().started, vec![*handle.config()]);
    }

    #[test]
    fn test_second_start_is_rejected() {
        let mut controller = controller(RecordingEngine::default());
        let handle = running(&mut controller);

        let result = controller.start(*handle.config());
        assert!(matches!(result, Err(StartError::AlreadyRunning)));
        assert_eq!(controller.engine().started.len(), 1);
    }

    #[test]
    fn test_engine_failure_leaves_controller_idle() {
        let mut controller = controller(RecordingEngine {
            fail_start: true,
            ..Default::default()
        });
        let (external, internal) = free_pair();
        let config = controller.configure(external, internal, false).unwrap();

        let result = controller.start(config);
        assert!(matches!(result, Err(StartError::EngineStartFailed(_))));
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.current(), None);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut controller = controller(RecordingEngine::default());
        let handle = running(&mut controller);

        controller.stop(handle).unwrap();
        controller.stop(handle).unwrap();

        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(controller.engine().stopped, vec![1]);
    }

    #[test]
    fn test_stop_failure_still_releases_handle() {
        let mut controller = controller(RecordingEngine {
            fail_stop: true,
            ..Default::default()
        });
        let handle = running(&mut controller);

        assert!(matches!(
            controller.stop(handle),
            Err(StopError::EngineStopFailed(_))
        ));
        assert_eq!(controller.current(), None);
        controller.stop(handle).unwrap();
    }

    #[test]
    fn test_close_stops_live_proxy_and_is_terminal() {
        let mut controller = controller(RecordingEngine::default());
        let handle = running(&mut controller);

        controller.close().unwrap();
        assert_eq!(controller.engine().stopped, vec![1]);

        controller.close().unwrap();
        assert_eq!(controller.engine().stopped, vec![1]);

        let result = controller.start(*handle.config());
        assert!(matches!(result, Err(StartError::Closed)));
    }

    #[test]
    fn test_close_without_proxy() {
        let mut controller = controller(RecordingEngine::default());
        controller.close().unwrap();
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(controller.engine().stopped.is_empty());
    }
}
