//! Built-in readiness checks: instance state and socket reachability.

use crate::error::ProviderError;
use crate::readiness::ReadinessCheck;
use crate::region::Region;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

/// Lifecycle state reported for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// The instance a state check is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunningInstance {
    pub id: String,
    pub region: Region,
}

impl RunningInstance {
    pub fn new(id: impl Into<String>, region: impl Into<Region>) -> Self {
        Self { id: id.into(), region: region.into() }
    }
}

/// Consumed status lookup: the provider's describe-instances call.
#[async_trait]
pub trait InstanceStatusApi: Send + Sync {
    async fn describe_instance_state(
        &self,
        instance: &RunningInstance,
    ) -> Result<InstanceState, ProviderError>;
}

/// Holds once the instance reports a specific state.
#[derive(Clone)]
pub struct InstanceStateIs {
    api: Arc<dyn InstanceStatusApi>,
    target: InstanceState,
}

impl InstanceStateIs {
    pub fn new(api: Arc<dyn InstanceStatusApi>, target: InstanceState) -> Self {
        Self { api, target }
    }

    pub fn target(&self) -> InstanceState {
        self.target
    }
}

impl fmt::Debug for InstanceStateIs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceStateIs").field("target", &self.target).finish_non_exhaustive()
    }
}

#[async_trait]
impl ReadinessCheck<RunningInstance> for InstanceStateIs {
    type Error = ProviderError;

    async fn check(&self, instance: &RunningInstance) -> Result<bool, ProviderError> {
        let state = self.api.describe_instance_state(instance).await?;
        trace!(
            target: "cloudbind::predicates",
            instance = %instance.id, region = %instance.region, %state, expected = %self.target,
            "instance state"
        );
        Ok(state == self.target)
    }
}

/// `running` check.
pub fn instance_state_running(api: Arc<dyn InstanceStatusApi>) -> InstanceStateIs {
    InstanceStateIs::new(api, InstanceState::Running)
}

/// `terminated` check.
pub fn instance_state_terminated(api: Arc<dyn InstanceStatusApi>) -> InstanceStateIs {
    InstanceStateIs::new(api, InstanceState::Terminated)
}

/// Host and port to probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpSocket {
    pub address: String,
    pub port: u16,
}

impl IpSocket {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self { address: address.into(), port }
    }
}

impl fmt::Display for IpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Consumed reachability probe.
#[async_trait]
pub trait SocketProbe: Send + Sync {
    /// `Ok(false)` for "not yet reachable"; `Err` only when probing itself is impossible.
    async fn is_open(&self, socket: &IpSocket) -> Result<bool, std::io::Error>;
}

/// Probe by opening a TCP connection.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl SocketProbe for TcpProbe {
    async fn is_open(&self, socket: &IpSocket) -> Result<bool, std::io::Error> {
        let target = (socket.address.as_str(), socket.port);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => Ok(true),
            Ok(Err(e)) => {
                trace!(target: "cloudbind::predicates", %socket, error = %e, "socket not open");
                Ok(false)
            }
            Err(_) => {
                trace!(target: "cloudbind::predicates", %socket, "connect timed out");
                Ok(false)
            }
        }
    }
}

/// Holds once the socket accepts connections.
#[derive(Clone)]
pub struct SocketOpen {
    probe: Arc<dyn SocketProbe>,
}

impl SocketOpen {
    pub fn new(probe: Arc<dyn SocketProbe>) -> Self {
        Self { probe }
    }

    pub fn tcp() -> Self {
        Self::new(Arc::new(TcpProbe::default()))
    }
}

impl fmt::Debug for SocketOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketOpen").finish_non_exhaustive()
    }
}

#[async_trait]
impl ReadinessCheck<IpSocket> for SocketOpen {
    type Error = std::io::Error;

    async fn check(&self, socket: &IpSocket) -> Result<bool, std::io::Error> {
        self.probe.is_open(socket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::{ReadinessPolicy, ReadinessPoller};
    use crate::sleeper::InstantSleeper;
    use std::sync::Mutex;

    struct StateSequence(Mutex<Vec<Result<InstanceState, ProviderError>>>);

    #[async_trait]
    impl InstanceStatusApi for StateSequence {
        async fn describe_instance_state(
            &self,
            _instance: &RunningInstance,
        ) -> Result<InstanceState, ProviderError> {
            let mut states = self.0.lock().unwrap();
            if states.len() > 1 {
                states.remove(0)
            } else {
                states[0].clone()
            }
        }
    }

    fn poller() -> ReadinessPoller {
        ReadinessPoller::new(ReadinessPolicy::running()).with_sleeper(InstantSleeper)
    }

    #[tokio::test]
    async fn running_check_waits_for_running() {
        let api = Arc::new(StateSequence(Mutex::new(vec![
            Ok(InstanceState::Pending),
            Ok(InstanceState::Running),
        ])));
        let check = instance_state_running(api);
        let instance = RunningInstance::new("i-0abc", "us-east-1");
        assert!(poller().await_ready(&check, &instance).await.unwrap());
    }

    #[tokio::test]
    async fn terminated_check_ignores_other_states() {
        let api = Arc::new(StateSequence(Mutex::new(vec![Ok(InstanceState::ShuttingDown)])));
        let check = instance_state_terminated(api);
        let instance = RunningInstance::new("i-0abc", "us-east-1");
        assert!(!poller().await_ready(&check, &instance).await.unwrap());
    }

    #[tokio::test]
    async fn lookup_failure_propagates() {
        let api = Arc::new(StateSequence(Mutex::new(vec![Err(ProviderError::Transport(
            "connection reset".into(),
        ))])));
        let check = instance_state_running(api);
        let err = poller()
            .await_ready(&check, &RunningInstance::new("i-0abc", "us-east-1"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Transport("connection reset".into()));
    }

    #[tokio::test]
    async fn tcp_probe_sees_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let open = SocketOpen::tcp();
        assert!(open.check(&IpSocket::new("127.0.0.1", port)).await.unwrap());

        drop(listener);
        assert!(!open.check(&IpSocket::new("127.0.0.1", port)).await.unwrap());
    }

    #[test]
    fn socket_display_brackets_ipv6() {
        assert_eq!(IpSocket::new("10.0.0.1", 22).to_string(), "10.0.0.1:22");
        assert_eq!(IpSocket::new("::1", 22).to_string(), "[::1]:22");
    }

    #[test]
    fn state_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&InstanceState::ShuttingDown).unwrap(), "\"shutting-down\"");
        assert_eq!(InstanceState::ShuttingDown.to_string(), "shutting-down");
    }
}
