//! In-memory transport for driving the manager without a network

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rigctl::rig::{
    ClusterConfig, ConnectionManager, ExecOutput, ManagerSettings, NodeAddress, SessionTransport,
    TransportError, TransportSession,
};

#[derive(Default)]
struct Behaviour {
    reject_auth: HashSet<String>,
    hang: HashSet<String>,
    drop_on_exec: HashSet<String>,
    exec_failures: HashMap<String, (u32, String)>,
    open_delay: Duration,
    exec_delay: Duration,
    close_delay: Duration,
}

/// Shared state of one mock session
pub struct MockLink {
    pub host: String,
    alive: AtomicBool,
}

#[derive(Default)]
pub struct MockTransport {
    behaviour: Mutex<Behaviour>,
    links: Mutex<Vec<Arc<MockLink>>>,
    scripts: Arc<Mutex<Vec<(String, String)>>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    execs: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_auth(&self, host: &str) {
        self.behaviour.lock().reject_auth.insert(host.to_string());
    }

    /// Opens to `host` never complete
    pub fn hang(&self, host: &str) {
        self.behaviour.lock().hang.insert(host.to_string());
    }

    /// Exec on `host` reports the session dropped
    pub fn drop_on_exec(&self, host: &str) {
        self.behaviour.lock().drop_on_exec.insert(host.to_string());
    }

    pub fn fail_exec(&self, host: &str, status: u32, stderr: &str) {
        self.behaviour
            .lock()
            .exec_failures
            .insert(host.to_string(), (status, stderr.to_string()));
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.behaviour.lock().open_delay = delay;
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        self.behaviour.lock().exec_delay = delay;
    }

    /// Closing a session takes `delay` before the link goes down
    pub fn set_close_delay(&self, delay: Duration) {
        self.behaviour.lock().close_delay = delay;
    }

    /// Simulate the remote end dropping every session to `host`
    pub fn kill(&self, host: &str) {
        for link in self.links.lock().iter().filter(|l| l.host == host) {
            link.alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    /// Hosts with a session that is still open, sorted
    pub fn live_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .links
            .lock()
            .iter()
            .filter(|l| l.alive.load(Ordering::SeqCst))
            .map(|l| l.host.clone())
            .collect();
        hosts.sort();
        hosts
    }

    /// (host, script) for every exec, in call order
    pub fn scripts(&self) -> Vec<(String, String)> {
        self.scripts.lock().clone()
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn open(
        &self,
        node: &NodeAddress,
        _config: &ClusterConfig,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let (delay, hang, reject) = {
            let b = self.behaviour.lock();
            (
                b.open_delay,
                b.hang.contains(&node.host),
                b.reject_auth.contains(&node.host),
            )
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if reject {
            return Err(TransportError::Authentication("permission denied".to_string()));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        let link = Arc::new(MockLink {
            host: node.host.clone(),
            alive: AtomicBool::new(true),
        });
        self.links.lock().push(Arc::clone(&link));

        let (exec_delay, close_delay, drop_on_exec, failure) = {
            let b = self.behaviour.lock();
            (
                b.exec_delay,
                b.close_delay,
                b.drop_on_exec.contains(&node.host),
                b.exec_failures.get(&node.host).cloned(),
            )
        };

        Ok(Box::new(MockSession {
            link,
            exec_delay,
            close_delay,
            drop_on_exec,
            failure,
            scripts: Arc::clone(&self.scripts),
            closes: Arc::clone(&self.closes),
            execs: Arc::clone(&self.execs),
        }))
    }
}

struct MockSession {
    link: Arc<MockLink>,
    exec_delay: Duration,
    close_delay: Duration,
    drop_on_exec: bool,
    failure: Option<(u32, String)>,
    scripts: Arc<Mutex<Vec<(String, String)>>>,
    closes: Arc<AtomicUsize>,
    execs: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn exec(&self, script: &str) -> Result<ExecOutput, TransportError> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        self.scripts
            .lock()
            .push((self.link.host.clone(), script.to_string()));

        if !self.exec_delay.is_zero() {
            tokio::time::sleep(self.exec_delay).await;
        }
        if !self.link.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if self.drop_on_exec {
            self.link.alive.store(false, Ordering::SeqCst);
            return Err(TransportError::Disconnected);
        }
        if let Some((status, stderr)) = &self.failure {
            return Ok(ExecOutput {
                exit_status: Some(*status),
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }
        Ok(ExecOutput::success("ok\n"))
    }

    async fn close(&self) {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        if self.link.alive.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_alive(&self) -> bool {
        self.link.alive.load(Ordering::SeqCst)
    }
}

pub fn rig_config(host: &str) -> ClusterConfig {
    ClusterConfig::new("lg", "lg", host, 22, 3)
}

pub fn manager(transport: &Arc<MockTransport>) -> Arc<ConnectionManager> {
    Arc::new(
        ConnectionManager::new(Arc::clone(transport) as Arc<dyn SessionTransport>).with_settings(
            ManagerSettings {
                connect_timeout: Duration::from_secs(10),
                poll_interval: Duration::from_secs(1),
                debounce: Duration::from_millis(300),
            },
        ),
    )
}
