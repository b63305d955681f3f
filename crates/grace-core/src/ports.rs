//! Port Manager & Watchdog: allocates from a managed range, persists
//! allocations for restart reconciliation, and periodically sweeps for dead processes.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::{info, warn};

use crate::error::{GraceError, GraceResult};
use crate::mesh::{Event, EventMesh, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAllocation {
    pub port: u16,
    pub service_name: String,
    pub started_by: String,
    pub purpose: String,
    pub pid: u32,
    pub allocated_at: DateTime<Utc>,
    pub health_status: HealthStatus,
    pub request_count: u64,
    pub error_count: u64,
    pub health_check_url: Option<String>,
}

pub struct PortManager {
    range_start: u16,
    range_end: u16,
    allocations: DashMap<u16, PortAllocation>,
    tree: sled::Tree,
    mesh: Arc<EventMesh>,
    http_client: reqwest::Client,
}

impl PortManager {
    pub fn open(db: &sled::Db, mesh: Arc<EventMesh>, range_start: u16, range_end: u16) -> GraceResult<Arc<Self>> {
        let tree = db.open_tree("port_allocations")?;
        let allocations = DashMap::new();
        for kv in tree.iter() {
            let (_, value) = kv?;
            if let Ok(alloc) = serde_json::from_slice::<PortAllocation>(&value) {
                allocations.insert(alloc.port, alloc);
            }
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .expect("reqwest client builds");

        Ok(Arc::new(Self {
            range_start,
            range_end,
            allocations,
            tree,
            mesh,
            http_client,
        }))
    }

    fn persist(&self, alloc: &PortAllocation) -> GraceResult<()> {
        let encoded = serde_json::to_vec(alloc)?;
        self.tree.insert(alloc.port.to_be_bytes(), encoded)?;
        Ok(())
    }

    pub fn allocate(
        &self,
        service_name: &str,
        started_by: &str,
        purpose: &str,
        pid: u32,
    ) -> GraceResult<PortAllocation> {
        for port in self.range_start..=self.range_end {
            if self.allocations.contains_key(&port) {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                let alloc = PortAllocation {
                    port,
                    service_name: service_name.to_string(),
                    started_by: started_by.to_string(),
                    purpose: purpose.to_string(),
                    pid,
                    allocated_at: Utc::now(),
                    health_status: HealthStatus::Healthy,
                    request_count: 0,
                    error_count: 0,
                    health_check_url: None,
                };
                self.persist(&alloc)?;
                self.allocations.insert(port, alloc.clone());
                return Ok(alloc);
            }
        }
        Err(GraceError::NoPortAvailable)
    }

    pub fn release(&self, port: u16) -> GraceResult<()> {
        self.allocations.remove(&port);
        self.tree.remove(port.to_be_bytes())?;
        Ok(())
    }

    pub fn status(&self) -> Vec<PortAllocation> {
        self.allocations.iter().map(|a| a.clone()).collect()
    }

    /// Scans every 30s (configurable): verifies the owning PID is alive via `sysinfo`, and
    /// optionally pings a declared health URL. A dead allocation is released and
    /// `port.released_dead` is published.
    pub fn spawn_watchdog(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        });
    }

    pub async fn sweep_once(&self) {
        let mut system = System::new();
        system.refresh_processes();

        let ports: Vec<PortAllocation> = self.allocations.iter().map(|a| a.clone()).collect();
        for alloc in ports {
            let pid_alive = system.process(Pid::from_u32(alloc.pid)).is_some();
            let mut healthy = pid_alive;

            if healthy {
                if let Some(url) = &alloc.health_check_url {
                    healthy = self
                        .http_client
                        .get(url)
                        .send()
                        .await
                        .map(|r| r.status().is_success())
                        .unwrap_or(false);
                }
            }

            if !healthy {
                warn!(target: "grace::ports", port = alloc.port, service = %alloc.service_name, "releasing dead port allocation");
                let _ = self.release(alloc.port);
                self.mesh
                    .publish(
                        Event::new(
                            "port.released_dead",
                            "port_manager",
                            serde_json::json!({ "port": alloc.port, "service_name": alloc.service_name }),
                        )
                        .with_priority(Priority::High),
                    )
                    .await;
            } else {
                info!(target: "grace::ports", port = alloc.port, "healthy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager() -> Arc<PortManager> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let mesh = EventMesh::new(10);
        PortManager::open(&db, mesh, 18000, 18003).unwrap()
    }

    #[test]
    fn allocation_exhausts_after_range() {
        let mgr = test_manager();
        for _ in 0..4 {
            mgr.allocate("svc", "test", "unit", 1).unwrap();
        }
        let err = mgr.allocate("svc", "test", "unit", 1);
        assert!(matches!(err, Err(GraceError::NoPortAvailable)));
    }

    #[test]
    fn released_port_can_be_reallocated() {
        let mgr = test_manager();
        let first = mgr.allocate("svc", "test", "unit", 1).unwrap();
        mgr.release(first.port).unwrap();
        let second = mgr.allocate("svc", "test", "unit", 1).unwrap();
        assert_eq!(first.port, second.port);
    }
}
