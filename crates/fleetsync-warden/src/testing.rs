//! In-process fakes for engine unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use fleetsync_core::{Error, Result};

use crate::traits::{DesiredStateStore, Intent, RuntimeStateProvider, WardenTypes};

pub struct FakeTypes;

impl WardenTypes for FakeTypes {
    type Info = FakeInfo;
    type Deployment = String;
    type Instance = FakeInstance;
    type History = FakeHistory;
    type Incident = FakeIncident;
}

#[derive(Debug, Clone)]
pub struct FakeInfo {
    network_id: String,
    deployment_id: String,
    business_key: String,
    created_at: DateTime<Utc>,
}

impl FakeInfo {
    pub fn new(network_id: &str, deployment_id: &str, business_key: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            network_id: network_id.into(),
            deployment_id: deployment_id.into(),
            business_key: business_key.into(),
            created_at,
        }
    }
}

impl Intent for FakeInfo {
    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    fn business_key(&self) -> &str {
        &self.business_key
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone)]
pub struct FakeInstance {
    id: String,
    network_id: String,
    business_key: String,
    started_at: DateTime<Utc>,
    legacy: bool,
}

impl FakeInstance {
    pub fn new(id: &str, network_id: &str, business_key: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            network_id: network_id.into(),
            business_key: business_key.into(),
            started_at,
            legacy: false,
        }
    }

    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FakeHistory {
    id: String,
    business_key: String,
    ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FakeIncident {
    history_id: String,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start { network_id: String, deployment_id: String },
    Stop(String),
    Deploy(String),
}

#[derive(Default)]
struct RuntimeState {
    instances: Vec<FakeInstance>,
    histories: Vec<FakeHistory>,
    incidents: Vec<FakeIncident>,
    deployments: HashSet<(String, String)>,
    calls: Vec<Call>,
    fail_lookups: bool,
    fail_deploys: bool,
    fail_start: HashSet<String>,
}

/// Runtime that records commands instead of sending them. Stopped instances
/// disappear; started ones never show up.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    fn with<R>(&self, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn add_instance(&self, instance: FakeInstance) {
        self.with(|s| s.instances.push(instance));
    }

    pub fn add_history(&self, business_key: &str, id: &str, ended_at: DateTime<Utc>) {
        self.with(|s| {
            s.histories.push(FakeHistory {
                id: id.into(),
                business_key: business_key.into(),
                ended_at,
            });
        });
    }

    pub fn add_incident(&self, history_id: &str, occurred_at: DateTime<Utc>) {
        self.with(|s| {
            s.incidents.push(FakeIncident {
                history_id: history_id.into(),
                occurred_at,
            });
        });
    }

    pub fn add_deployment(&self, network_id: &str, deployment_id: &str) {
        self.with(|s| s.deployments.insert((network_id.into(), deployment_id.into())));
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.with(|s| s.fail_lookups = fail);
    }

    pub fn fail_deploys(&self, fail: bool) {
        self.with(|s| s.fail_deploys = fail);
    }

    pub fn fail_start_for(&self, business_key: &str) {
        self.with(|s| s.fail_start.insert(business_key.into()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }
}

fn fake_failure(op: &str) -> Error {
    Error::transport(format!("fake {op} failure"))
}

#[async_trait]
impl RuntimeStateProvider<FakeTypes> for FakeRuntime {
    fn all_instances(&self) -> BoxStream<'_, Result<FakeInstance>> {
        let instances = self.with(|s| s.instances.clone());
        stream::iter(instances.into_iter().map(Ok)).boxed()
    }

    async fn instances_for(&self, info: &FakeInfo) -> Result<Vec<FakeInstance>> {
        self.with(|s| {
            if s.fail_lookups {
                return Err(fake_failure("lookup"));
            }
            Ok(s.instances
                .iter()
                .filter(|i| i.network_id == info.network_id && i.business_key == info.business_key)
                .cloned()
                .collect())
        })
    }

    async fn histories_for(&self, info: &FakeInfo) -> Result<Vec<FakeHistory>> {
        Ok(self.with(|s| {
            s.histories
                .iter()
                .filter(|h| h.business_key == info.business_key)
                .cloned()
                .collect()
        }))
    }

    async fn incidents_for(&self, history: &FakeHistory) -> Result<Vec<FakeIncident>> {
        Ok(self.with(|s| {
            s.incidents
                .iter()
                .filter(|i| i.history_id == history.id)
                .cloned()
                .collect()
        }))
    }

    fn instance_id<'a>(&self, instance: &'a FakeInstance) -> &'a str {
        &instance.id
    }

    fn instance_timestamp(&self, instance: &FakeInstance) -> DateTime<Utc> {
        instance.started_at
    }

    fn history_timestamp(&self, history: &FakeHistory) -> DateTime<Utc> {
        history.ended_at
    }

    fn incident_timestamp(&self, incident: &FakeIncident) -> DateTime<Utc> {
        incident.occurred_at
    }

    fn instance_is_created_with_warden_handling_intended(&self, instance: &FakeInstance) -> bool {
        !instance.legacy
    }

    async fn deployment_exists(&self, info: &FakeInfo) -> Result<bool> {
        Ok(self.with(|s| {
            s.deployments
                .contains(&(info.network_id.clone(), info.deployment_id.clone()))
        }))
    }

    async fn start(&self, info: &FakeInfo) -> Result<()> {
        self.with(|s| {
            if s.fail_start.contains(&info.business_key) {
                return Err(fake_failure("start"));
            }
            s.calls.push(Call::Start {
                network_id: info.network_id.clone(),
                deployment_id: info.deployment_id.clone(),
            });
            Ok(())
        })
    }

    async fn stop(&self, instance: &FakeInstance) -> Result<()> {
        self.with(|s| {
            s.instances.retain(|i| i.id != instance.id);
            s.calls.push(Call::Stop(instance.id.clone()));
        });
        Ok(())
    }

    async fn deploy(&self, info: &FakeInfo, deployment: &String) -> Result<()> {
        self.with(|s| {
            if s.fail_deploys {
                return Err(fake_failure("deploy"));
            }
            s.deployments
                .insert((info.network_id.clone(), deployment.clone()));
            s.calls.push(Call::Deploy(deployment.clone()));
            Ok(())
        })
    }
}

#[derive(Default)]
struct StoreState {
    infos: BTreeMap<(String, String), FakeInfo>,
    payloads: HashSet<(String, String)>,
    fail_payload_lookups: bool,
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    fn with<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn insert(&self, info: FakeInfo) {
        self.with(|s| {
            s.infos
                .insert((info.network_id.clone(), info.business_key.clone()), info)
        });
    }

    pub fn insert_payload(&self, network_id: &str, deployment_id: &str) {
        self.with(|s| s.payloads.insert((network_id.into(), deployment_id.into())));
    }

    pub fn fail_payload_lookups(&self, fail: bool) {
        self.with(|s| s.fail_payload_lookups = fail);
    }

    pub fn contains(&self, network_id: &str, business_key: &str) -> bool {
        self.with(|s| s.infos.contains_key(&(network_id.into(), business_key.into())))
    }

    pub fn len(&self) -> usize {
        self.with(|s| s.infos.len())
    }
}

#[async_trait]
impl DesiredStateStore<FakeTypes> for FakeStore {
    fn all_infos(&self) -> BoxStream<'_, Result<FakeInfo>> {
        let infos: Vec<FakeInfo> = self.with(|s| s.infos.values().cloned().collect());
        stream::iter(infos.into_iter().map(Ok)).boxed()
    }

    async fn infos_for_instance(&self, instance: &FakeInstance) -> Result<Vec<FakeInfo>> {
        Ok(self.with(|s| {
            s.infos
                .values()
                .filter(|i| i.network_id == instance.network_id && i.business_key == instance.business_key)
                .cloned()
                .collect()
        }))
    }

    async fn infos_for_deployment(&self, network_id: &str, deployment_id: &str) -> Result<Vec<FakeInfo>> {
        Ok(self.with(|s| {
            s.infos
                .values()
                .filter(|i| i.network_id == network_id && i.deployment_id == deployment_id)
                .cloned()
                .collect()
        }))
    }

    async fn get(&self, network_id: &str, business_key: &str) -> Result<Option<FakeInfo>> {
        Ok(self.with(|s| s.infos.get(&(network_id.into(), business_key.into())).cloned()))
    }

    async fn set(&self, info: &FakeInfo) -> Result<()> {
        self.insert(info.clone());
        Ok(())
    }

    async fn remove(&self, info: &FakeInfo) -> Result<()> {
        self.with(|s| {
            s.infos
                .remove(&(info.network_id.clone(), info.business_key.clone()))
        });
        Ok(())
    }

    async fn deployment_payload(&self, info: &FakeInfo) -> Result<Option<String>> {
        self.with(|s| {
            if s.fail_payload_lookups {
                return Err(Error::storage("fake payload lookup failure"));
            }
            let key = (info.network_id.clone(), info.deployment_id.clone());
            Ok(s.payloads.contains(&key).then(|| info.deployment_id.clone()))
        })
    }
}
