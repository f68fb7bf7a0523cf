//! Typed Kubernetes API access
//!
//! Used to observe the live scale of the workload about to be replaced, so a
//! change of rollout mechanics never resets the replica count.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::{
    api::{Api, ListParams},
    Client, Config,
};
use tracing::debug;

use crate::domain::Kind;

/// Source of the replica count currently running in the cluster
#[async_trait]
pub trait ReplicaObserver: Send + Sync {
    /// Replicas of the named workload, `None` when it does not exist
    async fn current_replicas(&self, kind: Kind, namespace: &str, name: &str)
        -> Result<Option<i32>>;

    /// Highest replica count among deployments matching `selector`
    async fn max_replicas(&self, namespace: &str, selector: &str) -> Result<Option<i32>>;
}

/// Create Kubernetes client
pub async fn create_client() -> Result<Client> {
    let config = Config::infer()
        .await
        .context("Failed to infer kubeconfig")?;

    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Replica observation through the Kubernetes API
pub struct KubeReplicaObserver {
    client: Client,
}

impl KubeReplicaObserver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the inferred kubeconfig
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(create_client().await?))
    }
}

#[async_trait]
impl ReplicaObserver for KubeReplicaObserver {
    async fn current_replicas(
        &self,
        kind: Kind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>> {
        match kind {
            Kind::Deployment | Kind::HeadlessDeployment => {
                let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deployment = deployments
                    .get_opt(name)
                    .await
                    .with_context(|| format!("Failed to get deployment {}", name))?;
                debug!("Deployment {} found: {}", name, deployment.is_some());
                Ok(deployment.and_then(|d| d.spec).and_then(|s| s.replicas))
            }
            Kind::Statefulset => {
                let statefulsets: Api<StatefulSet> =
                    Api::namespaced(self.client.clone(), namespace);
                let sts = statefulsets
                    .get_opt(name)
                    .await
                    .with_context(|| format!("Failed to get statefulset {}", name))?;
                debug!("StatefulSet {} found: {}", name, sts.is_some());
                Ok(sts.and_then(|s| s.spec).and_then(|s| s.replicas))
            }
            Kind::Job | Kind::Cronjob | Kind::Config | Kind::ConfigToFile => Ok(None),
        }
    }

    async fn max_replicas(&self, namespace: &str, selector: &str) -> Result<Option<i32>> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = deployments
            .list(&ListParams::default().labels(selector))
            .await
            .with_context(|| format!("Failed to list deployments matching {}", selector))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|d| d.spec.and_then(|s| s.replicas))
            .max())
    }
}
