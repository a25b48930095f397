//! Kubernetes implementation of [`ClusterGateway`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::Api;
use kube::api::{DeleteParams, ListParams, PostParams};

use crate::config::ClusterConfig;
use crate::error::GatewayError;
use crate::gateway::{ClusterGateway, Deletion};

const BACKEND: &str = "kubernetes";

/// Talks to the control plane for a single namespace.
#[derive(Clone)]
pub struct KubeClusterGateway {
    client: kube::Client,
    namespace: String,
    timeout: Duration,
}

impl KubeClusterGateway {
    pub fn new(client: kube::Client, config: &ClusterConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            timeout: config.timeout,
        }
    }

    /// Build a client from in-cluster config or the local kubeconfig.
    pub async fn connect(config: &ClusterConfig) -> Result<Self, GatewayError> {
        let kube_config = kube::Config::infer()
            .await
            .map_err(|e| GatewayError::Connect {
                backend: BACKEND,
                reason: e.to_string(),
            })?;
        Self::from_kube_config(kube_config, config)
    }

    /// Build a client from an explicit kube config.
    ///
    /// Must run inside a tokio runtime.
    pub fn from_kube_config(
        mut kube_config: kube::Config,
        config: &ClusterConfig,
    ) -> Result<Self, GatewayError> {
        install_crypto_provider();

        kube_config.connect_timeout = Some(config.timeout);
        kube_config.read_timeout = Some(config.timeout);

        let client = kube::Client::try_from(kube_config).map_err(|e| GatewayError::Connect {
            backend: BACKEND,
            reason: e.to_string(),
        })?;

        tracing::info!(namespace = %config.namespace, "Connected to Kubernetes");
        Ok(Self::new(client, config))
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Run a control-plane call under the gateway timeout.
    ///
    /// The outer error is the timeout; the inner result is left raw so
    /// callers can special-case 404s.
    async fn timed<T, F>(&self, operation: &str, fut: F) -> Result<kube::Result<T>, GatewayError>
    where
        F: Future<Output = kube::Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| GatewayError::Timeout {
                backend: BACKEND,
                operation: operation.to_string(),
                secs: self.timeout.as_secs(),
            })
    }

    async fn delete_from<K>(
        &self,
        api: Api<K>,
        kind: &str,
        name: &str,
        params: &DeleteParams,
    ) -> Result<Deletion, GatewayError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let operation = format!("delete {} {}", kind, name);
        match self.timed(&operation, api.delete(name, params)).await? {
            Ok(_) => Ok(Deletion::Deleted),
            Err(e) if is_not_found(&e) => {
                tracing::debug!(kind, name, "Delete skipped, resource already absent");
                Ok(Deletion::AlreadyAbsent)
            }
            Err(e) => Err(request_error(operation, e)),
        }
    }
}

/// Select ring as the process-wide rustls provider.
///
/// kube enables ring and the AWS SDK enables aws-lc-rs, and with both
/// compiled in rustls refuses to pick one on its own.
pub fn install_crypto_provider() {
    // Err only means a provider is already installed.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn request_error(operation: String, err: kube::Error) -> GatewayError {
    GatewayError::Request {
        backend: BACKEND,
        operation,
        reason: err.to_string(),
    }
}

#[async_trait]
impl ClusterGateway for KubeClusterGateway {
    async fn get_job(&self, name: &str) -> Result<Option<Job>, GatewayError> {
        let operation = format!("get job {}", name);
        let jobs = self.jobs();
        self.timed(&operation, jobs.get_opt(name))
            .await?
            .map_err(|e| request_error(operation, e))
    }

    async fn create_job(&self, job: &Job) -> Result<Job, GatewayError> {
        let operation = format!("create job {}", job.metadata.name.as_deref().unwrap_or("?"));
        let jobs = self.jobs();
        self.timed(&operation, jobs.create(&PostParams::default(), job))
            .await?
            .map_err(|e| request_error(operation, e))
    }

    async fn delete_job(&self, name: &str) -> Result<Deletion, GatewayError> {
        // Foreground so the job's pods go with it.
        self.delete_from(self.jobs(), "job", name, &DeleteParams::foreground())
            .await
    }

    async fn list_jobs(&self, label_selector: Option<&str>) -> Result<Vec<Job>, GatewayError> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }
        let operation = format!("list jobs [{}]", label_selector.unwrap_or_default());
        let jobs = self.jobs();
        self.timed(&operation, jobs.list(&params))
            .await?
            .map(|list| list.items)
            .map_err(|e| request_error(operation, e))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, GatewayError> {
        let operation = format!(
            "create service {}",
            service.metadata.name.as_deref().unwrap_or("?")
        );
        let services = self.services();
        self.timed(&operation, services.create(&PostParams::default(), service))
            .await?
            .map_err(|e| request_error(operation, e))
    }

    async fn delete_service(&self, name: &str) -> Result<Deletion, GatewayError> {
        self.delete_from(self.services(), "service", name, &DeleteParams::default())
            .await
    }

    async fn list_pods(&self, field_selector: Option<&str>) -> Result<Vec<Pod>, GatewayError> {
        let mut params = ListParams::default();
        if let Some(selector) = field_selector.filter(|s| !s.is_empty()) {
            params = params.fields(selector);
        }
        let operation = format!("list pods [{}]", field_selector.unwrap_or_default());
        let pods = self.pods();
        self.timed(&operation, pods.list(&params))
            .await?
            .map(|list| list.items)
            .map_err(|e| request_error(operation, e))
    }

    async fn delete_pod(&self, name: &str) -> Result<Deletion, GatewayError> {
        self.delete_from(self.pods(), "pod", name, &DeleteParams::default())
            .await
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "jobs.batch \"job-x\" not found".to_string(),
            reason: "NotFound".to_string(),
            code,
        })
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(403)));
        assert!(!is_not_found(&api_error(500)));
    }

    fn cluster_config(timeout: Duration) -> ClusterConfig {
        ClusterConfig {
            namespace: "browsers".to_string(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_timed_reports_timeout() {
        let gateway = KubeClusterGateway::from_kube_config(
            kube::Config::new("http://127.0.0.1:9".parse().unwrap()),
            &cluster_config(Duration::from_millis(20)),
        )
        .unwrap();

        let result = gateway
            .timed("get job job-x", std::future::pending::<kube::Result<()>>())
            .await;
        match result {
            Err(GatewayError::Timeout {
                backend, operation, ..
            }) => {
                assert_eq!(backend, "kubernetes");
                assert_eq!(operation, "get job job-x");
            }
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_client_builds_from_explicit_config() {
        let gateway = KubeClusterGateway::from_kube_config(
            kube::Config::new("http://10.255.255.1:6443".parse().unwrap()),
            &cluster_config(Duration::from_millis(200)),
        )
        .unwrap();

        // Unreachable API server: a typed gateway error, never a panic or None.
        let err = gateway.get_job("job-x").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Timeout { .. } | GatewayError::Request { .. }
        ));
    }

    #[test]
    fn test_request_error_names_operation() {
        let err = request_error("delete job job-x".to_string(), api_error(403));
        let msg = err.to_string();
        assert!(msg.contains("kubernetes"), "got: {}", msg);
        assert!(msg.contains("delete job job-x"), "got: {}", msg);
    }
}
