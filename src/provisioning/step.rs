//! Provisioning steps and the botanist that performs them.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// One unit of provisioning work on a Shoot cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    DeployNamespace,
    DeployKubeApiServerService,
    WaitUntilKubeApiServerServiceIsReady,
    DeploySecrets,
    DeployInternalDomainDnsRecord,
    DeployExternalDomainDnsRecord,
    DeployInfrastructure,
    DeployBackupInfrastructure,
    DeployEtcd,
    DeployCloudProviderConfig,
    DeployKubeApiServer,
    DeployKubeControllerManager,
    DeployKubeScheduler,
    WaitUntilKubeApiServerIsReady,
    InitializeShootClients,
    DeployMachineControllerManager,
    DeployMachines,
    DeployKubeAddonManager,
    DeployKube2IamResources,
    DeployNginxIngressResources,
    WaitUntilVpnConnectionExists,
    ApplyCreateHook,
    DeploySeedMonitoring,
    RegisterAsSeed,
    UnregisterAsSeed,
}

impl Step {
    /// Steps wired into the reconcile flow, in registration order.
    pub const RECONCILE: [Step; 23] = [
        Step::DeployNamespace,
        Step::DeployKubeApiServerService,
        Step::WaitUntilKubeApiServerServiceIsReady,
        Step::DeploySecrets,
        Step::DeployInternalDomainDnsRecord,
        Step::DeployExternalDomainDnsRecord,
        Step::DeployInfrastructure,
        Step::DeployBackupInfrastructure,
        Step::DeployEtcd,
        Step::DeployCloudProviderConfig,
        Step::DeployKubeApiServer,
        Step::DeployKubeControllerManager,
        Step::DeployKubeScheduler,
        Step::WaitUntilKubeApiServerIsReady,
        Step::InitializeShootClients,
        Step::DeployMachineControllerManager,
        Step::DeployMachines,
        Step::DeployKubeAddonManager,
        Step::DeployKube2IamResources,
        Step::DeployNginxIngressResources,
        Step::WaitUntilVpnConnectionExists,
        Step::ApplyCreateHook,
        Step::DeploySeedMonitoring,
    ];

    /// Task name used in flows and failure descriptions.
    pub fn name(&self) -> &'static str {
        match self {
            Step::DeployNamespace => "deploy-namespace",
            Step::DeployKubeApiServerService => "deploy-kube-apiserver-service",
            Step::WaitUntilKubeApiServerServiceIsReady => "wait-until-kube-apiserver-service-is-ready",
            Step::DeploySecrets => "deploy-secrets",
            Step::DeployInternalDomainDnsRecord => "deploy-internal-domain-dns-record",
            Step::DeployExternalDomainDnsRecord => "deploy-external-domain-dns-record",
            Step::DeployInfrastructure => "deploy-infrastructure",
            Step::DeployBackupInfrastructure => "deploy-backup-infrastructure",
            Step::DeployEtcd => "deploy-etcd",
            Step::DeployCloudProviderConfig => "deploy-cloud-provider-config",
            Step::DeployKubeApiServer => "deploy-kube-apiserver",
            Step::DeployKubeControllerManager => "deploy-kube-controller-manager",
            Step::DeployKubeScheduler => "deploy-kube-scheduler",
            Step::WaitUntilKubeApiServerIsReady => "wait-until-kube-apiserver-is-ready",
            Step::InitializeShootClients => "initialize-shoot-clients",
            Step::DeployMachineControllerManager => "deploy-machine-controller-manager",
            Step::DeployMachines => "deploy-machines",
            Step::DeployKubeAddonManager => "deploy-kube-addon-manager",
            Step::DeployKube2IamResources => "deploy-kube2iam-resources",
            Step::DeployNginxIngressResources => "deploy-nginx-ingress-resources",
            Step::WaitUntilVpnConnectionExists => "wait-until-vpn-connection-exists",
            Step::ApplyCreateHook => "apply-create-hook",
            Step::DeploySeedMonitoring => "deploy-seed-monitoring",
            Step::RegisterAsSeed => "register-as-seed",
            Step::UnregisterAsSeed => "unregister-as-seed",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Performs provisioning steps against the seed and shoot infrastructure.
///
/// Implementations must be idempotent: a step may be invoked again after a
/// failed attempt, and again in the next reconcile. Long-running steps
/// should return early once `cancel` fires.
#[async_trait]
pub trait Botanist: Send + Sync {
    async fn run(&self, step: Step, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Facts about the Shoot that gate conditional steps.
///
/// Derived by the caller from the Shoot's desired spec before the flow is
/// built; never from another step's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileContext {
    /// DNS is managed by a provider rather than left unmanaged.
    pub managed_dns: bool,
    /// Running on a cloud provider (as opposed to a local Vagrant setup).
    pub is_cloud: bool,
    pub hibernated: bool,
}

impl Default for ReconcileContext {
    fn default() -> Self {
        Self {
            managed_dns: true,
            is_cloud: true,
            hibernated: false,
        }
    }
}
