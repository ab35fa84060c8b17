//! The Shoot reconcile flow.
//!
//! Wires every [`Step`] of a reconcile into a [`Flow`] with its
//! dependencies, conditional gates and retry intervals. A gated-off step is
//! Skipped and satisfies its dependents immediately, so each step lists
//! every step it must follow directly rather than relying on ordering
//! through a step that may be skipped.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::step::{Botanist, ReconcileContext, Step};
use crate::core::{ActionResult, Flow, FlowBuilder, RetryPolicy, TaskHandle};
use crate::Result;

pub const RECONCILE_FLOW_NAME: &str = "Shoot cluster reconciliation";

/// Retry interval for building clients against a freshly started API server.
pub const SHOOT_CLIENTS_RETRY: Duration = Duration::from_secs(2 * 60);

/// Retry interval for ingress resources, which wait on DNS propagation.
pub const NGINX_INGRESS_RETRY: Duration = Duration::from_secs(10 * 60);

/// Build the reconcile flow for a Shoot.
///
/// # Errors
/// Only fails if the wiring itself is invalid.
pub fn reconcile_flow(
    botanist: Arc<dyn Botanist>,
    ctx: ReconcileContext,
    default_retry: Duration,
) -> Result<Flow> {
    let mut wiring = Wiring {
        builder: FlowBuilder::new(RECONCILE_FLOW_NAME),
        botanist,
    };
    let default_retry = RetryPolicy::every(default_retry);
    let once = RetryPolicy::once();

    let namespace = wiring.add(Step::DeployNamespace, default_retry, &[])?;
    let apiserver_service = wiring.add(Step::DeployKubeApiServerService, default_retry, &[namespace])?;
    let apiserver_service_ready = wiring.add_if(
        Step::WaitUntilKubeApiServerServiceIsReady,
        once,
        ctx.is_cloud,
        &[apiserver_service],
    )?;
    let secrets = wiring.add(
        Step::DeploySecrets,
        once,
        &[apiserver_service, apiserver_service_ready],
    )?;
    wiring.add(
        Step::DeployInternalDomainDnsRecord,
        once,
        &[apiserver_service, apiserver_service_ready],
    )?;
    wiring.add_if(Step::DeployExternalDomainDnsRecord, once, ctx.managed_dns, &[])?;
    let infrastructure = wiring.add(Step::DeployInfrastructure, once, &[secrets])?;
    let backup_infrastructure =
        wiring.add_if(Step::DeployBackupInfrastructure, once, ctx.is_cloud, &[namespace])?;
    let etcd = wiring.add(Step::DeployEtcd, default_retry, &[namespace, backup_infrastructure])?;
    let cloud_provider_config =
        wiring.add(Step::DeployCloudProviderConfig, default_retry, &[infrastructure])?;
    let apiserver = wiring.add(
        Step::DeployKubeApiServer,
        default_retry,
        &[secrets, etcd, apiserver_service_ready, cloud_provider_config],
    )?;
    wiring.add(
        Step::DeployKubeControllerManager,
        default_retry,
        &[cloud_provider_config, apiserver],
    )?;
    wiring.add(Step::DeployKubeScheduler, default_retry, &[apiserver])?;
    let apiserver_ready = wiring.add(Step::WaitUntilKubeApiServerIsReady, once, &[apiserver])?;
    let shoot_clients = wiring.add(
        Step::InitializeShootClients,
        RetryPolicy::every(SHOOT_CLIENTS_RETRY),
        &[apiserver_ready],
    )?;
    let machine_controller_manager = wiring.add_if(
        Step::DeployMachineControllerManager,
        default_retry,
        ctx.is_cloud,
        &[shoot_clients],
    )?;
    let machines = wiring.add_if(
        Step::DeployMachines,
        default_retry,
        ctx.is_cloud,
        &[machine_controller_manager, infrastructure, shoot_clients],
    )?;
    let addon_manager = wiring.add(
        Step::DeployKubeAddonManager,
        default_retry,
        &[shoot_clients, infrastructure],
    )?;
    wiring.add(Step::DeployKube2IamResources, default_retry, &[infrastructure])?;
    wiring.add_if(
        Step::DeployNginxIngressResources,
        RetryPolicy::every(NGINX_INGRESS_RETRY),
        ctx.managed_dns,
        &[addon_manager],
    )?;
    let vpn = wiring.add_if(
        Step::WaitUntilVpnConnectionExists,
        once,
        !ctx.hibernated,
        &[addon_manager, machines],
    )?;
    let create_hook = wiring.add(
        Step::ApplyCreateHook,
        default_retry,
        &[vpn, addon_manager, machines],
    )?;
    wiring.add(
        Step::DeploySeedMonitoring,
        default_retry,
        &[apiserver_ready, shoot_clients, vpn, machines, create_hook],
    )?;

    wiring.builder.build()
}

struct Wiring {
    builder: FlowBuilder,
    botanist: Arc<dyn Botanist>,
}

impl Wiring {
    fn add(&mut self, step: Step, retry: RetryPolicy, deps: &[TaskHandle]) -> Result<TaskHandle> {
        self.add_if(step, retry, true, deps)
    }

    fn add_if(
        &mut self,
        step: Step,
        retry: RetryPolicy,
        condition: bool,
        deps: &[TaskHandle],
    ) -> Result<TaskHandle> {
        let action = step_action(&self.botanist, step);
        self.builder
            .add_conditional_task(step.name(), action, retry, condition, deps)
    }
}

fn step_action(
    botanist: &Arc<dyn Botanist>,
    step: Step,
) -> impl Fn(CancellationToken) -> BoxFuture<'static, ActionResult> + Send + Sync + 'static {
    let botanist = Arc::clone(botanist);
    move |cancel: CancellationToken| -> BoxFuture<'static, ActionResult> {
        let botanist = Arc::clone(&botanist);
        Box::pin(async move { botanist.run(step, cancel).await })
    }
}
