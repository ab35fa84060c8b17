//! Provisioning of Shoot clusters.
//!
//! A [`Botanist`] performs individual [`Step`]s; [`reconcile_flow`] wires
//! them into a dependency graph and [`ShootReconciler`] runs that graph,
//! recording the result on the Shoot through a
//! [`StatusController`](crate::shoot::StatusController).

mod flow;
mod reconciler;
mod step;

pub use flow::{reconcile_flow, NGINX_INGRESS_RETRY, RECONCILE_FLOW_NAME, SHOOT_CLIENTS_RETRY};
pub use reconciler::{operation_type, ReconcileResult, ShootReconciler};
pub use step::{Botanist, ReconcileContext, Step};
