//! `ClusterActor`: owns the status of one cluster
//!
//! Apply passes and artifact installs for a cluster are serialized through
//! its mailbox, so the status is never reconciled twice at once.

use std::sync::Arc;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use sealhost_dist::{DistributionReport, DistributionRequest, Distributor};
use sealhost_infra::{CloudConnector, InfraStatus};

use crate::error::CoreError;
use crate::event::ClusterEvent;
use crate::message::{ApplyInfra, ApplyReport, GetInfraStatus, InstallArtifact, StatusSnapshot};
use crate::state::ClusterPhase;
use crate::store::StatusStore;

/// Arguments for spawning a `ClusterActor`
pub struct ClusterActorArgs {
    /// Cluster name, also the status store key
    pub name: String,
    pub connector: Arc<dyn CloudConnector>,
    pub store: Arc<dyn StatusStore>,
    pub distributor: Arc<Distributor>,
    pub event_tx: broadcast::Sender<ClusterEvent>,
}

pub struct ClusterActor {
    name: String,
    phase: ClusterPhase,
    status: InfraStatus,
    connector: Arc<dyn CloudConnector>,
    store: Arc<dyn StatusStore>,
    distributor: Arc<Distributor>,
    event_tx: broadcast::Sender<ClusterEvent>,
}

impl ClusterActor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn phase(&self) -> ClusterPhase {
        self.phase
    }

    fn ensure_cluster(&self, name: &str) -> Result<(), CoreError> {
        if name == self.name {
            Ok(())
        } else {
            Err(CoreError::ClusterMismatch {
                expected: self.name.clone(),
                got: name.to_string(),
            })
        }
    }

    fn set_phase(&mut self, phase: ClusterPhase) {
        if phase == self.phase {
            return;
        }

        let from = self.phase;
        self.phase = phase;
        info!(cluster = %self.name, from = %from, to = %phase, "phase transition");

        let _ = self.event_tx.send(ClusterEvent::PhaseChanged {
            cluster: self.name.clone(),
            from: from.to_string(),
            to: phase.to_string(),
        });
    }

    async fn persist(&self) -> Result<(), CoreError> {
        if self.phase == ClusterPhase::Deleted {
            self.store.remove(&self.name).await
        } else {
            self.store.save(&self.name, &self.status).await
        }
    }
}

impl Actor for ClusterActor {
    type Args = ClusterActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        let status = args.store.load(&args.name).await?.unwrap_or_default();
        let phase = ClusterPhase::observe(&status);
        info!(cluster = %args.name, id = %actor_ref.id(), phase = %phase, "ClusterActor starting");

        Ok(Self {
            name: args.name,
            phase,
            status,
            connector: args.connector,
            store: args.store,
            distributor: args.distributor,
            event_tx: args.event_tx,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(cluster = %self.name, reason = ?reason, "ClusterActor stopping");
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<ApplyInfra> for ClusterActor {
    type Reply = Result<ApplyReport, CoreError>;

    async fn handle(&mut self, msg: ApplyInfra, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.ensure_cluster(&msg.spec.name)?;

        let deleting = msg.spec.is_deleting();
        if deleting {
            self.set_phase(ClusterPhase::Deleting);
        } else if self.phase != ClusterPhase::Ready {
            self.set_phase(ClusterPhase::Provisioning);
        }

        let result = sealhost_infra::apply(self.connector.as_ref(), &msg.spec, &mut self.status).await;
        let errors: Vec<String> = match result {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(cluster = %self.name, error = %e, "apply finished with errors");
                e.errors().iter().map(ToString::to_string).collect()
            }
        };

        self.set_phase(ClusterPhase::after_apply(
            deleting,
            errors.is_empty(),
            &self.status,
        ));

        if let Err(e) = self.persist().await {
            error!(cluster = %self.name, error = %e, "failed to persist status");
            return Err(e);
        }

        let _ = self.event_tx.send(ClusterEvent::ApplyFinished {
            cluster: self.name.clone(),
            errors: errors.clone(),
        });

        Ok(ApplyReport {
            status: self.status.clone(),
            errors,
            phase: self.phase,
        })
    }
}

impl Message<GetInfraStatus> for ClusterActor {
    type Reply = StatusSnapshot;

    async fn handle(
        &mut self,
        _msg: GetInfraStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        StatusSnapshot {
            name: self.name.clone(),
            phase: self.phase,
            status: self.status.clone(),
        }
    }
}

impl Message<InstallArtifact> for ClusterActor {
    type Reply = Result<DistributionReport, CoreError>;

    async fn handle(
        &mut self,
        msg: InstallArtifact,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let hosts = if self.phase.accepts_installs() {
            self.status.ready_ips(msg.role.as_deref())
        } else {
            Vec::new()
        };
        if hosts.is_empty() {
            return Err(CoreError::NoReadyHosts(self.name.clone()));
        }

        info!(
            cluster = %self.name,
            source = %msg.source,
            hosts = hosts.len(),
            "installing artifact"
        );

        let request = DistributionRequest {
            source: msg.source,
            hosts,
            dest_dir: msg.dest_dir,
            before: msg.before,
            after: msg.after,
        };
        let report = self.distributor.distribute(&request).await?;

        let failed: Vec<String> = report
            .hosts
            .iter()
            .filter(|h| !h.is_success())
            .map(|h| h.host.clone())
            .collect();
        let _ = self.event_tx.send(ClusterEvent::InstallFinished {
            cluster: self.name.clone(),
            hosts: report.hosts.len(),
            failed,
        });

        Ok(report)
    }
}
