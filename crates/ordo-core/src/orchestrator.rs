//! Top-level pipelines
//!
//! `deploy`: planner, stage machine, proxy admin handover, then the `ready`
//! sentinel. `upgrade`: the upgrade coordinator over the same artifacts.
//! The sentinel is removed when a pipeline starts exporting and written only
//! after it completes, so consumers never read a half-written set.

use std::future::Future;

use crate::context::DeploymentContext;
use crate::error::Result;
use crate::guard::{GuardOutcome, InterruptGuard};
use crate::plan::DeploymentPlan;
use crate::planner::{AddressBook, DeploymentPlanner};
use crate::stages::{StageAction, StageMachine, StageReport, StepOutcome};
use crate::upgrade::{UpgradeCoordinator, UpgradeReport};

/// Result of a deployment run
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub book: AddressBook,
    pub stages: StageReport,
    pub handover: StepOutcome,
}

/// Runs the pipelines against one context
#[derive(Debug, Clone)]
pub struct Orchestrator {
    ctx: DeploymentContext,
}

impl Orchestrator {
    #[must_use]
    pub fn new(ctx: DeploymentContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn context(&self) -> &DeploymentContext {
        &self.ctx
    }

    /// Guard flushing this context's address cache
    #[must_use]
    pub fn guard(&self) -> InterruptGuard {
        InterruptGuard::new(self.ctx.addresses.clone())
    }

    /// Deploy every unit, apply the stages and mark the artifacts ready
    ///
    /// # Errors
    /// Returns the first fatal error of the planner or the stage machine
    pub async fn deploy(&self, plan: &DeploymentPlan, stages: &[StageAction]) -> Result<DeployReport> {
        self.ctx.artifacts.begin_export()?;

        let book = DeploymentPlanner::new(&self.ctx).run(plan).await?;
        let machine = StageMachine::new(&self.ctx, &book);
        let stage_report = machine.run(stages).await?;
        let handover = machine.handover_proxy_admin().await;

        self.ctx.addresses.flush()?;
        self.ctx.artifacts.finalize()?;
        tracing::info!("Deployment of {} units complete", book.len());

        Ok(DeployReport {
            book,
            stages: stage_report,
            handover,
        })
    }

    /// Upgrade every core unit, then mark the artifacts ready
    ///
    /// # Errors
    /// Returns error in fail-fast mode or on persistence failure
    pub async fn upgrade(&self, plan: &DeploymentPlan) -> Result<UpgradeReport> {
        self.ctx.artifacts.begin_export()?;
        let report = UpgradeCoordinator::new(&self.ctx).run(plan).await?;
        self.ctx.artifacts.finalize()?;
        Ok(report)
    }

    /// [`Self::deploy`] raced against `interrupt`
    ///
    /// # Errors
    /// Returns the pipeline's fatal error after the cache is flushed
    pub async fn deploy_guarded<I>(
        &self,
        plan: &DeploymentPlan,
        stages: &[StageAction],
        interrupt: I,
    ) -> Result<GuardOutcome<DeployReport>>
    where
        I: Future<Output = ()>,
    {
        self.guard().run(self.deploy(plan, stages), interrupt).await
    }

    /// [`Self::upgrade`] raced against `interrupt`
    ///
    /// # Errors
    /// Returns the pipeline's fatal error after the cache is flushed
    pub async fn upgrade_guarded<I>(&self, plan: &DeploymentPlan, interrupt: I) -> Result<GuardOutcome<UpgradeReport>>
    where
        I: Future<Output = ()>,
    {
        self.guard().run(self.upgrade(plan), interrupt).await
    }
}
