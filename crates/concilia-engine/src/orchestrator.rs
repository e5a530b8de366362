//! Linear step executor.

use async_trait::async_trait;
use tracing::info;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::steps;

/// One pipeline stage. Steps run strictly in declared order; Nulls must
/// precede Estorno, and Estorno/Cancelamento must precede the matcher.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &PipelineContext) -> Result<(), PipelineError>;
}

pub struct Pipeline {
    steps: Vec<Box<dyn PipelineStep>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn PipelineStep>>) -> Self {
        Self { steps }
    }

    /// The standard five-stage reconciliation pipeline.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(steps::nulls::NullsStep::base_a()),
            Box::new(steps::estorno::EstornoStep),
            Box::new(steps::nulls::NullsStep::base_b()),
            Box::new(steps::cancelamento::CancelamentoStep),
            Box::new(steps::conciliacao::ConciliacaoStep),
        ])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order, reporting each transition first. The first
    /// error aborts the remainder.
    pub async fn run(&self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        let total = self.steps.len();
        for (index, step) in self.steps.iter().enumerate() {
            ctx.report(step.name(), index, total).await;
            info!(
                "Job {}: step {}/{} {}",
                ctx.job_id,
                index + 1,
                total,
                step.name()
            );
            step.run(ctx).await?;
        }
        Ok(())
    }
}
