//! Pass registration and pipeline parsing.
//!
//! Passes register by name; a pipeline text like `"bb-trace"` (comma
//! separated for several passes) parses into a runnable pipeline. Unknown
//! names are an error so misspelled pipelines fail loudly instead of
//! silently doing nothing.

use crate::instrument::{BasicBlockTracePass, PassOutcome};
use crate::ir::Module;

/// A module-level transform.
pub trait ModulePass {
    /// Name the pass registers under.
    fn name(&self) -> &'static str;
    /// Run over `module`, reporting has-modified status in the outcome.
    fn run(&mut self, module: &mut Module) -> PassOutcome;
}

impl ModulePass for BasicBlockTracePass {
    fn name(&self) -> &'static str {
        "bb-trace"
    }

    fn run(&mut self, module: &mut Module) -> PassOutcome {
        BasicBlockTracePass::run(self, module)
    }
}

/// Pipeline parse failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("unknown pass name '{0}'")]
    UnknownPass(String),
}

/// An ordered list of passes parsed from a pipeline description.
pub struct PassPipeline {
    passes: Vec<Box<dyn ModulePass>>,
}

impl std::fmt::Debug for PassPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassPipeline")
            .field("passes", &self.passes.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl PassPipeline {
    /// Parse a comma-separated pipeline description.
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        let mut passes: Vec<Box<dyn ModulePass>> = Vec::new();
        for name in text.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name {
                "bb-trace" => passes.push(Box::new(BasicBlockTracePass::new())),
                other => return Err(PipelineError::UnknownPass(other.to_string())),
            }
        }
        Ok(Self { passes })
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run every pass in order, merging their outcomes.
    pub fn run(&mut self, module: &mut Module) -> PassOutcome {
        let mut outcome = PassOutcome::unchanged();
        for pass in &mut self.passes {
            outcome.merge(pass.run(module));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_pass() {
        let pipeline = PassPipeline::parse("bb-trace").unwrap();
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_parse_rejects_unknown_pass() {
        let err = PassPipeline::parse("bb-trace,mem2reg").unwrap_err();
        assert_eq!(err, PipelineError::UnknownPass("mem2reg".to_string()));
    }

    #[test]
    fn test_empty_pipeline_reports_unmodified() {
        let mut pipeline = PassPipeline::parse("").unwrap();
        assert!(pipeline.is_empty());
        let mut module = Module::new("empty.ir");
        let outcome = pipeline.run(&mut module);
        assert!(!outcome.modified);
    }
}
