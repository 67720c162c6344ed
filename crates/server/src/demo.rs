// crates/server/src/demo.rs
//! Built-in simulated job used to exercise the pipeline end to end.

use std::time::Duration;

use anyhow::bail;
use jobtrack_jobs::ProgressReporter;
use serde::Deserialize;
use serde_json::json;

/// Job type label for demo jobs.
pub const DEMO_JOB_TYPE: &str = "demo";

const MAX_STEPS: u32 = 1_000;
const MAX_STEP_MS: u64 = 60_000;

#[derive(Debug, Clone, Deserialize)]
pub struct DemoJobRequest {
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    /// Fail after the last step instead of completing.
    #[serde(default)]
    pub fail: bool,
}

fn default_steps() -> u32 {
    5
}

fn default_step_ms() -> u64 {
    200
}

impl DemoJobRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(format!("steps must be between 1 and {MAX_STEPS}"));
        }
        if self.step_ms > MAX_STEP_MS {
            return Err(format!("step_ms must be at most {MAX_STEP_MS}"));
        }
        Ok(())
    }
}

/// Sleep `step_ms` per step, reporting progress after each one.
pub async fn run_demo(
    request: DemoJobRequest,
    progress: ProgressReporter,
) -> anyhow::Result<serde_json::Value> {
    for step in 1..=request.steps {
        tokio::time::sleep(Duration::from_millis(request.step_ms)).await;
        let percent = (step * 100 / request.steps).min(99) as u8;
        progress.report(percent, format!("Step {step}/{}", request.steps));
    }

    if request.fail {
        bail!("demo job asked to fail after {} steps", request.steps);
    }
    Ok(json!({ "steps": request.steps }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(steps: u32, step_ms: u64) -> DemoJobRequest {
        DemoJobRequest {
            steps,
            step_ms,
            fail: false,
        }
    }

    #[test]
    fn test_validate_bounds() {
        assert!(request(1, 0).validate().is_ok());
        assert!(request(0, 10).validate().is_err());
        assert!(request(MAX_STEPS + 1, 10).validate().is_err());
        assert!(request(3, MAX_STEP_MS + 1).validate().is_err());
    }

    #[test]
    fn test_defaults_from_empty_body() {
        let req: DemoJobRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.steps, 5);
        assert_eq!(req.step_ms, 200);
        assert!(!req.fail);
    }
}
