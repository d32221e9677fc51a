use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::{Capability, OnFailure, Parameter, ResourceStatus, Stack, StackStatus};

use crate::{Result, StackError};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    Done,
    InProgress,
    Failed,
}

/// Maps a CloudFormation stack status onto whether we are finished waiting.
/// A rollback, even a successful one, means our change did not land.
pub fn classify_status(status: &StackStatus) -> StackPhase {
    match status {
        StackStatus::CreateComplete |
        StackStatus::UpdateComplete |
        StackStatus::ImportComplete => StackPhase::Done,
        StackStatus::RollbackComplete |
        StackStatus::UpdateRollbackComplete |
        StackStatus::ImportRollbackComplete |
        StackStatus::DeleteComplete |
        StackStatus::CreateFailed |
        StackStatus::DeleteFailed |
        StackStatus::ImportRollbackFailed |
        StackStatus::RollbackFailed |
        StackStatus::UpdateFailed |
        StackStatus::UpdateRollbackFailed => StackPhase::Failed,
        other => {
            if other.as_str().ends_with("IN_PROGRESS") {
                StackPhase::InProgress
            } else {
                StackPhase::Failed
            }
        }
    }
}

/// A stack CloudFormation had nothing to change on is only usable when its
/// last operation landed. `UPDATE_ROLLBACK_COMPLETE` here is a failure.
fn unchanged_stack_phase(name: &str, status: &StackStatus, reason: Option<&str>) -> Result<StackPhase> {
    match classify_status(status) {
        StackPhase::Failed => Err(StackError::Failed {
            stack: name.to_string(),
            status: status.as_str().to_string(),
            reason: reason.unwrap_or("no reason given").to_string(),
        }),
        phase => Ok(phase),
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// CloudFormation client bound to one region.
pub struct CfnClient {
    client: aws_sdk_cloudformation::Client,
    region: String,
}

impl CfnClient {
    pub async fn new(region: &str) -> Self {
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_cloudformation::Client::new(&shared_config),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn find_stack(&self, name: &str) -> Result<Option<Stack>> {
        match self.client.describe_stacks().stack_name(name).send().await {
            Ok(resp) => Ok(resp.stacks().first().cloned()),
            Err(e) => {
                let e_str = DisplayErrorContext(&e).to_string();
                if e_str.contains("does not exist") {
                    return Ok(None);
                }
                Err(StackError::Aws { stack: name.to_string(), message: e_str })
            }
        }
    }

    pub async fn does_stack_exist(&self, name: &str) -> Result<bool> {
        Ok(self.find_stack(name).await?.is_some())
    }

    /// Current outputs of a stack, or None if it was never deployed.
    pub async fn stack_outputs(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.find_stack(name).await?.map(|stack| outputs_of(&stack)))
    }

    /// The reason attached to the earliest failed resource event since
    /// `since_secs`. That is where a custom resource's FAILED reason shows up.
    async fn first_failure_reason(&self, name: &str, since_secs: i64) -> Option<String> {
        let resp = self.client.describe_stack_events().stack_name(name).send().await.ok()?;
        // events come back newest first
        resp.stack_events()
            .iter()
            .rev()
            .filter(|ev| ev.timestamp().map(|t| t.secs() >= since_secs).unwrap_or(false))
            .find(|ev| matches!(
                ev.resource_status(),
                Some(ResourceStatus::CreateFailed) | Some(ResourceStatus::UpdateFailed) | Some(ResourceStatus::DeleteFailed)
            ))
            .map(|ev| format!(
                "{}: {}",
                ev.logical_resource_id().unwrap_or_default(),
                ev.resource_status_reason().unwrap_or_default()
            ))
    }

    /// Returns Ok(Some(stack)) once the stack reaches a successful terminal
    /// state, Ok(None) while it is still moving.
    pub async fn describe_stack(&self, name: &str, since_secs: i64) -> Result<Option<Stack>> {
        let stack = self.find_stack(name).await?.ok_or_else(|| StackError::NotFound(name.to_string()))?;
        let status = stack.stack_status().cloned().unwrap_or(StackStatus::ReviewInProgress);
        match classify_status(&status) {
            StackPhase::Done => Ok(Some(stack)),
            StackPhase::InProgress => Ok(None),
            StackPhase::Failed => {
                let reason = match self.first_failure_reason(name, since_secs).await {
                    Some(r) => r,
                    None => stack.stack_status_reason().unwrap_or("no reason given").to_string(),
                };
                Err(StackError::Failed {
                    stack: name.to_string(),
                    status: status.as_str().to_string(),
                    reason,
                })
            }
        }
    }

    pub async fn wait_for_output(&self, name: &str, since_secs: i64) -> Result<BTreeMap<String, String>> {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            match self.describe_stack(name, since_secs).await? {
                Some(stack) => return Ok(outputs_of(&stack)),
                None => tracing::debug!(stack = name, "still waiting"),
            }
        }
    }

    async fn delete_and_wait(&self, name: &str) -> Result<()> {
        tracing::info!(stack = name, "removing stack left in ROLLBACK_COMPLETE");
        self.client.delete_stack().stack_name(name).send().await
            .map_err(|e| StackError::Aws { stack: name.to_string(), message: DisplayErrorContext(&e).to_string() })?;
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            match self.find_stack(name).await? {
                None => return Ok(()),
                Some(stack) if stack.stack_status() == Some(&StackStatus::DeleteComplete) => return Ok(()),
                Some(stack) if stack.stack_status() == Some(&StackStatus::DeleteFailed) => {
                    return Err(StackError::Failed {
                        stack: name.to_string(),
                        status: StackStatus::DeleteFailed.as_str().to_string(),
                        reason: stack.stack_status_reason().unwrap_or_default().to_string(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    /// Submits the template and returns the time the change was submitted,
    /// or None if CloudFormation reported nothing to update.
    pub async fn create_or_update_stack(
        &self,
        name: &str,
        body: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Option<i64>> {
        let aws_err = |e: String| StackError::Aws { stack: name.to_string(), message: e };
        let params: Vec<Parameter> = parameters.iter()
            .map(|(k, v)| Parameter::builder().parameter_key(k).parameter_value(v).build())
            .collect();
        let started = now_secs();
        let mut existing = self.find_stack(name).await?;
        if let Some(stack) = &existing {
            // a failed first create can't be updated, only replaced
            if stack.stack_status() == Some(&StackStatus::RollbackComplete) {
                self.delete_and_wait(name).await?;
                existing = None;
            }
        }
        if existing.is_some() {
            tracing::info!(stack = name, region = %self.region, "updating stack");
            let resp = self.client
                .update_stack()
                .capabilities(Capability::CapabilityNamedIam)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .set_parameters(Some(params))
                .send()
                .await;
            if let Err(e) = resp {
                let e_str = DisplayErrorContext(&e).to_string();
                if e_str.contains("No updates are to be performed") {
                    tracing::info!(stack = name, "no updates to perform");
                    return Ok(None);
                }
                return Err(aws_err(e_str));
            }
        } else {
            tracing::info!(stack = name, region = %self.region, "creating stack");
            self.client
                .create_stack()
                .on_failure(OnFailure::Rollback)
                .capabilities(Capability::CapabilityNamedIam)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .set_parameters(Some(params))
                .send()
                .await
                .map_err(|e| aws_err(DisplayErrorContext(&e).to_string()))?;
        }
        Ok(Some(started))
    }

    /// Create or update, then block until the stack settles and return its outputs.
    pub async fn deploy(
        &self,
        name: &str,
        body: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        match self.create_or_update_stack(name, body, parameters).await? {
            Some(started) => self.wait_for_output(name, started).await,
            None => {
                let stack = self.find_stack(name).await?.ok_or_else(|| StackError::NotFound(name.to_string()))?;
                let status = stack.stack_status().cloned().unwrap_or(StackStatus::ReviewInProgress);
                match unchanged_stack_phase(name, &status, stack.stack_status_reason())? {
                    StackPhase::Done => Ok(outputs_of(&stack)),
                    _ => self.wait_for_output(name, now_secs()).await,
                }
            }
        }
    }
}

fn outputs_of(stack: &Stack) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for output in stack.outputs() {
        if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
            out.insert(key.to_string(), val.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollbacks_count_as_failures() {
        assert_eq!(classify_status(&StackStatus::UpdateRollbackComplete), StackPhase::Failed);
        assert_eq!(classify_status(&StackStatus::RollbackComplete), StackPhase::Failed);
        assert_eq!(classify_status(&StackStatus::UpdateComplete), StackPhase::Done);
        assert_eq!(classify_status(&StackStatus::CreateComplete), StackPhase::Done);
        assert_eq!(classify_status(&StackStatus::UpdateCompleteCleanupInProgress), StackPhase::InProgress);
        assert_eq!(classify_status(&StackStatus::ReviewInProgress), StackPhase::InProgress);
    }

    #[test]
    fn unchanged_stack_after_rollback_is_not_a_success() {
        match unchanged_stack_phase("WebBackendStack", &StackStatus::UpdateRollbackComplete, Some("bridge failed")) {
            Err(StackError::Failed { stack, status, reason }) => {
                assert_eq!(stack, "WebBackendStack");
                assert_eq!(status, "UPDATE_ROLLBACK_COMPLETE");
                assert_eq!(reason, "bridge failed");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(unchanged_stack_phase("WebBackendStack", &StackStatus::UpdateComplete, None).unwrap(), StackPhase::Done);
        assert_eq!(
            unchanged_stack_phase("WebBackendStack", &StackStatus::UpdateCompleteCleanupInProgress, None).unwrap(),
            StackPhase::InProgress
        );
    }
}
