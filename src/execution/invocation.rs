//! Remote Invocation Builder
//!
//! Rewrites a task's local step command into one that dispatches the step
//! to Armada:
//!
//! ```text
//! <entrypoint> armada step <digest> <address> <namespace> <job-set> <job-file> --host=H --port=P [...]
//! ```
//!
//! Namespace, job-set and job-file come from configuration and may use the
//! placeholders `{run_id}`, `{step}`, `{task_id}` and `{retry_count}`.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;

use super::cache::PackageReference;
use crate::environment::RemoteConfig;
use crate::error::Result;
use crate::workflow::StepContext;

/// Sub-command that runs a step through Armada.
pub const REMOTE_COMMAND: &[&str] = &["armada", "step"];

/// A step command: the engine's invocation object, edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationSpec {
    /// Program and leading arguments
    pub entrypoint: Vec<String>,
    /// Sub-command path
    pub commands: Vec<String>,
    /// Positional arguments
    pub command_args: Vec<String>,
    /// `--key=value` options, rendered in key order
    pub command_options: BTreeMap<String, String>,
}

impl InvocationSpec {
    /// A local step command, as the engine would run it without a backend.
    pub fn local(entrypoint: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self {
            entrypoint: vec![entrypoint.into()],
            commands: vec!["step".to_string()],
            command_args: vec![step_name.into()],
            command_options: BTreeMap::new(),
        }
    }

    /// Adds or replaces an option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.command_options.insert(key.into(), value.into());
        self
    }

    /// Returns true if the command dispatches to Armada.
    pub fn is_remote(&self) -> bool {
        self.commands.iter().map(String::as_str).eq(REMOTE_COMMAND.iter().copied())
    }

    /// Full argument vector, entrypoint first.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(
            self.entrypoint.len()
                + self.commands.len()
                + self.command_args.len()
                + self.command_options.len(),
        );
        args.extend(self.entrypoint.iter().cloned());
        args.extend(self.commands.iter().cloned());
        args.extend(self.command_args.iter().cloned());
        args.extend(
            self.command_options
                .iter()
                .map(|(key, value)| format!("--{}={}", key, value)),
        );
        args
    }
}

impl fmt::Display for InvocationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_args().join(" "))
    }
}

/// Translates task identity and a package reference into a remote command.
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    config: RemoteConfig,
}

impl InvocationBuilder {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    /// Namespace for a task, placeholders resolved.
    pub fn namespace(&self, task: &StepContext<'_>) -> String {
        resolve_placeholders(&self.config.namespace, task)
    }

    /// Job-set name for a task, placeholders resolved.
    pub fn job_set(&self, task: &StepContext<'_>) -> String {
        resolve_placeholders(&self.config.job_set, task)
    }

    /// Job descriptor reference for a task, placeholders resolved.
    pub fn job_file(&self, task: &StepContext<'_>) -> String {
        resolve_placeholders(&self.config.job_file, task)
    }

    /// Rewrites `spec` in place into the remote command for `task`.
    ///
    /// Replaces the sub-command and positional arguments, merges the
    /// connection options into the existing options, and replaces the
    /// first entrypoint element. Performs no network I/O.
    pub fn build(
        &self,
        task: &StepContext<'_>,
        reference: &PackageReference,
        spec: &mut InvocationSpec,
    ) -> Result<()> {
        spec.commands = REMOTE_COMMAND.iter().map(|c| c.to_string()).collect();

        spec.command_args.clear();
        spec.command_args.push(reference.digest.clone());
        spec.command_args.push(reference.address.clone());
        spec.command_args.push(self.namespace(task));
        spec.command_args.push(self.job_set(task));
        spec.command_args.push(self.job_file(task));

        spec.command_options
            .insert("host".to_string(), self.config.host.clone());
        spec.command_options
            .insert("port".to_string(), self.config.port.to_string());

        let entrypoint = self.entrypoint()?;
        match spec.entrypoint.first_mut() {
            Some(first) => *first = entrypoint,
            None => spec.entrypoint.push(entrypoint),
        }

        debug!(
            "Built remote command for {}/{}/{} (attempt {}): {}",
            task.run_id, task.step_name, task.task_id, task.retry_count, spec
        );
        Ok(())
    }

    fn entrypoint(&self) -> Result<String> {
        match &self.config.entrypoint {
            Some(entrypoint) => Ok(entrypoint.clone()),
            None => Ok(std::env::current_exe()?.display().to_string()),
        }
    }
}

/// Substitutes task identity placeholders.
fn resolve_placeholders(template: &str, task: &StepContext<'_>) -> String {
    template
        .replace("{run_id}", task.run_id)
        .replace("{step}", task.step_name)
        .replace("{task_id}", task.task_id)
        .replace("{retry_count}", &task.retry_count.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepDefinition;

    fn config() -> RemoteConfig {
        let mut config = RemoteConfig::new("test", "job-set-alpha", "job-file.dummy");
        config.entrypoint = Some("/usr/bin/armada-step".to_string());
        config
    }

    fn reference() -> PackageReference {
        PackageReference {
            address: "s3://bucket/r1".to_string(),
            digest: "abc123".to_string(),
        }
    }

    fn context(node: &StepDefinition) -> StepContext<'_> {
        StepContext {
            run_id: "R1",
            step_name: "train",
            task_id: "7",
            retry_count: 0,
            max_user_code_retries: 2,
            node,
        }
    }

    #[test]
    fn test_positional_order() {
        let node = StepDefinition::new("train");
        let mut spec = InvocationSpec::local("python", "train");

        InvocationBuilder::new(config())
            .build(&context(&node), &reference(), &mut spec)
            .unwrap();

        assert_eq!(spec.commands, vec!["armada", "step"]);
        assert_eq!(
            spec.command_args,
            vec!["abc123", "s3://bucket/r1", "test", "job-set-alpha", "job-file.dummy"]
        );
        assert!(spec.is_remote());
    }

    #[test]
    fn test_connection_options_merged() {
        let node = StepDefinition::new("train");
        let mut spec = InvocationSpec::local("python", "train")
            .with_option("run-id", "R1")
            .with_option("task-id", "7");

        InvocationBuilder::new(config())
            .build(&context(&node), &reference(), &mut spec)
            .unwrap();

        assert_eq!(spec.command_options.get("host").unwrap(), "localhost");
        assert_eq!(spec.command_options.get("port").unwrap(), "50051");
        assert_eq!(spec.command_options.get("run-id").unwrap(), "R1");
        assert_eq!(spec.command_options.get("task-id").unwrap(), "7");
    }

    #[test]
    fn test_entrypoint_replaced() {
        let node = StepDefinition::new("train");
        let mut spec = InvocationSpec::local("python", "train");
        spec.entrypoint.push("flow.py".to_string());

        InvocationBuilder::new(config())
            .build(&context(&node), &reference(), &mut spec)
            .unwrap();

        assert_eq!(spec.entrypoint, vec!["/usr/bin/armada-step", "flow.py"]);
    }

    #[test]
    fn test_entrypoint_defaults_to_current_exe() {
        let node = StepDefinition::new("train");
        let mut spec = InvocationSpec::default();
        let mut config = config();
        config.entrypoint = None;

        InvocationBuilder::new(config)
            .build(&context(&node), &reference(), &mut spec)
            .unwrap();

        assert_eq!(spec.entrypoint.len(), 1);
        assert!(!spec.entrypoint[0].is_empty());
    }

    #[test]
    fn test_placeholders_resolved() {
        let node = StepDefinition::new("train");
        let mut config = config();
        config.namespace = "ml-{run_id}".to_string();
        config.job_set = "{run_id}-{step}".to_string();
        config.job_file = "jobs/{step}-{task_id}-{retry_count}.yaml".to_string();
        let mut spec = InvocationSpec::local("python", "train");

        InvocationBuilder::new(config)
            .build(&context(&node), &reference(), &mut spec)
            .unwrap();

        assert_eq!(&spec.command_args[2..], &["ml-R1", "R1-train", "jobs/train-7-0.yaml"]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let node = StepDefinition::new("train");
        let builder = InvocationBuilder::new(config());
        let mut first = InvocationSpec::local("python", "train");
        let mut second = InvocationSpec::local("python", "train");

        builder.build(&context(&node), &reference(), &mut first).unwrap();
        builder.build(&context(&node), &reference(), &mut second).unwrap();
        builder.build(&context(&node), &reference(), &mut second).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_render_args() {
        let node = StepDefinition::new("train");
        let mut spec = InvocationSpec::local("python", "train");

        InvocationBuilder::new(config())
            .build(&context(&node), &reference(), &mut spec)
            .unwrap();

        assert_eq!(
            spec.to_string(),
            "/usr/bin/armada-step armada step abc123 s3://bucket/r1 test job-set-alpha job-file.dummy --host=localhost --port=50051"
        );
    }

    #[test]
    fn test_local_spec_is_not_remote() {
        let spec = InvocationSpec::local("python", "train");
        assert!(!spec.is_remote());
        assert_eq!(spec.to_args(), vec!["python", "step", "train"]);
    }
}
