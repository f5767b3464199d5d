use sealpost_common::RequirementKind;

/// Scheduling metadata declared by a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobParameters {
    /// Survive a process restart.
    pub persistent: bool,
    /// All must hold before the job runs.
    pub requirements: Vec<RequirementKind>,
    /// Jobs with the same group run one at a time, in enqueue order.
    pub group: Option<String>,
    /// Retries allowed after the first attempt.
    pub retry_budget: u32,
}

impl JobParameters {
    #[must_use]
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    parameters: JobParameters,
}

impl JobParametersBuilder {
    #[must_use]
    pub const fn persistent(mut self) -> Self {
        self.parameters.persistent = true;
        self
    }

    /// Add a requirement. Duplicates are ignored.
    #[must_use]
    pub fn requirement(mut self, requirement: RequirementKind) -> Self {
        if !self.parameters.requirements.contains(&requirement) {
            self.parameters.requirements.push(requirement);
        }
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.parameters.group = Some(group.into());
        self
    }

    #[must_use]
    pub const fn retry_budget(mut self, budget: u32) -> Self {
        self.parameters.retry_budget = budget;
        self
    }

    #[must_use]
    pub fn build(self) -> JobParameters {
        self.parameters
    }
}
