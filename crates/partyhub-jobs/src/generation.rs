use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use partyhub_agent::{complete_as, CompletionOptions, ContentProvider, Message, TemplateLoader};
use partyhub_content::{
    AgeGroup, Category, CategoryLookup, ContentStore, Language, NewTask, TaskKind,
};
use partyhub_core::config::GenerationJobConfig;
use partyhub_scheduler::{Job, JobContext, JobError, JobHandler};

use crate::error::GenerationError;
use crate::retry::RetryPolicy;

pub const GENERATION_JOB_NAME: &str = "content-generation";

const SYSTEM_TEMPLATE: &str = "generate_tasks_system";
const USER_TEMPLATE: &str = "generate_tasks_user";

/// Tunables for one orchestrator, resolved from config at construction.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub count_per_combination: u32,
    /// On-demand requests are clamped to this count.
    pub max_request_count: u32,
    pub retry: RetryPolicy,
    pub inter_combination_delay: Duration,
    pub options: CompletionOptions,
    /// Languages generated for every category, in this order.
    pub languages: Vec<Language>,
}

impl GenerationSettings {
    pub fn from_config(config: &GenerationJobConfig) -> Self {
        Self {
            count_per_combination: config.count_per_combination.max(1),
            max_request_count: config.max_count_per_request.max(1),
            retry: RetryPolicy::from_config(config),
            inter_combination_delay: Duration::from_millis(config.inter_combination_delay_ms),
            options: CompletionOptions {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
            languages: Language::ALL.to_vec(),
        }
    }
}

/// One (category, language) unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationCombination {
    pub category_id: i64,
    pub category_name: String,
    pub age_group: AgeGroup,
    pub language: Language,
    pub explicit_mode: bool,
}

impl GenerationCombination {
    fn new(category: &Category, language: Language, age_group: AgeGroup) -> Self {
        Self {
            category_id: category.id,
            category_name: category.label.clone(),
            age_group,
            language,
            explicit_mode: category.requires_consent,
        }
    }
}

/// A combination that exhausted its attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateError {
    pub category_id: i64,
    pub language: Language,
    pub error: String,
}

/// Outcome of one generation run.
///
/// `total_attempts` counts combinations, not provider calls; retries of the
/// same combination are not counted separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStats {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_attempts: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub tasks_created: u32,
    pub skipped_incompatible: u32,
    pub errors: Vec<GenerateError>,
}

impl GenerationStats {
    fn new() -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            total_attempts: 0,
            success_count: 0,
            failure_count: 0,
            tasks_created: 0,
            skipped_incompatible: 0,
            errors: Vec::new(),
        }
    }

    fn record_success(&mut self, created: u32) {
        self.total_attempts += 1;
        self.success_count += 1;
        self.tasks_created += created;
    }

    fn record_failure(&mut self, combination: &GenerationCombination, error: &GenerationError) {
        self.total_attempts += 1;
        self.failure_count += 1;
        self.errors.push(GenerateError {
            category_id: combination.category_id,
            language: combination.language,
            error: error.to_string(),
        });
    }

    fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    /// Wall-clock time of the run, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Request for a single combination outside the scheduled run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub category_id: i64,
    pub target_age_group: AgeGroup,
    pub language: Language,
    /// Defaults to the configured count per combination; clamped to the
    /// configured maximum.
    pub count: Option<u32>,
}

/// Shape the provider is asked to answer with.
#[derive(Debug, Deserialize)]
struct GeneratedContent {
    #[serde(default)]
    truths: Vec<String>,
    #[serde(default)]
    dares: Vec<String>,
}

/// Generates truths and dares for every active category in every language.
pub struct ContentGenerationOrchestrator {
    provider: Arc<dyn ContentProvider>,
    templates: Arc<dyn TemplateLoader>,
    categories: Arc<dyn CategoryLookup>,
    store: Arc<dyn ContentStore>,
    settings: GenerationSettings,
}

impl ContentGenerationOrchestrator {
    pub fn new(
        provider: Arc<dyn ContentProvider>,
        templates: Arc<dyn TemplateLoader>,
        categories: Arc<dyn CategoryLookup>,
        store: Arc<dyn ContentStore>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            provider,
            templates,
            categories,
            store,
            settings,
        }
    }

    /// Wrap the orchestrator as a schedulable job.
    pub fn into_job(self: Arc<Self>, config: &GenerationJobConfig) -> Job {
        Job::new(GENERATION_JOB_NAME, &config.schedule, self)
            .with_description("Generate new truths and dares for every active category")
            .with_enabled(config.enabled)
    }

    /// Run one full generation pass.
    ///
    /// Individual combination failures are recorded in the returned stats.
    /// Only cancellation and a failed category lookup end the run early.
    #[instrument(skip(self, ctx), fields(run_id = %ctx.run_id, trigger = %ctx.trigger))]
    pub async fn run(&self, ctx: &JobContext) -> Result<GenerationStats, GenerationError> {
        let mut stats = GenerationStats::new();

        if !self.provider.is_configured() {
            info!(provider = self.provider.name(), "content provider not configured, skipping generation");
            stats.finish();
            return Ok(stats);
        }

        let categories = self.categories.find_active_categories()?;
        if categories.is_empty() {
            info!("no active categories, nothing to generate");
            stats.finish();
            return Ok(stats);
        }

        let (combinations, skipped) = self.combinations(&categories);
        stats.skipped_incompatible = skipped;
        info!(
            categories = categories.len(),
            combinations = combinations.len(),
            "starting content generation"
        );

        for (index, combination) in combinations.iter().enumerate() {
            if ctx.is_cancelled() {
                warn!(processed = index, remaining = combinations.len() - index, "generation cancelled");
                return Err(GenerationError::Cancelled);
            }

            let count = self.settings.count_per_combination;
            match self.generate_with_retry(ctx, combination, count).await {
                Ok(created) => {
                    info!(
                        category = %combination.category_name,
                        language = %combination.language,
                        created,
                        "combination generated"
                    );
                    stats.record_success(created);
                }
                Err(GenerationError::Cancelled) => return Err(GenerationError::Cancelled),
                Err(e) => {
                    warn!(
                        category = %combination.category_name,
                        language = %combination.language,
                        error = %e,
                        "combination failed"
                    );
                    stats.record_failure(combination, &e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.inter_combination_delay) => {}
                _ = ctx.cancelled() => {}
            }
        }

        stats.finish();
        info!(
            total = stats.total_attempts,
            succeeded = stats.success_count,
            failed = stats.failure_count,
            tasks_created = stats.tasks_created,
            duration_ms = stats.duration().map(|d| d.num_milliseconds()).unwrap_or_default(),
            "content generation finished"
        );
        Ok(stats)
    }

    /// Generate for a single category on request, honouring the audience
    /// compatibility rule. Returns the number of tasks created.
    #[instrument(skip(self, request), fields(category_id = request.category_id, language = %request.language))]
    pub async fn generate_on_demand(
        &self,
        request: &GenerationRequest,
    ) -> Result<u32, GenerationError> {
        if !self.provider.is_configured() {
            return Err(GenerationError::ProviderUnconfigured);
        }

        let category = self.categories.find_category(request.category_id)?;
        if !category.age_group.suits(request.target_age_group) {
            return Err(GenerationError::IncompatibleAgeGroup {
                category_id: category.id,
                category_age: category.age_group,
                target: request.target_age_group,
            });
        }

        let combination =
            GenerationCombination::new(&category, request.language, request.target_age_group);
        let count = request
            .count
            .unwrap_or(self.settings.count_per_combination)
            .clamp(1, self.settings.max_request_count);
        let ctx = JobContext::detached(GENERATION_JOB_NAME);
        self.generate_with_retry(&ctx, &combination, count).await
    }

    /// Cross product of categories and languages, in fetch order then
    /// language order. Returns the combinations and how many were dropped
    /// by the compatibility filter.
    fn combinations(&self, categories: &[Category]) -> (Vec<GenerationCombination>, u32) {
        let mut combinations = Vec::with_capacity(categories.len() * self.settings.languages.len());
        let mut skipped = 0;
        for category in categories {
            // Scheduled runs target each category's own audience.
            let target = category.age_group;
            if !category.age_group.suits(target) {
                skipped += self.settings.languages.len() as u32;
                continue;
            }
            for language in &self.settings.languages {
                combinations.push(GenerationCombination::new(category, *language, target));
            }
        }
        (combinations, skipped)
    }

    async fn generate_with_retry(
        &self,
        ctx: &JobContext,
        combination: &GenerationCombination,
        count: u32,
    ) -> Result<u32, GenerationError> {
        let policy = self.settings.retry;
        let mut attempt = 1;
        loop {
            let err = match self.generate_once(combination, count).await {
                Ok(created) => return Ok(created),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= policy.max_attempts {
                return Err(err);
            }

            let delay = policy.delay_after(attempt);
            debug!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient generation error, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => return Err(GenerationError::Cancelled),
            }
            attempt += 1;
        }
    }

    async fn generate_once(
        &self,
        combination: &GenerationCombination,
        count: u32,
    ) -> Result<u32, GenerationError> {
        let count_text = count.to_string();
        let age_group = combination.age_group.to_string();
        let placeholders = [
            ("category", combination.category_name.as_str()),
            ("age_group", age_group.as_str()),
            ("language", combination.language.name()),
            ("count", count_text.as_str()),
            ("explicit", if combination.explicit_mode { "yes" } else { "no" }),
        ];

        let system = self.templates.load_and_replace(SYSTEM_TEMPLATE, &placeholders)?;
        let user = self.templates.load_and_replace(USER_TEMPLATE, &placeholders)?;
        let messages = [Message::system(system), Message::user(user)];

        let content: GeneratedContent =
            complete_as(self.provider.as_ref(), &messages, &self.settings.options).await?;
        if content.truths.is_empty() && content.dares.is_empty() {
            return Err(GenerationError::InvalidResponse(
                "response contained no truths or dares".to_string(),
            ));
        }

        Ok(self.persist(combination, content, count as usize))
    }

    /// Insert items one by one; a rejected item is logged and skipped.
    fn persist(
        &self,
        combination: &GenerationCombination,
        content: GeneratedContent,
        limit: usize,
    ) -> u32 {
        let truths = content
            .truths
            .into_iter()
            .take(limit)
            .map(|t| (TaskKind::Truth, t));
        let dares = content
            .dares
            .into_iter()
            .take(limit)
            .map(|t| (TaskKind::Dare, t));

        let mut created = 0;
        for (kind, text) in truths.chain(dares) {
            let task = NewTask {
                category_id: combination.category_id,
                kind,
                language: combination.language,
                age_group: combination.age_group,
                text,
            };
            match self.store.create_item(&task) {
                Ok(()) => created += 1,
                Err(e) => warn!(
                    category_id = combination.category_id,
                    kind = %kind,
                    error = %e,
                    "failed to save generated item"
                ),
            }
        }
        created
    }
}

#[async_trait]
impl JobHandler for ContentGenerationOrchestrator {
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        match self.run(ctx).await {
            Ok(_) => Ok(()),
            Err(GenerationError::Cancelled) => Err(JobError::Cancelled),
            Err(e) => Err(JobError::Failed(anyhow::Error::new(e))),
        }
    }
}
