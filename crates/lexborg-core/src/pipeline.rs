use std::sync::Arc;

use chrono::Utc;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    agent::ChatBackend,
    config::PipelineSettings,
    context::{ContextController, FitStrategy, FittedContext},
    prompts::{self, SystemPrompts},
    queries::parse_queries,
    source::DocumentSource,
    types::{
        ChatRequest, FailureKind, ModelRunLog, PipelineStage, QueryAttempt, RetrievedDocument,
        RunRecord,
    },
};

pub const ISSUE_QUERIES_UNPARSED: &str = "failed to parse queries";
pub const ISSUE_NO_CONTEXT: &str = "no context retrieved";
pub const ISSUE_RETRIEVAL_CANCELLED: &str = "cancelled during retrieval";

/// Runs every configured model against a question: generate queries,
/// retrieve, fit context, answer. Stage failures become issues on the
/// model's log; nothing here aborts the batch.
#[derive(Clone)]
pub struct Pipeline {
    chat: Arc<dyn ChatBackend>,
    source: Arc<dyn DocumentSource>,
    settings: Arc<PipelineSettings>,
    prompts: Arc<SystemPrompts>,
    /// Bounds how many model runs are in flight at once.
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        chat: Arc<dyn ChatBackend>,
        source: Arc<dyn DocumentSource>,
        settings: PipelineSettings,
        prompts: SystemPrompts,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_models.max(1)));
        Self {
            chat,
            source,
            settings: Arc::new(settings),
            prompts: Arc::new(prompts),
            permits,
            cancel: CancellationToken::new(),
        }
    }

    /// Share an externally owned token, e.g. one wired to Ctrl-C.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cancelling stops the batch between questions, models, retrieval
    /// queries and network waits. Records already produced stay valid.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Questions run one after another; records come back in question, then model order.
    pub async fn run_batch(&self, questions: &[String]) -> Vec<RunRecord> {
        let mut records = Vec::new();
        for (i, question) in questions.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(remaining = questions.len() - i, "batch cancelled, skipping remaining questions");
                break;
            }
            info!(index = i + 1, total = questions.len(), question = %question, "processing question");
            records.extend(self.run_question(question).await);
        }
        records
    }

    /// One task per model. A task that dies (panic) loses only its own record.
    pub async fn run_question(&self, question: &str) -> Vec<RunRecord> {
        let mut tasks = JoinSet::new();
        for (idx, model) in self.settings.models.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            // Acquire before spawning so runs start in configured model order.
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let question = question.to_string();
            let model = model.clone();
            tasks.spawn(async move {
                let record = this.run_model(&question, &model).await;
                drop(permit);
                (idx, record)
            });
        }

        let mut records = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => records.push(pair),
                Err(e) => error!(question = %question, "model run aborted: {e}"),
            }
        }
        records.sort_by_key(|(idx, _)| *idx);
        records.into_iter().map(|(_, r)| r).collect()
    }

    /// Full pipeline for one model. Always reaches a terminal stage.
    pub async fn run_model(&self, question: &str, model: &str) -> RunRecord {
        let started_at = Utc::now();
        let mut log = ModelRunLog::default();
        info!(model = %model, "model run started");

        log.enter(PipelineStage::GeneratingQueries);
        let queries = self.generate_queries(question, model, &mut log).await;

        log.enter(PipelineStage::Retrieving);
        let (docs, cancelled) = self.retrieve(model, &queries, &mut log).await;
        let retrieved_count = docs.len();

        let mut context = String::new();
        let mut answer = String::new();
        if cancelled {
            info!(model = %model, documents = retrieved_count, "cancelled, skipping answer generation");
        } else if docs.is_empty() {
            log.issue(ISSUE_NO_CONTEXT);
            info!(model = %model, "no documents retrieved, skipping answer generation");
        } else {
            log.enter(PipelineStage::FittingContext);
            let controller = self.controller(model);
            let fitted = controller.fit(&docs, self.settings.context_budget_chars).await;
            note_fit(&fitted, &mut log);

            log.enter(PipelineStage::GeneratingAnswer);
            (context, answer) = self
                .generate_answer(question, model, &docs, fitted, &controller, &mut log)
                .await;
        }

        log.answer_tokens = answer.split_whitespace().count();
        log.finish();
        info!(
            model = %model,
            stage = ?log.stage,
            queries = queries.len(),
            documents = retrieved_count,
            context_chars = context.chars().count(),
            answer_chars = answer.chars().count(),
            answer_tokens = log.answer_tokens,
            query_s = log.query_time.as_secs_f64(),
            answer_s = log.answer_time.as_secs_f64(),
            issues = log.issues.len(),
            "model run finished"
        );

        RunRecord {
            question: question.to_string(),
            model: model.to_string(),
            queries,
            retrieved_count,
            context,
            answer,
            system_prompt_queries: self.prompts.queries.clone(),
            system_prompt_answer: self.prompts.answer.clone(),
            log,
            started_at,
        }
    }

    fn controller<'a>(&'a self, model: &'a str) -> ContextController<'a> {
        ContextController {
            mode: self.settings.context_mode,
            chat: self.chat.as_ref(),
            model,
            summary_system_prompt: &self.prompts.summary,
            min_summary_chars: self.settings.min_summary_chars,
            cancel: &self.cancel,
        }
    }

    async fn generate_queries(&self, question: &str, model: &str, log: &mut ModelRunLog) -> Vec<String> {
        let n = self.settings.num_queries;
        let request = ChatRequest {
            model: model.to_string(),
            system_prompt: self.prompts.queries.clone(),
            user_prompt: prompts::query_generation_prompt(question, n),
            structured_output: true,
        };

        match self.chat.complete(&request, &self.cancel).await {
            QueryAttempt::Success { content, elapsed, .. } => {
                log.query_time = elapsed;
                let queries = parse_queries(&content, n);
                if queries.is_empty() {
                    warn!(model = %model, raw_len = content.len(), "no usable queries in model output");
                    log.issue(ISSUE_QUERIES_UNPARSED);
                } else {
                    info!(model = %model, count = queries.len(), ?queries, "queries generated");
                }
                queries
            },
            QueryAttempt::Failure { kind, attempts } => {
                warn!(model = %model, %kind, attempts, "query generation failed");
                log.issue(format!("query generation failed: {kind}"));
                Vec::new()
            },
        }
    }

    /// Returns the accumulated documents and whether retrieval was cut short by cancellation.
    async fn retrieve(
        &self,
        model: &str,
        queries: &[String],
        log: &mut ModelRunLog,
    ) -> (Vec<RetrievedDocument>, bool) {
        let queries = &queries[..queries.len().min(self.settings.num_queries)];
        let mut docs = Vec::new();
        for (i, query) in queries.iter().enumerate() {
            let found = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(model = %model, collected = docs.len(), "retrieval cancelled");
                    log.issue(ISSUE_RETRIEVAL_CANCELLED);
                    return (docs, true);
                }
                found = self.source.search(query, self.settings.docs_per_query, self.settings.authority) => found,
            };
            debug!(
                model = %model,
                query = %query,
                found = found.len(),
                "retrieval query {}/{}", i + 1, queries.len()
            );
            docs.extend(found);
        }
        info!(model = %model, documents = docs.len(), "retrieval finished");
        (docs, false)
    }

    /// Returns the context actually sent with the final request and the answer text.
    async fn generate_answer(
        &self,
        question: &str,
        model: &str,
        docs: &[RetrievedDocument],
        mut fitted: FittedContext,
        controller: &ContextController<'_>,
        log: &mut ModelRunLog,
    ) -> (String, String) {
        let mut ceilings = self.settings.context_ceilings.clone().into_iter();
        loop {
            if fitted.is_empty() {
                warn!(model = %model, documents = docs.len(), "no document fits the context budget");
                log.issue("context could not be fitted to any size budget");
                return (String::new(), String::new());
            }

            let request = ChatRequest {
                model: model.to_string(),
                system_prompt: self.prompts.answer.clone(),
                user_prompt: prompts::answer_prompt(question, &fitted.serialized),
                structured_output: false,
            };

            match self.chat.complete(&request, &self.cancel).await {
                QueryAttempt::Success { content, elapsed, .. } => {
                    log.answer_time = elapsed;
                    let chars = content.trim().chars().count();
                    if chars == 0 {
                        log.issue("answer empty");
                    } else if chars < self.settings.min_answer_chars {
                        log.issue(format!("answer too short ({chars} chars)"));
                    }
                    return (fitted.serialized, content);
                },
                QueryAttempt::Failure { kind: FailureKind::PayloadTooLarge, .. } => {
                    let rejected = fitted.chars();
                    let Some(ceiling) = ceilings.find(|c| *c < rejected) else {
                        warn!(model = %model, rejected, "context rejected at every ceiling");
                        log.issue(format!(
                            "context rejected as too large at every ceiling (last {rejected} chars)"
                        ));
                        return (String::new(), String::new());
                    };
                    warn!(model = %model, rejected, ceiling, "payload too large, refitting context");
                    fitted = controller.refit(docs, ceiling);
                },
                QueryAttempt::Failure { kind, attempts } => {
                    warn!(model = %model, %kind, attempts, "answer generation failed");
                    log.issue(format!("answer generation failed: {kind}"));
                    return (fitted.serialized, String::new());
                },
            }
        }
    }
}

fn note_fit(fitted: &FittedContext, log: &mut ModelRunLog) {
    if let FitStrategy::SummaryRejected { reason, .. } = &fitted.strategy {
        log.issue(format!("{reason}; context truncated instead"));
    }
}
