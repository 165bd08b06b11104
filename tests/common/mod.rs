//! 集成测试共用的替身组件
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use question_backfill::config::{BackfillPolicy, Config};
use question_backfill::infrastructure::{BackfillStore, EnqueueOutcome, MemoryStore};
use chrono::{DateTime, Utc};
use question_backfill::error::BackfillResult;
use question_backfill::models::{
    BackfillJob, GenerationBlueprint, NewJob, Question, QuestionDefaults, Section, StepDecision,
};
use question_backfill::BackfillError;
use question_backfill::services::normalizer;
use question_backfill::services::{GenerateOptions, GeneratedBatch, Generator, YieldPlanner};
use question_backfill::workflow::{step, BackfillFlow, RunOutcome};
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;

pub const COURSE: &str = "physio";
pub const SECTION: &str = "renal";

/// 互不重复的原始题目
pub fn raw_question(n: usize) -> JsonValue {
    json!({
        "stem": format!("Explain concept{n} and mechanism{n} in renal physiology"),
        "options": ["first", "second", "third", "fourth"],
        "correctIndex": n % 4,
        "explanation": "Because of tubular transport.",
        "difficulty": "medium"
    })
}

pub fn raw_questions(range: std::ops::Range<usize>) -> Vec<JsonValue> {
    range.map(raw_question).collect()
}

pub fn blueprint() -> GenerationBlueprint {
    GenerationBlueprint {
        title: "Renal physiology".to_string(),
        summary: "Nephron transport and filtration".to_string(),
        key_points: vec!["Sodium reabsorption".to_string()],
        topic_tags: vec!["renal".to_string()],
        ..Default::default()
    }
}

/// 一步的剧本
#[derive(Debug, Clone)]
pub enum Script {
    Questions(Vec<JsonValue>),
    Fail(String),
    Panic,
}

/// 按剧本返回结果的生成器，剧本用完后返回错误
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _opts: &GenerateOptions,
    ) -> anyhow::Result<GeneratedBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Questions(questions)) => Ok(GeneratedBatch {
                questions,
                model: "scripted".to_string(),
            }),
            Some(Script::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(Script::Panic) => panic!("generator exploded"),
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }
}

/// 每次返回固定数量、从不重复的题目
pub struct FreshGenerator {
    per_call: usize,
    next: AtomicUsize,
    calls: AtomicUsize,
}

impl FreshGenerator {
    pub fn new(per_call: usize) -> Arc<Self> {
        Arc::new(Self {
            per_call,
            next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FreshGenerator {
    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _opts: &GenerateOptions,
    ) -> anyhow::Result<GeneratedBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start = self.next.fetch_add(self.per_call, Ordering::SeqCst);
        Ok(GeneratedBatch {
            questions: raw_questions(start..start + self.per_call),
            model: "fresh".to_string(),
        })
    }
}

/// 先等待一段时间再返回新题目，模拟很慢的模型调用
pub struct SlowGenerator {
    delay: Duration,
    inner: Arc<FreshGenerator>,
}

impl SlowGenerator {
    pub fn new(delay: Duration, per_call: usize) -> Arc<Self> {
        Arc::new(Self {
            delay,
            inner: FreshGenerator::new(per_call),
        })
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

#[async_trait]
impl Generator for SlowGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &GenerateOptions,
    ) -> anyhow::Result<GeneratedBatch> {
        tokio::time::sleep(self.delay).await;
        self.inner.generate(system_prompt, user_prompt, opts).await
    }
}

/// 第一次调用期间，回收器抢先把所有 RUNNING 任务当作过期回收
///
/// 模拟 worker 仍在等待模型时租约被判定过期
pub struct ReapedMidCallGenerator {
    store: OnceLock<Arc<MemoryStore>>,
    policy: BackfillPolicy,
    reaped: AtomicBool,
    inner: Arc<FreshGenerator>,
}

impl ReapedMidCallGenerator {
    pub fn new(per_call: usize) -> Arc<Self> {
        Arc::new(Self {
            store: OnceLock::new(),
            policy: BackfillPolicy::default(),
            reaped: AtomicBool::new(false),
            inner: FreshGenerator::new(per_call),
        })
    }

    pub fn attach(&self, store: Arc<MemoryStore>) {
        let _ = self.store.set(store);
    }
}

#[async_trait]
impl Generator for ReapedMidCallGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &GenerateOptions,
    ) -> anyhow::Result<GeneratedBatch> {
        if !self.reaped.swap(true, Ordering::SeqCst) {
            let store = self.store.get().expect("store not attached");
            let later = chrono::Utc::now() + chrono::Duration::hours(1);
            for job in store.expired_jobs(later).await? {
                store
                    .commit_step(&job.id, step::abandon(&job, 0, &self.policy))
                    .await?;
            }
        }
        self.inner.generate(system_prompt, user_prompt, opts).await
    }
}

/// 读取指定章节题目数量时总是失败的存储，其余操作原样转发
pub struct CountFailingStore {
    inner: Arc<MemoryStore>,
    failing_section: String,
}

impl CountFailingStore {
    pub fn new(inner: Arc<MemoryStore>, failing_section: &str) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_section: failing_section.to_string(),
        })
    }
}

#[async_trait]
impl BackfillStore for CountFailingStore {
    async fn enqueue_backfill(&self, new: NewJob) -> BackfillResult<EnqueueOutcome> {
        self.inner.enqueue_backfill(new).await
    }

    async fn create_job(&self, new: NewJob) -> BackfillResult<BackfillJob> {
        self.inner.create_job(new).await
    }

    async fn get_job(&self, job_id: &str) -> BackfillResult<Option<BackfillJob>> {
        self.inner.get_job(job_id).await
    }

    async fn list_jobs(&self) -> BackfillResult<Vec<BackfillJob>> {
        self.inner.list_jobs().await
    }

    async fn claim_job(&self, job_id: &str, lease: Duration) -> BackfillResult<BackfillJob> {
        self.inner.claim_job(job_id, lease).await
    }

    async fn get_section(
        &self,
        course_id: &str,
        section_id: &str,
    ) -> BackfillResult<Option<Section>> {
        self.inner.get_section(course_id, section_id).await
    }

    async fn upsert_section(&self, section: Section) -> BackfillResult<()> {
        self.inner.upsert_section(section).await
    }

    async fn count_questions(&self, course_id: &str, section_id: &str) -> BackfillResult<u32> {
        if section_id == self.failing_section {
            return Err(BackfillError::Store("connection reset".to_string()));
        }
        self.inner.count_questions(course_id, section_id).await
    }

    async fn sample_stems(
        &self,
        course_id: &str,
        section_id: &str,
        limit: usize,
    ) -> BackfillResult<Vec<String>> {
        self.inner.sample_stems(course_id, section_id, limit).await
    }

    async fn list_questions(
        &self,
        course_id: &str,
        section_id: &str,
    ) -> BackfillResult<Vec<Question>> {
        self.inner.list_questions(course_id, section_id).await
    }

    async fn insert_questions(
        &self,
        course_id: &str,
        section_id: &str,
        questions: Vec<Question>,
    ) -> BackfillResult<usize> {
        self.inner.insert_questions(course_id, section_id, questions).await
    }

    async fn insert_job_questions(
        &self,
        job_id: &str,
        course_id: &str,
        section_id: &str,
        questions: Vec<Question>,
    ) -> BackfillResult<usize> {
        self.inner
            .insert_job_questions(job_id, course_id, section_id, questions)
            .await
    }

    async fn commit_step(
        &self,
        job_id: &str,
        decision: StepDecision,
    ) -> BackfillResult<Option<BackfillJob>> {
        self.inner.commit_step(job_id, decision).await
    }

    async fn expired_jobs(&self, now: DateTime<Utc>) -> BackfillResult<Vec<BackfillJob>> {
        self.inner.expired_jobs(now).await
    }
}

pub fn test_config() -> Config {
    Config {
        max_concurrent_jobs: 4,
        ..Default::default()
    }
}

pub struct Harness {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub flow: BackfillFlow,
    pub triggers: mpsc::UnboundedReceiver<String>,
}

impl Harness {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self::with_config(test_config(), generator)
    }

    pub fn with_config(config: Config, generator: Arc<dyn Generator>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(MemoryStore::with_trigger(tx));
        let flow = BackfillFlow::new(
            &config,
            store.clone(),
            Arc::new(YieldPlanner::new(&config)),
            generator,
        );
        Self {
            config,
            store,
            flow,
            triggers: rx,
        }
    }

    /// 写入带蓝图的章节
    pub async fn add_section(&self) {
        self.store
            .upsert_section(Section::new(COURSE, SECTION, Some(blueprint())))
            .await
            .unwrap();
    }

    /// 直接写入已有题目
    pub async fn add_existing(&self, range: std::ops::Range<usize>) {
        let defaults = QuestionDefaults {
            course_id: COURSE.to_string(),
            section_id: SECTION.to_string(),
            ..Default::default()
        };
        let questions = range
            .map(|n| normalizer::normalize(&raw_question(n), &defaults).unwrap())
            .collect();
        self.store
            .insert_questions(COURSE, SECTION, questions)
            .await
            .unwrap();
    }

    pub async fn enqueue(&self, target: u32) -> BackfillJob {
        let new = NewJob::initial(COURSE, SECTION, target, &self.config.policy);
        match self.store.enqueue_backfill(new).await.unwrap() {
            EnqueueOutcome::Created(job) => job,
            other => panic!("expected a new job, got {:?}", other),
        }
    }

    /// 手动蹦床：一直跟着续跑任务执行，直到任务链结束
    pub async fn run_chain(&self, first_job_id: &str) -> Vec<RunOutcome> {
        let mut outcomes = Vec::new();
        let mut job_id = first_job_id.to_string();
        for _ in 0..100 {
            let outcome = self.flow.run(&job_id).await;
            outcomes.push(outcome.clone());
            match outcome {
                RunOutcome::Continued { next_job_id, .. } => job_id = next_job_id,
                _ => return outcomes,
            }
        }
        panic!("job chain did not terminate");
    }
}
