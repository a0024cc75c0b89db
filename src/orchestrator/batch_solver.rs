//! 批量解题编排
//!
//! 把分题结果按固定大小切成批次，每批调用一次生成模型：
//! - 批次之间严格串行，批内不重试
//! - 单批失败（调用失败或输出无法解析）只记录日志，继续下一批
//! - 所有批次都没有结果时才返回 `NoResults`
//!
//! 覆盖率和缺失题号只作为诊断日志输出，不影响结果。

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::models::{AnswerKey, LogLevel, QuestionBlock, SolvedQuestion, Stage};
use crate::services::gateway::TextGenerator;
use crate::services::normalizer::normalize_items;
use crate::services::progress::{scale_progress, ProgressSink};
use crate::services::segmenter::{extract_batch_text, format_blocks_for_solver, SegmentedDocument};
use crate::services::json_repair::parse_json_array;

const SOLVER_PROMPT_TEMPLATE: &str = r#"
You are an expert MCQ solver.

Extract EVERY MCQ question from the document text EXACTLY as it appears (question number, wording, options).

{expected_clause}

STRICT RULES:
1. Return ONLY a valid JSON array. No headings, markdown, narration, or explanations outside JSON.
2. Include EVERY question. If the document has 35 MCQs, the array must contain 35 objects.
3. Each object must include question number, section (if available), question text, options array, the correct option label, the correct option text, and a short 2-3 sentence explanation.
4. The options array must contain objects with "label" and "text".
5. For the answer, provide both "correct_option" (label such as 1/2/3/4/5 or A/B/C/D) AND "answer_text" (the exact option text).
6. If sections/headings exist (e.g., "Numerical Ability"), include a "section" field; otherwise set it to null.
7. If a question number is missing in the PDF, assign a sequential string number yourself ("31", "32", ...).

OUTPUT FORMAT (MANDATORY):
[
  {
    "question_number": "31",
    "section": "NUMERICAL ABILITY",
    "question_text": "...",
    "options": [
      {"label": "1", "text": "..."},
      {"label": "2", "text": "..."},
      {"label": "3", "text": "..."},
      {"label": "4", "text": "..."},
      {"label": "5", "text": "..."}
    ],
    "correct_option": "3",
    "answer_text": "13:14",
    "explanation": "2 concise sentences explaining the reasoning."
  }
]

Document Text:
{document_text}

Return ONLY raw JSON. Do not add markdown fences.
"#;

/// 构建严格 JSON 格式的解题提示词
pub fn build_solver_prompt(document_text: &str, expected_count: Option<usize>) -> String {
    let expected_clause = match expected_count {
        Some(n) if n > 0 => format!(
            "There are exactly {n} MCQ questions in this document. The JSON array MUST contain {n} objects."
        ),
        _ => "Cover EVERY MCQ question that appears in the document. Do not skip any.".to_string(),
    };
    SOLVER_PROMPT_TEMPLATE
        .replace("{expected_clause}", &expected_clause)
        .replace("{document_text}", document_text.trim())
}

/// 批量解题器
pub struct BatchSolver {
    gateway: Arc<dyn TextGenerator>,
    batch_size: usize,
    char_limit: usize,
}

/// 单批次的输入
struct BatchInput<'a> {
    number: usize,
    text: String,
    expected_numbers: Vec<String>,
    answer_key: &'a AnswerKey,
}

impl BatchSolver {
    pub fn new(gateway: Arc<dyn TextGenerator>, batch_size: usize, char_limit: usize) -> Self {
        Self {
            gateway,
            batch_size: batch_size.max(1),
            char_limit,
        }
    }

    /// 解出全部题目，按批次顺序拼接结果
    pub async fn solve(
        &self,
        doc: &SegmentedDocument,
        progress: &dyn ProgressSink,
        span: (u8, u8),
    ) -> Result<Vec<SolvedQuestion>, PipelineError> {
        let mut all_results = Vec::new();

        if doc.blocks.is_empty() {
            progress.log(
                "⚠️ No question blocks found, sending entire text as single batch",
                LogLevel::Warning,
            );
            let input = BatchInput {
                number: 1,
                text: doc.questions_text.clone(),
                expected_numbers: Vec::new(),
                answer_key: &doc.answer_key,
            };
            match self.solve_batch(input, progress).await {
                Ok(results) => all_results = results,
                Err(e) => {
                    error!("单批次解题失败: {}", e);
                    progress.log(&format!("❌ Single batch failed: {}", e), LogLevel::Error);
                }
            }
            progress.report(span.1, "Solving finished", Stage::Solving);
        } else {
            all_results = self.solve_batches(doc, progress, span).await;
        }

        if all_results.is_empty() {
            return Err(PipelineError::NoResults);
        }

        progress.log(
            &format!(
                "✅ All batches completed: {} total questions solved",
                all_results.len()
            ),
            LogLevel::Success,
        );
        Ok(all_results)
    }

    async fn solve_batches(
        &self,
        doc: &SegmentedDocument,
        progress: &dyn ProgressSink,
        span: (u8, u8),
    ) -> Vec<SolvedQuestion> {
        let total_questions = doc.blocks.len();
        let batches: Vec<&[QuestionBlock]> = doc.blocks.chunks(self.batch_size).collect();
        let num_batches = batches.len();
        let mut all_results = Vec::new();

        progress.log(
            &format!(
                "🔄 Processing {} questions in {} batches (batch size: {})",
                total_questions, num_batches, self.batch_size
            ),
            LogLevel::Info,
        );

        for (idx, batch) in batches.into_iter().enumerate() {
            let number = idx + 1;
            let expected_numbers: Vec<String> =
                batch.iter().map(|b| b.question_number.clone()).collect();
            let first = expected_numbers.first().cloned().unwrap_or_default();
            let last = expected_numbers.last().cloned().unwrap_or_default();

            progress.report(
                scale_progress(span.0, span.1, idx, num_batches),
                &format!(
                    "Solving batch {}/{} (questions {}-{})",
                    number, num_batches, first, last
                ),
                Stage::Solving,
            );

            let mut text = extract_batch_text(&doc.questions_text, batch);
            if text.trim().is_empty() {
                text = format_blocks_for_solver(batch);
            }
            progress.log(
                &format!(
                    "📤 Sending batch {} to model: {} characters",
                    number,
                    text.chars().count()
                ),
                LogLevel::Info,
            );

            let input = BatchInput {
                number,
                text,
                expected_numbers,
                answer_key: &doc.answer_key,
            };
            match self.solve_batch(input, progress).await {
                Ok(results) if results.is_empty() => {
                    progress.log(
                        &format!("⚠️ Batch {} returned no results", number),
                        LogLevel::Warning,
                    );
                }
                Ok(results) => {
                    progress.log(
                        &format!(
                            "✅ Batch {} completed: {} questions solved",
                            number,
                            results.len()
                        ),
                        LogLevel::Success,
                    );
                    all_results.extend(results);
                }
                Err(e) => {
                    error!("批次 {} 失败: {}", number, e);
                    progress.log(&format!("❌ Batch {} failed: {}", number, e), LogLevel::Error);
                }
            }
        }

        progress.report(
            span.1,
            &format!("Solved {} of {} questions", all_results.len(), total_questions),
            Stage::Solving,
        );
        all_results
    }

    async fn solve_batch(
        &self,
        input: BatchInput<'_>,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<SolvedQuestion>, PipelineError> {
        if input.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let truncated: String = input.text.chars().take(self.char_limit).collect();
        let expected_count = (!input.expected_numbers.is_empty()).then_some(input.expected_numbers.len());
        let prompt = build_solver_prompt(&truncated, expected_count);
        progress.debug(&format!("batch_{}_prompt", input.number), json!(prompt));

        let raw = self.gateway.generate(&prompt).await?;
        let raw = raw.trim();
        progress.debug(&format!("batch_{}_response", input.number), json!(raw));
        progress.log(
            &format!("📥 Received response ({} characters)", raw.chars().count()),
            LogLevel::Info,
        );

        let parsed = parse_json_array(raw).map_err(|e| {
            warn!("批次 {} 输出无法解析: {}", input.number, e);
            e
        })?;
        progress.debug(
            &format!("batch_{}_parsed_count", input.number),
            json!(parsed.len()),
        );

        let normalized = normalize_items(&parsed, input.answer_key, self.gateway.as_ref()).await;

        if let Some(expected) = expected_count {
            let coverage = normalized.len() as f64 / expected as f64 * 100.0;
            progress.log(
                &format!(
                    "📊 Coverage: {}/{} questions ({:.1}%)",
                    normalized.len(),
                    expected,
                    coverage
                ),
                LogLevel::Info,
            );

            let solved: HashSet<&str> = normalized
                .iter()
                .map(|item| item.question_number.trim())
                .collect();
            let missing: Vec<&str> = input
                .expected_numbers
                .iter()
                .map(|n| n.trim())
                .filter(|n| !solved.contains(n))
                .collect();
            if !missing.is_empty() {
                info!("批次 {} 缺少题号: {:?}", input.number, missing);
                progress.log(
                    &format!("ℹ️ Missing question numbers: {}", missing.join(", ")),
                    LogLevel::Info,
                );
            }
        }

        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::models::{JobStatus, JobType};
    use crate::services::job_store::{JobStore, JobUpdate};
    use crate::services::progress::{JobReporter, NoopProgress};
    use crate::services::segmenter::segment_document;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<VecDeque<Result<String, GatewayError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Permanent("script exhausted".into())))
        }
    }

    fn paper(numbers: std::ops::Range<u32>) -> String {
        numbers
            .map(|n| format!("{n}. Question number {n} asks something long enough\n1) alpha\n2) beta\n"))
            .collect()
    }

    fn answers(numbers: std::ops::Range<u32>) -> String {
        let items: Vec<String> = numbers
            .map(|n| {
                format!(
                    r#"{{"question_number": "{n}", "question_text": "Q{n}", "options": [{{"label": "1", "text": "alpha"}}, {{"label": "2", "text": "beta"}}], "correct_option": "1", "answer_text": "alpha", "explanation": "Because."}}"#
                )
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    #[test]
    fn test_prompt_expected_clause() {
        let prompt = build_solver_prompt("  text  ", Some(10));
        assert!(prompt.contains("There are exactly 10 MCQ questions"));
        assert!(prompt.contains("Document Text:\ntext\n"));
        let open = build_solver_prompt("text", None);
        assert!(open.contains("Cover EVERY MCQ question"));
    }

    #[tokio::test]
    async fn test_middle_batch_failure_keeps_other_batches_in_order() {
        let doc = segment_document(&paper(10..35));
        assert_eq!(doc.blocks.len(), 25);

        let gateway = Scripted::new(vec![
            Ok(answers(10..20)),
            Err(GatewayError::Exhausted { attempts: 3 }),
            Ok(answers(30..35)),
        ]);
        let solver = BatchSolver::new(gateway.clone(), 10, 50_000);
        let results = solver.solve(&doc, &NoopProgress, (10, 45)).await.unwrap();

        let numbers: Vec<u32> = results
            .iter()
            .map(|r| r.question_number.parse().unwrap())
            .collect();
        let expected: Vec<u32> = (10..20).chain(30..35).collect();
        assert_eq!(numbers, expected);
        assert_eq!(gateway.prompts.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_batch_is_batch_local() {
        let doc = segment_document(&paper(10..30));
        let gateway = Scripted::new(vec![Ok("Sorry, I can't.".into()), Ok(answers(20..30))]);
        let solver = BatchSolver::new(gateway, 10, 50_000);
        let results = solver.solve(&doc, &NoopProgress, (10, 45)).await.unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].question_number, "20");
    }

    #[tokio::test]
    async fn test_unparseable_batch_logs_response_preview() {
        let store = JobStore::new();
        let id = store.create(JobType::SolutionGeneration, json!({}));
        store.update(&id, JobUpdate::new().status(JobStatus::Processing).without_log());
        let reporter = JobReporter::new(store.clone(), id.clone());

        let doc = segment_document(&paper(10..30));
        let gateway = Scripted::new(vec![
            Ok("REFUSAL_TEXT the model declined to answer".into()),
            Ok(answers(20..30)),
        ]);
        let solver = BatchSolver::new(gateway, 10, 50_000);
        solver.solve(&doc, &reporter, (10, 45)).await.unwrap();

        let job = store.get(&id).unwrap();
        let failure = job
            .logs
            .iter()
            .find(|l| l.message.starts_with("❌ Batch 1 failed:"))
            .unwrap();
        assert_eq!(failure.level, LogLevel::Error);
        assert!(failure.message.contains("REFUSAL_TEXT the model declined to answer"));
        assert_eq!(
            job.debug_data["batch_1_response"],
            json!("REFUSAL_TEXT the model declined to answer")
        );
    }

    #[tokio::test]
    async fn test_all_batches_failing_is_no_results() {
        let doc = segment_document(&paper(10..30));
        let gateway = Scripted::new(vec![
            Err(GatewayError::Permanent("down".into())),
            Err(GatewayError::Permanent("down".into())),
        ]);
        let solver = BatchSolver::new(gateway, 10, 50_000);
        let err = solver.solve(&doc, &NoopProgress, (10, 45)).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoResults));
        assert_eq!(err.to_string(), "JSON solver returned no results from any batch");
    }

    #[tokio::test]
    async fn test_no_blocks_sends_whole_text() {
        let doc = segment_document("Unnumbered question about fractions?\n(a) 1 (b) 2");
        assert!(doc.blocks.is_empty());
        let gateway = Scripted::new(vec![Ok(answers(1..2))]);
        let solver = BatchSolver::new(gateway.clone(), 10, 50_000);
        let results = solver.solve(&doc, &NoopProgress, (10, 45)).await.unwrap();
        assert_eq!(results.len(), 1);
        let prompts = gateway.prompts.lock().unwrap();
        assert!(prompts[0].contains("Unnumbered question about fractions?"));
        assert!(prompts[0].contains("Cover EVERY MCQ question"));
    }

    #[tokio::test]
    async fn test_debug_data_and_logs_are_recorded() {
        let store = JobStore::new();
        let id = store.create(JobType::SolutionGeneration, json!({}));
        store.update(&id, JobUpdate::new().status(JobStatus::Processing).without_log());
        let reporter = JobReporter::new(store.clone(), id.clone());

        let doc = segment_document(&paper(10..13));
        let gateway = Scripted::new(vec![Ok(answers(10..12))]);
        let solver = BatchSolver::new(gateway, 10, 50_000);
        solver.solve(&doc, &reporter, (10, 45)).await.unwrap();

        let job = store.get(&id).unwrap();
        assert!(job.debug_data.contains_key("batch_1_prompt"));
        assert!(job.debug_data.contains_key("batch_1_response"));
        assert_eq!(job.debug_data["batch_1_parsed_count"], json!(2));
        assert!(job
            .logs
            .iter()
            .any(|l| l.message == "ℹ️ Missing question numbers: 12"));
        assert!(job.logs.iter().any(|l| l.message.starts_with("📊 Coverage: 2/3")));
        assert_eq!(job.progress, 45);
    }
}
