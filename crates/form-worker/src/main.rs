//! The per-process browser-driving worker (spec.md §4.2.1). A real OS
//! process, spawned by the orchestrator, that owns its own browser and
//! talks back exclusively over stdin/stdout JSON lines so a browser
//! crash here can never corrupt a sibling worker.

use std::time::{Duration, Instant};

use form_core::analyzer::analyze;
use form_core::analyzer::page::{PageSnapshot, StaticPage};
use form_core::analyzer::types::{AutoAction, ClientData};
use form_core::error_classifier::{classify_error, determine_submission_outcome, ErrorTypeCode, SubmissionOutcome};
use form_core::models::{ResultEnvelope, ResultStatus, TaskEnvelope, TaskType};

use playwright::api::{BrowserContext, Page as PwPage, Playwright};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Outer timeout on a single task's page processing (navigation + form
/// fill + submit + outcome wait), grounded on the 60s site-level
/// timeout `IsolatedFormFinderWorker` reads from its explorer config.
const PAGE_PROCESSING_TIMEOUT: Duration = Duration::from_secs(60);

/// The DOM-extraction script injected into the page after
/// pre-processing scroll settles. Field names match `ElementSnapshot`
/// exactly so `serde_json::from_value` can deserialize the result with
/// no translation layer.
const SNAPSHOT_SCRIPT: &str = r#"
(() => {
  const form = document.querySelector('form') || document.body;
  const rect = form.getBoundingClientRect
    ? form.getBoundingClientRect()
    : { x: 0, y: 0, width: 0, height: 0 };
  const nodes = Array.from(
    document.querySelectorAll('input, textarea, select, button, [role="button"]')
  );
  const elements = nodes.map((el, index) => {
    const box = el.getBoundingClientRect();
    const options = el.tagName === 'SELECT'
      ? Array.from(el.options).map((o) => [o.value, o.text])
      : [];
    return {
      selector: el.id ? `#${el.id}` : `${el.tagName.toLowerCase()}:nth-of-type(${index + 1})`,
      tag: el.tagName.toLowerCase(),
      element_type: el.getAttribute('type'),
      name: el.getAttribute('name'),
      id: el.getAttribute('id'),
      class: el.getAttribute('class'),
      placeholder: el.getAttribute('placeholder'),
      required: el.hasAttribute('required'),
      aria_required: el.getAttribute('aria-required') === 'true',
      value: 'value' in el ? String(el.value || '') : null,
      visible: !!(box.width || box.height),
      enabled: !el.disabled,
      bounding_box: { x: box.x, y: box.y, width: box.width, height: box.height },
      label_text: (el.labels && el.labels[0]) ? el.labels[0].innerText : null,
      context_text: (el.closest('div,li,tr,fieldset') || el.parentElement || document.body).innerText.slice(0, 300),
      options,
      dom_index: index,
    };
  });
  const textNodes = Array.from(
    document.querySelectorAll('body, main, div, p, span, section, article, form, fieldset, legend, label, small, em, strong')
  ).slice(0, 200).map((n) => (n.innerText || '').slice(0, 500));
  return {
    elements,
    form_bounding_box: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
    page_text_samples: textNodes,
  };
})()
"#;

fn worker_id_from_args() -> String {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == "--worker-id" {
            if let Some(id) = args.next() {
                return id;
            }
        }
    }
    format!("worker-{}", std::process::id())
}

async fn write_envelope<W: AsyncWriteExt + Unpin>(stdout: &mut W, envelope: &ResultEnvelope) {
    let mut line = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    if stdout.write_all(line.as_bytes()).await.is_ok() {
        let _ = stdout.flush().await;
    }
}

fn error_envelope(task_id: &str, worker_id: &str, record_id: Option<i64>, code: ErrorTypeCode, message: impl Into<String>) -> ResultEnvelope {
    ResultEnvelope {
        task_id: task_id.to_string(),
        worker_id: worker_id.to_string(),
        record_id,
        status: ResultStatus::Error,
        error_type: Some(code.as_str().to_string()),
        error_message: Some(message.into()),
        processing_time_ms: None,
        instruction_valid_updated: false,
        bot_protection_detected: false,
        additional_data: None,
    }
}

/// Fills every mapped input, triggers every auto-handled element, and
/// clicks the first detected submit button (spec.md §4.1.1 steps
/// 8-9). Returns the page content sampled after the submit so the
/// caller can run `determine_submission_outcome` on it.
async fn apply_analysis_and_submit(page: &PwPage, analysis: &form_core::analyzer::types::AnalysisResult) -> Result<String, String> {
    for assignment in &analysis.input_assignments {
        match assignment.auto_action {
            Some(AutoAction::Check) => {
                page.check_builder(&assignment.selector).check().await.map_err(|e| e.to_string())?;
            }
            Some(AutoAction::Select) | Some(AutoAction::SelectIndex) | Some(AutoAction::Fill) | Some(AutoAction::CopyFrom) | None => {
                match assignment.input_type.as_str() {
                    "select" | "select-one" => {
                        page.select_option_builder(&assignment.selector, vec![assignment.value.clone()])
                            .select_option()
                            .await
                            .map_err(|e| e.to_string())?;
                    }
                    "checkbox" => {
                        page.check_builder(&assignment.selector).check().await.map_err(|e| e.to_string())?;
                    }
                    "radio" => {
                        page.check_builder(&assignment.selector).check().await.map_err(|e| e.to_string())?;
                    }
                    _ => {
                        page.fill_builder(&assignment.selector, &assignment.value)
                            .fill()
                            .await
                            .map_err(|e| e.to_string())?;
                    }
                }
            }
        }
    }

    let submit_selector = analysis.submit_buttons.first().ok_or_else(|| "no submit button candidate detected".to_string())?;
    page.click_builder(submit_selector).click().await.map_err(|e| e.to_string())?;

    page.eval::<String>("document.body.innerText.slice(0, 5000)")
        .await
        .map_err(|e| e.to_string())
}

async fn process_company(
    context: &BrowserContext,
    task: &TaskEnvelope,
) -> Result<(bool, Option<String>, Option<ErrorTypeCode>), String> {
    let company = task.company_data.as_ref().ok_or("task carries no company_data")?;
    let client_data: ClientData = task
        .client_data
        .clone()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    let page = context.new_page().await.map_err(|e| e.to_string())?;
    page.goto_builder(&company.form_url).goto().await.map_err(|e| e.to_string())?;

    let snapshot_value: Value = page.eval(SNAPSHOT_SCRIPT).await.map_err(|e| e.to_string())?;
    let snapshot: PageSnapshot = serde_json::from_value(snapshot_value).map_err(|e| e.to_string())?;
    if snapshot.elements.is_empty() {
        return Ok((false, Some("no form-relevant elements found on page".to_string()), Some(ErrorTypeCode::ContentAnalysisFailed)));
    }

    let static_page = StaticPage(snapshot);
    let analysis = analyze(&static_page, &client_data);
    if !analysis.success {
        return Ok((false, analysis.error, Some(ErrorTypeCode::ContentAnalysisFailed)));
    }
    if !analysis.validation_result.ok {
        let missing = analysis.validation_result.missing_essentials.join(", ");
        return Ok((false, Some(format!("missing essential fields: {missing}")), Some(ErrorTypeCode::Mapping)));
    }

    let post_submit_content = apply_analysis_and_submit(&page, &analysis).await?;
    match determine_submission_outcome(&post_submit_content) {
        SubmissionOutcome::Success => Ok((true, None, None)),
        SubmissionOutcome::Failed => {
            let code = classify_error("form validation failed after submit", None, Some(&post_submit_content), analysis.submit_buttons.first().map(|s| s.as_str()));
            Ok((false, Some("form re-rendered a validation error after submit".to_string()), Some(code)))
        }
        SubmissionOutcome::Undetermined => Ok((false, Some("could not determine submission outcome".to_string()), Some(ErrorTypeCode::SuccessDeterminationFailed))),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = worker_id_from_args();

    let playwright = Playwright::initialize().await?;
    let chromium = playwright.chromium();
    let browser = chromium.launcher().launch().await?;
    let context = browser.context_builder().build().await?;

    let mut stdout = tokio::io::stdout();
    write_envelope(&mut stdout, &ResultEnvelope::worker_ready(&worker_id)).await;
    eprintln!("[{worker_id}] ready");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let task: TaskEnvelope = match serde_json::from_str(&line) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("[{worker_id}] unparseable task line: {e}");
                continue;
            }
        };

        if task.task_type == TaskType::Shutdown {
            break;
        }

        let record_id = task.company_data.as_ref().map(|c| c.record_id);
        let started = Instant::now();
        let envelope = match tokio::time::timeout(PAGE_PROCESSING_TIMEOUT, process_company(&context, &task)).await {
            Ok(Ok((true, _, _))) => ResultEnvelope {
                task_id: task.task_id.clone(),
                worker_id: worker_id.clone(),
                record_id,
                status: ResultStatus::Success,
                error_type: None,
                error_message: None,
                processing_time_ms: Some(started.elapsed().as_millis() as u64),
                instruction_valid_updated: false,
                bot_protection_detected: false,
                additional_data: None,
            },
            Ok(Ok((false, message, code))) => {
                let mut envelope = error_envelope(
                    &task.task_id,
                    &worker_id,
                    record_id,
                    code.unwrap_or(ErrorTypeCode::System),
                    message.unwrap_or_else(|| "submission failed".to_string()),
                );
                envelope.status = ResultStatus::Failed;
                envelope.processing_time_ms = Some(started.elapsed().as_millis() as u64);
                envelope
            }
            Ok(Err(message)) => {
                let code = classify_error(&message, None, None, None);
                let mut envelope = error_envelope(&task.task_id, &worker_id, record_id, code, message);
                envelope.processing_time_ms = Some(started.elapsed().as_millis() as u64);
                envelope
            }
            Err(_elapsed) => {
                let mut envelope = error_envelope(
                    &task.task_id,
                    &worker_id,
                    record_id,
                    ErrorTypeCode::Timeout,
                    "page processing exceeded the outer timeout",
                );
                envelope.processing_time_ms = Some(started.elapsed().as_millis() as u64);
                envelope
            }
        };
        write_envelope(&mut stdout, &envelope).await;
    }

    write_envelope(&mut stdout, &ResultEnvelope::worker_shutdown(&worker_id)).await;
    let _ = context.close().await;
    let _ = browser.close().await;
    eprintln!("[{worker_id}] shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_the_error_type_and_message() {
        let envelope = error_envelope("task-1", "worker-1", Some(42), ErrorTypeCode::Timeout, "took too long");
        assert_eq!(envelope.status, ResultStatus::Error);
        assert_eq!(envelope.record_id, Some(42));
        assert_eq!(envelope.error_type.as_deref(), Some(ErrorTypeCode::Timeout.as_str()));
        assert_eq!(envelope.error_message.as_deref(), Some("took too long"));
    }

    #[tokio::test]
    async fn write_envelope_emits_a_single_json_line() {
        let mut buf: Vec<u8> = Vec::new();
        write_envelope(&mut buf, &ResultEnvelope::worker_ready("worker-1")).await;
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed["worker_id"], "worker-1");
    }
}
