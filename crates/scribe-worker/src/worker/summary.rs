//! # SUMMARY Handler
//!
//! Streams the LLM summary: each delta is appended to the accumulator,
//! emitted as a `summary_chunk` event, and mirrored into the summary replay
//! buffer. On stream completion the final summary and the
//! `processing→completed` transition commit together; a conflict there means
//! another actor (cancel, reaper) won and the handler abandons quietly.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use scribe_shared::errors::ScribeResult;
use scribe_shared::messaging::TaskMessage;

use super::progress::ProgressNotifier;
use super::{fail_task, mark_cancelled, WorkerContext};

pub(crate) async fn handle(
    context: &Arc<WorkerContext>,
    message: &TaskMessage,
    token: &CancellationToken,
) -> ScribeResult<()> {
    let task_id = message.task_id;
    let notifier = ProgressNotifier::new(context.bus.clone(), task_id);

    // The transcript normally rides in the message; redeliveries that lost
    // it fall back to the stored result.
    let transcript = match message.transcript.as_deref().filter(|t| !t.is_empty()) {
        Some(transcript) => transcript.to_string(),
        None => match context.store.get_result(task_id).await? {
            Some(result) if !result.transcript.is_empty() => result.transcript,
            _ => {
                return fail_task(
                    context,
                    &notifier,
                    task_id,
                    "summary message carries no transcript",
                )
                .await;
            }
        },
    };

    notifier.processing(80, "summarizing").await;

    let accumulated = Arc::new(tokio::sync::Mutex::new(String::new()));
    let stream_result = context
        .llm
        .summarize_stream(
            token,
            &transcript,
            message.config.summary_prompt.as_deref(),
            {
                let accumulated = accumulated.clone();
                let notifier = notifier.clone();
                move |delta: String| {
                    let accumulated = accumulated.clone();
                    let notifier = notifier.clone();
                    async move {
                        let full = {
                            let mut guard = accumulated.lock().await;
                            guard.push_str(&delta);
                            guard.clone()
                        };
                        notifier.summary_chunk(&delta, &full).await;
                    }
                }
            },
        )
        .await;

    match stream_result {
        Ok(summary) => {
            match context.store.complete_with_summary(task_id, &summary).await {
                Ok(()) => {
                    info!(task_id = %task_id, summary_chars = summary.len(), "task completed");
                    notifier.completed().await;
                    Ok(())
                }
                Err(error) if error.is_state_conflict() => {
                    debug!(task_id = %task_id, "completion refused; another actor moved the task");
                    Ok(())
                }
                Err(error) => Err(error),
            }
        }
        Err(error) => {
            if token.is_cancelled() {
                info!(task_id = %task_id, "summarization cancelled");
                mark_cancelled(context, &notifier, task_id).await
            } else {
                fail_task(context, &notifier, task_id, &error.to_string()).await
            }
        }
    }
}
