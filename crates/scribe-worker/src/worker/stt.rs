//! # STT Handler
//!
//! Claims the task (`pending→processing`), chunks the audio, transcribes
//! chunks concurrently under a semaphore, streams in-order cumulative
//! transcript updates, then persists the transcript together with the
//! SUMMARY outbox row in one transaction.
//!
//! Failure aggregation is fail-fast: the first chunk error lands in a
//! single-writer slot and cancels the shared STT context so sibling calls
//! abort promptly. User cancellation takes precedence over captured errors
//! when deciding the terminal state.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scribe_shared::errors::{ProviderError, ScribeResult};
use scribe_shared::messaging::TaskMessage;
use scribe_shared::models::TaskState;

use crate::chunker::{AudioChunker, ChunkSet};
use crate::merge::TranscriptAssembler;

use super::progress::ProgressNotifier;
use super::{fail_task, mark_cancelled, WorkerContext};

enum SttOutcome {
    Transcribed(String),
    Cancelled,
    Failed(String),
}

pub(crate) async fn handle(
    context: &Arc<WorkerContext>,
    message: &TaskMessage,
    token: &CancellationToken,
) -> ScribeResult<()> {
    let task_id = message.task_id;
    let notifier = ProgressNotifier::new(context.bus.clone(), task_id);

    // Claim the task. A refusal means it was cancelled before pickup or this
    // is a redelivery of work already in flight; either way, abandon quietly.
    match context
        .store
        .transition(task_id, TaskState::Pending, TaskState::Processing)
        .await
    {
        Ok(()) => {}
        Err(error) if error.is_state_conflict() => {
            debug!(task_id = %task_id, "stt dispatch refused; task no longer pending");
            return Ok(());
        }
        Err(error) => return Err(error),
    }

    let Some(file_path) = message.file_path.as_deref() else {
        return fail_task(context, &notifier, task_id, "stt message carries no file path").await;
    };

    notifier.processing(10, "processing audio").await;

    let chunker = AudioChunker::new(context.config.chunking.clone());
    let chunk_set = match chunker.chunk(Path::new(file_path)).await {
        Ok(chunk_set) => chunk_set,
        Err(error) => {
            remove_source_file(file_path).await;
            return fail_task(context, &notifier, task_id, &error.to_string()).await;
        }
    };

    notifier
        .processing(30, &format!("transcribing {} chunks", chunk_set.chunks.len()))
        .await;

    let outcome = transcribe_chunks(context, message, token, &chunk_set, &notifier).await;
    drop(chunk_set);

    match outcome {
        SttOutcome::Cancelled => {
            info!(task_id = %task_id, "transcription cancelled");
            remove_source_file(file_path).await;
            mark_cancelled(context, &notifier, task_id).await
        }
        SttOutcome::Failed(error) => {
            remove_source_file(file_path).await;
            fail_task(context, &notifier, task_id, &error).await
        }
        SttOutcome::Transcribed(transcript) => {
            let summary_message = TaskMessage::summary(
                task_id,
                &message.creator_id,
                transcript.clone(),
                message.config.clone(),
            );

            if let Err(error) = context
                .store
                .save_transcript_and_enqueue(task_id, &transcript, &summary_message)
                .await
            {
                remove_source_file(file_path).await;
                return fail_task(
                    context,
                    &notifier,
                    task_id,
                    &format!("persisting transcript failed: {error}"),
                )
                .await;
            }

            info!(
                task_id = %task_id,
                transcript_chars = transcript.len(),
                "transcript saved; summary enqueued"
            );
            notifier.processing(75, "transcript complete").await;
            remove_source_file(file_path).await;
            Ok(())
        }
    }
}

/// Fan the chunks out to the STT provider and stream in-order updates.
async fn transcribe_chunks(
    context: &Arc<WorkerContext>,
    message: &TaskMessage,
    token: &CancellationToken,
    chunk_set: &ChunkSet,
    notifier: &ProgressNotifier,
) -> SttOutcome {
    // Child of the task context: user cancellation propagates down, a chunk
    // failure cancels siblings without touching the task token.
    let stt_token = token.child_token();
    let semaphore = Arc::new(Semaphore::new(context.config.worker.stt_concurrency));
    let first_error: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
    let chunk_timeout = context.config.worker.chunk_timeout();

    let mut assembler = TranscriptAssembler::new(chunk_set.chunks.len());
    let mut join_set: JoinSet<(usize, Option<String>)> = JoinSet::new();

    for chunk in &chunk_set.chunks {
        let stt = context.stt.clone();
        let options = message.config.clone();
        let path = chunk.path.clone();
        let index = chunk.index;
        let stt_token = stt_token.clone();
        let semaphore = semaphore.clone();
        let first_error = first_error.clone();

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, None),
            };
            if stt_token.is_cancelled() {
                return (index, None);
            }

            let result = tokio::select! {
                _ = stt_token.cancelled() => return (index, None),
                result = tokio::time::timeout(
                    chunk_timeout,
                    stt.transcribe(&stt_token, &path, &options),
                ) => result,
            };

            match result {
                Ok(Ok(text)) => (index, Some(text)),
                Ok(Err(error)) => {
                    let _ = first_error.set(error.to_string());
                    stt_token.cancel();
                    (index, None)
                }
                Err(_elapsed) => {
                    let _ = first_error.set(ProviderError::Timeout(chunk_timeout).to_string());
                    stt_token.cancel();
                    (index, None)
                }
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, Some(text))) => {
                // Emit only when the next-in-order chunk completed; the
                // assembler releases buffered successors in the same step.
                if let Some(cumulative) = assembler.complete(index, text) {
                    notifier.transcript_update(cumulative).await;
                }
            }
            Ok((_, None)) => {}
            Err(join_error) => {
                let _ = first_error.set(format!("stt task panicked: {join_error}"));
                stt_token.cancel();
            }
        }
    }

    if token.is_cancelled() {
        return SttOutcome::Cancelled;
    }
    if let Some(error) = first_error.get() {
        return SttOutcome::Failed(error.clone());
    }

    SttOutcome::Transcribed(assembler.into_transcript())
}

/// Delete the uploaded source file once the task reached a terminal
/// disposition for this stage.
async fn remove_source_file(path: &str) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        warn!(path = %path, error = %error, "failed to remove uploaded source file");
    }
}
