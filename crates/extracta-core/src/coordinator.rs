//! The batch coordinator: owns the authoritative table of documents, drives a
//! single submission through completion or timeout, and republishes document
//! state to observers.
//!
//! One run at a time per coordinator. One logical task reads the transport,
//! decodes frames and applies them to the table in strict arrival order; the
//! next chunk and the run deadline are raced with `select!`, and whichever
//! resolves first drives the terminal transition. Observers receive
//! whole-record document snapshots over an unbounded channel, so they never
//! see a torn record.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use extracta_dataset::{Dataset, matcher};
use extracta_protocol::{BatchResultEvent, ErrorEvent, EventStreamDecoder, Frame};

use crate::{
    Config, CoordinatorError, Document, DocumentId, DocumentStatus, ExtractionOutput, Schema,
    schema_json,
};

/// State machine of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Submitting,
    Streaming,
    Finished,
    TimedOut,
}

impl RunPhase {
    /// Whether a new submission may start from this phase.
    pub fn accepts_submit(&self) -> bool {
        !matches!(self, Self::Submitting | Self::Streaming)
    }
}

/// Events flowing from the coordinator to its presentation consumer.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A document changed; carries a full snapshot of its new state.
    DocumentUpdated { document: Document },
    /// The run moved to a new phase.
    PhaseChanged { phase: RunPhase },
    /// The service reported the run complete, with its summary payload.
    RunComplete { summary: serde_json::Value },
}

/// Whether the current run ended while applying a frame.
#[derive(Debug, PartialEq, Eq)]
enum RunControl {
    Continue,
    Ended,
}

pub struct BatchCoordinator {
    config: Config,
    client: reqwest::Client,
    documents: Vec<Document>,
    phase: RunPhase,
    next_id: u64,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    cancel: CancellationToken,
}

impl BatchCoordinator {
    /// Create a coordinator and the receiving end of its event channel.
    pub fn new(config: Config) -> (Self, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            config,
            client: reqwest::Client::new(),
            documents: Vec::new(),
            phase: RunPhase::Idle,
            next_id: 0,
            events,
            cancel: CancellationToken::new(),
        };
        (coordinator, rx)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Token that aborts an in-flight run when cancelled (e.g. on Ctrl+C).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register an uploaded file as a new Pending document.
    pub fn add_document(&mut self, file_name: impl Into<String>, contents: Vec<u8>) -> DocumentId {
        let id = DocumentId(self.next_id);
        self.next_id += 1;
        let document = Document {
            id,
            file_name: file_name.into(),
            contents: Arc::from(contents.into_boxed_slice()),
            label: String::new(),
            schema: Schema::new(),
            status: DocumentStatus::Pending,
            result: None,
            error: None,
        };
        self.emit(CoordinatorEvent::DocumentUpdated {
            document: document.clone(),
        });
        self.documents.push(document);
        id
    }

    /// Remove a document at the user's request. Returns false if the id is
    /// unknown.
    pub fn remove_document(&mut self, id: DocumentId) -> bool {
        let before = self.documents.len();
        self.documents.retain(|d| d.id != id);
        self.documents.len() != before
    }

    /// Manually configure a document's label and schema. Only Pending
    /// documents accept edits; returns false otherwise.
    pub fn configure_document(&mut self, id: DocumentId, label: String, schema: Schema) -> bool {
        let Some(doc) = self.documents.iter_mut().find(|d| d.id == id) else {
            return false;
        };
        if doc.status != DocumentStatus::Pending {
            return false;
        }
        doc.label = label;
        doc.schema = schema;
        let snapshot = doc.clone();
        self.emit(CoordinatorEvent::DocumentUpdated { document: snapshot });
        true
    }

    /// Pre-fill configuration from a dataset without clobbering manual edits.
    ///
    /// A document is only overwritten when a dataset entry matches its file
    /// name AND its current label or schema is empty, which makes this safe
    /// to re-invoke whenever the dataset changes. Returns how many documents
    /// were configured.
    pub fn auto_configure(&mut self, dataset: &Dataset) -> usize {
        let mut configured = 0;
        let mut snapshots = Vec::new();
        for doc in &mut self.documents {
            if doc.status != DocumentStatus::Pending {
                continue;
            }
            let Some(entry) = matcher::find_match(dataset, &doc.file_name) else {
                continue;
            };
            if !doc.label.is_empty() && !doc.schema.is_empty() {
                continue;
            }
            doc.label = entry.label.clone();
            doc.schema = entry.schema.clone();
            configured += 1;
            snapshots.push(doc.clone());
        }
        for document in snapshots {
            self.emit(CoordinatorEvent::DocumentUpdated { document });
        }
        configured
    }

    /// Submit every configured Pending document as one batch and drive the
    /// run until completion, timeout or cancellation.
    ///
    /// Returns the terminal phase of the run. A pre-stream transport failure
    /// marks every targeted document Error with the same diagnostic and
    /// propagates the error.
    pub async fn submit(&mut self) -> Result<RunPhase, CoordinatorError> {
        let batch = self.begin_run()?;

        let mut form = reqwest::multipart::Form::new();
        for id in &batch {
            // begin_run only returns ids present in the table
            let Some(doc) = self.documents.iter().find(|d| d.id == *id) else {
                continue;
            };
            let part = reqwest::multipart::Part::bytes(doc.contents.to_vec())
                .file_name(doc.file_name.clone())
                .mime_str("application/pdf")?;
            form = form
                .part("files", part)
                .text("labels", doc.label.clone())
                .text("schemas", schema_json(&doc.schema));
        }

        let url = format!("{}/extract-batch", self.config.base_url);
        let response = match self.client.post(&url).multipart(form).send().await {
            Ok(response) => response,
            Err(err) => {
                self.abort_run(&batch, &format!("request error: {err}"));
                return Err(err.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(100).collect();
            self.abort_run(
                &batch,
                &format!("extraction service returned {status}: {detail}"),
            );
            return Err(CoordinatorError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        self.set_phase(RunPhase::Streaming);
        let stream = response.bytes_stream();
        self.consume_stream(&batch, stream).await;
        Ok(self.phase)
    }

    /// Guard and start a run: compute the batch in document order and mark
    /// every targeted document Processing.
    fn begin_run(&mut self) -> Result<Vec<DocumentId>, CoordinatorError> {
        if !self.phase.accepts_submit() {
            return Err(CoordinatorError::RunInProgress);
        }
        let batch: Vec<DocumentId> = self
            .documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Pending && d.is_configured())
            .map(|d| d.id)
            .collect();
        if batch.is_empty() {
            return Err(CoordinatorError::EmptyBatch);
        }

        self.set_phase(RunPhase::Submitting);
        for id in &batch {
            if let Some(doc) = self.documents.iter_mut().find(|d| d.id == *id) {
                doc.status = DocumentStatus::Processing;
                let snapshot = doc.clone();
                self.emit(CoordinatorEvent::DocumentUpdated { document: snapshot });
            }
        }
        Ok(batch)
    }

    /// Consume decoded frames from the response stream, racing the run
    /// deadline and the cancellation token.
    ///
    /// The stream handle lives entirely inside this call, so the transport
    /// read is released on every exit path.
    async fn consume_stream<S, B, E>(&mut self, batch: &[DocumentId], stream: S)
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        tokio::pin!(stream);
        let mut decoder = EventStreamDecoder::new();
        let deadline =
            tokio::time::sleep(std::time::Duration::from_secs(self.config.batch_timeout_secs));
        tokio::pin!(deadline);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    let message =
                        format!("no result within {}s deadline", self.config.batch_timeout_secs);
                    self.fail_processing(batch, &message);
                    self.set_phase(RunPhase::TimedOut);
                    return;
                }
                _ = cancel.cancelled() => {
                    self.fail_processing(batch, "batch run cancelled");
                    self.set_phase(RunPhase::Finished);
                    return;
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            decoder.push(bytes.as_ref());
                            while let Some(frame) = decoder.next_frame() {
                                if self.apply_frame(batch, &frame) == RunControl::Ended {
                                    return;
                                }
                            }
                        }
                        Some(Err(err)) => {
                            // Mid-stream read failure. Results already applied
                            // stand; anything still Processing is left for the
                            // deadline, same as a stream that ends early.
                            log::warn!("stream read error: {err}");
                            self.finish_drained_stream(batch, &mut deadline).await;
                            return;
                        }
                        None => {
                            self.finish_drained_stream(batch, &mut deadline).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// The stream ended without a `complete` event. Documents already
    /// finalized stand; if any are still Processing they stay Processing
    /// until the deadline fires, otherwise the run is finished.
    async fn finish_drained_stream(
        &mut self,
        batch: &[DocumentId],
        deadline: &mut std::pin::Pin<&mut tokio::time::Sleep>,
    ) {
        let unresolved = batch.iter().any(|id| {
            self.documents
                .iter()
                .any(|d| d.id == *id && d.status == DocumentStatus::Processing)
        });
        if !unresolved {
            self.set_phase(RunPhase::Finished);
            return;
        }

        let cancel = self.cancel.clone();
        tokio::select! {
            _ = deadline.as_mut() => {
                let message =
                    format!("no result within {}s deadline", self.config.batch_timeout_secs);
                self.fail_processing(batch, &message);
                self.set_phase(RunPhase::TimedOut);
            }
            _ = cancel.cancelled() => {
                self.fail_processing(batch, "batch run cancelled");
                self.set_phase(RunPhase::Finished);
            }
        }
    }

    /// Dispatch one decoded frame.
    fn apply_frame(&mut self, batch: &[DocumentId], frame: &Frame) -> RunControl {
        match frame.event.as_str() {
            "result" => {
                match serde_json::from_str::<BatchResultEvent>(&frame.data) {
                    Ok(event) => self.apply_result(batch, event),
                    // Malformed payload: log and keep streaming.
                    Err(err) => log::warn!("ignoring malformed result payload: {err}"),
                }
                RunControl::Continue
            }
            "complete" => {
                // Any document still Processing is deliberately left as-is;
                // the deadline resolves it if nothing else does.
                let summary =
                    serde_json::from_str(&frame.data).unwrap_or(serde_json::Value::Null);
                self.emit(CoordinatorEvent::RunComplete { summary });
                self.set_phase(RunPhase::Finished);
                RunControl::Ended
            }
            "error" => {
                let message = serde_json::from_str::<ErrorEvent>(&frame.data)
                    .map(|e| e.error)
                    .unwrap_or_else(|_| frame.data.clone());
                self.fail_processing(batch, &message);
                self.set_phase(RunPhase::Finished);
                RunControl::Ended
            }
            other => {
                log::debug!("ignoring unknown event {other:?}");
                RunControl::Continue
            }
        }
    }

    /// Apply a per-document result, correlated by batch position.
    ///
    /// Only a document currently Processing transitions; duplicates, late
    /// events and out-of-range indexes are no-ops.
    fn apply_result(&mut self, batch: &[DocumentId], event: BatchResultEvent) {
        let Some(id) = batch.get(event.index) else {
            log::warn!(
                "result index {} out of range for batch of {}",
                event.index,
                batch.len()
            );
            return;
        };
        let Some(doc) = self.documents.iter_mut().find(|d| d.id == *id) else {
            return;
        };
        if doc.status != DocumentStatus::Processing {
            return;
        }

        if event.success {
            doc.status = DocumentStatus::Completed;
            doc.result = Some(ExtractionOutput {
                data: event.data,
                metadata: event.metadata,
            });
            doc.error = None;
        } else {
            doc.status = DocumentStatus::Error;
            doc.error = Some("extraction reported failure".to_string());
        }
        let snapshot = doc.clone();
        self.emit(CoordinatorEvent::DocumentUpdated { document: snapshot });
    }

    /// Transition every still-Processing document of this batch to Error with
    /// the same message.
    fn fail_processing(&mut self, batch: &[DocumentId], message: &str) {
        let mut snapshots = Vec::new();
        for id in batch {
            if let Some(doc) = self.documents.iter_mut().find(|d| d.id == *id) {
                if doc.status == DocumentStatus::Processing {
                    doc.status = DocumentStatus::Error;
                    doc.error = Some(message.to_string());
                    snapshots.push(doc.clone());
                }
            }
        }
        for document in snapshots {
            self.emit(CoordinatorEvent::DocumentUpdated { document });
        }
    }

    /// Pre-stream failure: every targeted document gets the same diagnostic
    /// and the coordinator returns to Idle so a new run can be attempted.
    fn abort_run(&mut self, batch: &[DocumentId], message: &str) {
        self.fail_processing(batch, message);
        self.set_phase(RunPhase::Idle);
    }

    fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.emit(CoordinatorEvent::PhaseChanged { phase });
    }

    fn emit(&self, event: CoordinatorEvent) {
        // Observers may have gone away; state stays authoritative here.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn coordinator() -> (BatchCoordinator, UnboundedReceiver<CoordinatorEvent>) {
        BatchCoordinator::new(Config::default())
    }

    fn test_schema() -> Schema {
        Schema::from([("nome".to_string(), "Professional name".to_string())])
    }

    fn add_configured(c: &mut BatchCoordinator, name: &str) -> DocumentId {
        let id = c.add_document(name, b"%PDF-1.4".to_vec());
        assert!(c.configure_document(id, "carteira_oab".to_string(), test_schema()));
        id
    }

    fn sse(event: &str, data: &str) -> String {
        format!("event: {event}\ndata: {data}\n\n")
    }

    fn result_payload(index: usize, success: bool) -> String {
        json!({
            "index": index,
            "filename": format!("doc_{index}.pdf"),
            "label": "carteira_oab",
            "success": success,
            "data": if success { json!({"nome": "Maria"}) } else { json!({}) },
            "metadata": {"method": "vision", "time": 1.5}
        })
        .to_string()
    }

    fn chunks(
        parts: Vec<String>,
    ) -> impl Stream<Item = Result<Vec<u8>, std::convert::Infallible>> {
        tokio_stream::iter(parts.into_iter().map(|s| Ok(s.into_bytes())))
    }

    fn status_of(c: &BatchCoordinator, id: DocumentId) -> DocumentStatus {
        c.documents().iter().find(|d| d.id == id).unwrap().status
    }

    #[test]
    fn add_and_remove_documents() {
        let (mut c, _rx) = coordinator();
        let a = c.add_document("a.pdf", vec![1]);
        let b = c.add_document("b.pdf", vec![2]);
        assert_ne!(a, b);
        assert_eq!(c.documents().len(), 2);
        assert!(c.remove_document(a));
        assert!(!c.remove_document(a));
        assert_eq!(c.documents().len(), 1);
    }

    #[test]
    fn configure_rejected_once_processing() {
        let (mut c, _rx) = coordinator();
        let id = add_configured(&mut c, "a.pdf");
        c.begin_run().unwrap();
        assert_eq!(status_of(&c, id), DocumentStatus::Processing);
        assert!(!c.configure_document(id, "other".to_string(), test_schema()));
    }

    #[test]
    fn begin_run_skips_unconfigured_documents() {
        let (mut c, _rx) = coordinator();
        let configured = add_configured(&mut c, "a.pdf");
        let unconfigured = c.add_document("b.pdf", vec![2]);
        let batch = c.begin_run().unwrap();
        assert_eq!(batch, vec![configured]);
        assert_eq!(status_of(&c, unconfigured), DocumentStatus::Pending);
    }

    #[test]
    fn second_submit_while_running_is_rejected() {
        let (mut c, _rx) = coordinator();
        add_configured(&mut c, "a.pdf");
        c.begin_run().unwrap();
        assert!(matches!(
            c.begin_run(),
            Err(CoordinatorError::RunInProgress)
        ));
    }

    #[test]
    fn empty_batch_is_rejected() {
        let (mut c, _rx) = coordinator();
        c.add_document("unconfigured.pdf", vec![1]);
        assert!(matches!(c.begin_run(), Err(CoordinatorError::EmptyBatch)));
    }

    #[tokio::test]
    async fn results_resolve_documents_by_batch_position() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let b = add_configured(&mut c, "b.pdf");
        let batch = c.begin_run().unwrap();

        let body = [
            sse("result", &result_payload(0, true)),
            sse("result", &result_payload(1, false)),
            sse("complete", "{\"total\":2}"),
        ];
        c.consume_stream(&batch, chunks(body.to_vec())).await;

        assert_eq!(c.phase(), RunPhase::Finished);
        assert_eq!(status_of(&c, a), DocumentStatus::Completed);
        let doc_a = c.documents().iter().find(|d| d.id == a).unwrap();
        assert_eq!(doc_a.result.as_ref().unwrap().data["nome"], "Maria");
        assert_eq!(doc_a.result.as_ref().unwrap().metadata.method, "vision");

        assert_eq!(status_of(&c, b), DocumentStatus::Error);
        let doc_b = c.documents().iter().find(|d| d.id == b).unwrap();
        assert!(doc_b.error.as_ref().unwrap().contains("failure"));
    }

    #[tokio::test]
    async fn result_only_touches_its_own_slot() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let b = add_configured(&mut c, "b.pdf");
        let batch = c.begin_run().unwrap();

        let body = [
            sse("result", &result_payload(1, true)),
            sse("complete", "{}"),
        ];
        c.consume_stream(&batch, chunks(body.to_vec())).await;

        assert_eq!(status_of(&c, a), DocumentStatus::Processing);
        assert_eq!(status_of(&c, b), DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_result_is_a_noop() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();

        // Second delivery flips success to false; the document already left
        // Processing, so it must not change.
        let body = [
            sse("result", &result_payload(0, true)),
            sse("result", &result_payload(0, false)),
            sse("complete", "{}"),
        ];
        c.consume_stream(&batch, chunks(body.to_vec())).await;

        assert_eq!(status_of(&c, a), DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn out_of_range_index_is_ignored() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();

        let body = [
            sse("result", &result_payload(7, true)),
            sse("result", &result_payload(0, true)),
            sse("complete", "{}"),
        ];
        c.consume_stream(&batch, chunks(body.to_vec())).await;

        assert_eq!(status_of(&c, a), DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn malformed_payload_is_logged_and_skipped() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();

        let body = [
            sse("result", "this is not json"),
            sse("result", &result_payload(0, true)),
            sse("complete", "{}"),
        ];
        c.consume_stream(&batch, chunks(body.to_vec())).await;

        assert_eq!(status_of(&c, a), DocumentStatus::Completed);
        assert_eq!(c.phase(), RunPhase::Finished);
    }

    #[tokio::test]
    async fn error_event_fails_everything_still_processing() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let b = add_configured(&mut c, "b.pdf");
        let batch = c.begin_run().unwrap();

        let body = [
            sse("result", &result_payload(0, true)),
            sse("error", "{\"error\":\"model overloaded\"}"),
        ];
        c.consume_stream(&batch, chunks(body.to_vec())).await;

        assert_eq!(c.phase(), RunPhase::Finished);
        assert_eq!(status_of(&c, a), DocumentStatus::Completed);
        assert_eq!(status_of(&c, b), DocumentStatus::Error);
        let doc_b = c.documents().iter().find(|d| d.id == b).unwrap();
        assert_eq!(doc_b.error.as_deref(), Some("model overloaded"));
    }

    #[tokio::test]
    async fn complete_leaves_unresolved_documents_processing() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();

        c.consume_stream(&batch, chunks(vec![sse("complete", "{}")]))
            .await;

        // Reference parity: `complete` neither resolves nor blocks documents
        // the stream never accounted for.
        assert_eq!(c.phase(), RunPhase::Finished);
        assert_eq!(status_of(&c, a), DocumentStatus::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fails_unresolved_documents() {
        // Three documents; results arrive for slots 0 (success) and 2
        // (failure); nothing ever arrives for slot 1.
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let b = add_configured(&mut c, "b.pdf");
        let d = add_configured(&mut c, "d.pdf");
        let batch = c.begin_run().unwrap();

        let body = [
            sse("result", &result_payload(0, true)),
            sse("result", &result_payload(2, false)),
        ];
        let stream = chunks(body.to_vec()).chain(stream::pending());
        c.consume_stream(&batch, stream).await;

        assert_eq!(c.phase(), RunPhase::TimedOut);
        assert_eq!(status_of(&c, a), DocumentStatus::Completed);
        assert_eq!(status_of(&c, b), DocumentStatus::Error);
        let doc_b = c.documents().iter().find(|d| d.id == b).unwrap();
        assert!(doc_b.error.as_ref().unwrap().contains("deadline"));
        assert_eq!(status_of(&c, d), DocumentStatus::Error);
        let doc_d = c.documents().iter().find(|x| x.id == d).unwrap();
        assert!(doc_d.error.as_ref().unwrap().contains("failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn drained_stream_with_unresolved_documents_waits_for_deadline() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();

        // Stream ends with no events at all; the document stays Processing
        // until the deadline resolves it.
        c.consume_stream(&batch, chunks(vec![])).await;

        assert_eq!(c.phase(), RunPhase::TimedOut);
        assert_eq!(status_of(&c, a), DocumentStatus::Error);
    }

    #[tokio::test]
    async fn drained_stream_with_everything_resolved_finishes() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();

        // All slots accounted for but no `complete` event.
        c.consume_stream(&batch, chunks(vec![sse("result", &result_payload(0, true))]))
            .await;

        assert_eq!(c.phase(), RunPhase::Finished);
        assert_eq!(status_of(&c, a), DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn late_event_after_run_end_is_a_noop() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();
        c.consume_stream(&batch, chunks(vec![sse("error", "{\"error\":\"boom\"}")]))
            .await;
        assert_eq!(status_of(&c, a), DocumentStatus::Error);

        // A straggler result hits the same Processing guard and changes
        // nothing.
        c.apply_result(
            &batch,
            serde_json::from_str(&result_payload(0, true)).unwrap(),
        );
        assert_eq!(status_of(&c, a), DocumentStatus::Error);
        let doc = c.documents().iter().find(|d| d.id == a).unwrap();
        assert_eq!(doc.error.as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_the_run() {
        let (mut c, _rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();
        c.cancellation_token().cancel();

        c.consume_stream(&batch, chunks(vec![]).chain(stream::pending()))
            .await;

        assert_eq!(c.phase(), RunPhase::Finished);
        assert_eq!(status_of(&c, a), DocumentStatus::Error);
        let doc = c.documents().iter().find(|d| d.id == a).unwrap();
        assert!(doc.error.as_ref().unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn run_can_be_resubmitted_after_finishing() {
        let (mut c, _rx) = coordinator();
        add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();
        let body = [
            sse("result", &result_payload(0, true)),
            sse("complete", "{}"),
        ];
        c.consume_stream(&batch, chunks(body.to_vec())).await;
        assert_eq!(c.phase(), RunPhase::Finished);

        // A fresh Pending document starts a new run; the finished one is not
        // re-targeted.
        let fresh = add_configured(&mut c, "b.pdf");
        let second = c.begin_run().unwrap();
        assert_eq!(second, vec![fresh]);
    }

    #[test]
    fn auto_configure_fills_only_unconfigured_documents() {
        let (mut c, _rx) = coordinator();
        let auto = c.add_document("oab_1.pdf", vec![1]);
        let manual = c.add_document("oab_2.pdf", vec![2]);
        c.configure_document(
            manual,
            "manual_label".to_string(),
            Schema::from([("x".to_string(), "y".to_string())]),
        );

        let dataset = Dataset::from_json_str(
            r#"[
                {"label": "carteira_oab",
                 "extraction_schema": {"nome": "..."},
                 "pdf_path": "docs/oab_1.pdf"},
                {"label": "carteira_oab_2",
                 "extraction_schema": {"nome": "..."},
                 "pdf_path": "docs/oab_2.pdf"}
            ]"#,
        )
        .unwrap();

        assert_eq!(c.auto_configure(&dataset), 1);
        let doc = c.documents().iter().find(|d| d.id == auto).unwrap();
        assert_eq!(doc.label, "carteira_oab");
        assert!(doc.schema.contains_key("nome"));

        // Manual edits survive.
        let doc = c.documents().iter().find(|d| d.id == manual).unwrap();
        assert_eq!(doc.label, "manual_label");

        // Idempotent: re-invoking changes nothing further.
        assert_eq!(c.auto_configure(&dataset), 0);
    }

    #[tokio::test]
    async fn observer_receives_snapshots_in_order() {
        let (mut c, mut rx) = coordinator();
        let a = add_configured(&mut c, "a.pdf");
        let batch = c.begin_run().unwrap();
        let body = [
            sse("result", &result_payload(0, true)),
            sse("complete", "{\"total\":1}"),
        ];
        c.consume_stream(&batch, chunks(body.to_vec())).await;

        let mut saw_completed = false;
        let mut saw_summary = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                CoordinatorEvent::DocumentUpdated { document } if document.id == a => {
                    // Status only ever moves forward in delivery order.
                    if document.status == DocumentStatus::Completed {
                        saw_completed = true;
                    } else {
                        assert!(!saw_completed, "status went backward");
                    }
                }
                CoordinatorEvent::RunComplete { summary } => {
                    assert_eq!(summary["total"], 1);
                    saw_summary = true;
                }
                _ => {}
            }
        }
        assert!(saw_completed);
        assert!(saw_summary);
    }
}
