use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use megapost_contracts::categories::{prompt_for_category, Category, CategoryTable};
use megapost_contracts::events::{EventPayload, EventWriter};
use serde_json::{json, Value};

use crate::client::GenerationClient;
use crate::error::{GenerationError, OrchestratorError};
use crate::transcode::{generation_prompt, transcode, SourceImage};

const UNKNOWN_ERROR: &str = "unknown error";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryState {
    #[default]
    Absent,
    InProgress,
    Succeeded(String),
    Failed(String),
}

impl CategoryState {
    pub fn is_loading(&self) -> bool {
        matches!(self, CategoryState::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CategoryState::Succeeded(_) | CategoryState::Failed(_))
    }

    pub fn image(&self) -> Option<&str> {
        match self {
            CategoryState::Succeeded(uri) => Some(uri),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CategoryState::Failed(message) => Some(message),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            CategoryState::Absent => "absent",
            CategoryState::InProgress => "in_progress",
            CategoryState::Succeeded(_) => "succeeded",
            CategoryState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    fn reset() -> Self {
        Self {
            completed: 0,
            total: Category::COUNT,
        }
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryUpdate {
    pub category: Category,
    pub state: CategoryState,
    pub progress: Progress,
    /// `true` when the update belongs to a bulk run.
    pub bulk: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: Vec<Category>,
    pub failed: Vec<(Category, String)>,
    /// Completions dropped because the source changed while they were in flight.
    pub discarded: Vec<Category>,
}

type Observer = Box<dyn Fn(&CategoryUpdate) + Send + Sync>;

enum Applied {
    Stored(CategoryUpdate),
    Stale,
}

struct Session {
    source: Option<Arc<SourceImage>>,
    epoch: u64,
    states: CategoryTable<CategoryState>,
    progress: Progress,
}

/// Seven independent generations from one source image.
///
/// All state lives in one mutex-guarded session; completion handlers are its
/// only writers. Every call carries the epoch it was issued under and is
/// dropped on completion when the source has since been replaced.
pub struct Orchestrator {
    client: Box<dyn GenerationClient>,
    events: EventWriter,
    session: Mutex<Session>,
    observer: Option<Observer>,
}

impl Orchestrator {
    pub fn new(client: Box<dyn GenerationClient>, events: EventWriter) -> Self {
        Self {
            client,
            events,
            session: Mutex::new(Session {
                source: None,
                epoch: 0,
                states: CategoryTable::default(),
                progress: Progress::reset(),
            }),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: impl Fn(&CategoryUpdate) + Send + Sync + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn provider_name(&self) -> &str {
        self.client.name()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Replaces (or clears) the source and resets every category and progress.
    pub fn select_source(&self, source: Option<SourceImage>) {
        let payload = {
            let mut session = self.lock();
            session.epoch += 1;
            session.states = CategoryTable::default();
            session.progress = Progress::reset();
            session.source = source.map(Arc::new);
            let mut payload = EventPayload::new();
            payload.insert("epoch".to_string(), json!(session.epoch));
            payload.insert(
                "file_name".to_string(),
                session
                    .source
                    .as_ref()
                    .map(|source| Value::String(source.file_name().to_string()))
                    .unwrap_or(Value::Null),
            );
            payload.insert(
                "sha256".to_string(),
                session
                    .source
                    .as_ref()
                    .map(|source| Value::String(source.sha256().to_string()))
                    .unwrap_or(Value::Null),
            );
            payload
        };
        self.emit("source_selected", payload);
    }

    pub fn source(&self) -> Option<Arc<SourceImage>> {
        self.lock().source.clone()
    }

    pub fn state(&self, category: Category) -> CategoryState {
        self.lock().states.get(category).clone()
    }

    pub fn states(&self) -> CategoryTable<CategoryState> {
        self.lock().states.clone()
    }

    pub fn progress(&self) -> Progress {
        self.lock().progress
    }

    pub fn is_generating(&self) -> bool {
        self.lock().states.any(CategoryState::is_loading)
    }

    pub fn has_generated_images(&self) -> bool {
        self.lock().states.any(|state| state.image().is_some())
    }

    pub fn generated_images(&self) -> Vec<(Category, String)> {
        self.lock()
            .states
            .iter()
            .filter_map(|(category, state)| state.image().map(|uri| (category, uri.to_string())))
            .collect()
    }

    /// Bulk run over all seven categories; returns once every call has completed.
    pub fn generate_all(&self) -> Result<RunReport, OrchestratorError> {
        let (source, epoch) = {
            let mut session = self.lock();
            let source = session
                .source
                .clone()
                .ok_or(OrchestratorError::NoSourceImage)?;
            if session.states.any(CategoryState::is_loading) {
                return Err(OrchestratorError::GenerationInProgress);
            }
            session.progress = Progress::reset();
            for category in Category::ALL {
                *session.states.get_mut(category) = CategoryState::InProgress;
            }
            (source, session.epoch)
        };

        let mut payload = EventPayload::new();
        payload.insert("epoch".to_string(), json!(epoch));
        payload.insert("categories".to_string(), json!(Category::ALL));
        payload.insert("provider".to_string(), json!(self.client.name()));
        self.emit("run_started", payload);

        let outcomes = thread::scope(|scope| {
            let handles = Category::ALL.map(|category| {
                let source = Arc::clone(&source);
                scope.spawn(move || {
                    let result = self.run_category(&source, category, epoch);
                    (category, self.complete(epoch, category, result, true))
                })
            });
            handles
                .into_iter()
                .zip(Category::ALL)
                .map(|(handle, category)| {
                    handle.join().unwrap_or_else(|_| {
                        let result = Err(GenerationError::UpstreamFailure(
                            "generation worker panicked".to_string(),
                        ));
                        (category, self.complete(epoch, category, result, true))
                    })
                })
                .collect::<Vec<_>>()
        });

        let mut report = RunReport::default();
        for (category, applied) in outcomes {
            match applied {
                Applied::Stored(update) => match update.state {
                    CategoryState::Succeeded(_) => report.succeeded.push(category),
                    CategoryState::Failed(message) => report.failed.push((category, message)),
                    _ => {}
                },
                Applied::Stale => report.discarded.push(category),
            }
        }

        let mut payload = EventPayload::new();
        payload.insert("epoch".to_string(), json!(epoch));
        payload.insert("succeeded".to_string(), json!(report.succeeded));
        payload.insert(
            "failed".to_string(),
            json!(report
                .failed
                .iter()
                .map(|(category, _)| *category)
                .collect::<Vec<_>>()),
        );
        payload.insert("discarded".to_string(), json!(report.discarded));
        self.emit("run_finished", payload);
        Ok(report)
    }

    /// Regenerates one category without touching progress or siblings.
    ///
    /// Returns `Ok(false)` when the category already has a call outstanding.
    pub fn regenerate(&self, category: Category) -> Result<bool, OrchestratorError> {
        let (source, epoch) = {
            let mut session = self.lock();
            let source = session
                .source
                .clone()
                .ok_or(OrchestratorError::NoSourceImage)?;
            let slot = session.states.get_mut(category);
            if slot.is_loading() {
                return Ok(false);
            }
            *slot = CategoryState::InProgress;
            (source, session.epoch)
        };

        let result = self.run_category(&source, category, epoch);
        self.complete(epoch, category, result, false);
        Ok(true)
    }

    fn run_category(
        &self,
        source: &SourceImage,
        category: Category,
        epoch: u64,
    ) -> Result<String, GenerationError> {
        let mut payload = EventPayload::new();
        payload.insert("epoch".to_string(), json!(epoch));
        payload.insert("category".to_string(), json!(category));
        self.emit("category_started", payload);

        let inline = transcode(source)?;
        let prompt = inline
            .media_type()
            .map(|media_type| generation_prompt(category, media_type))
            .unwrap_or_else(|| prompt_for_category(category));
        self.client.generate(&inline, &prompt)
    }

    fn complete(
        &self,
        epoch: u64,
        category: Category,
        result: Result<String, GenerationError>,
        bulk: bool,
    ) -> Applied {
        let applied = {
            let mut session = self.lock();
            if session.epoch != epoch {
                Applied::Stale
            } else {
                let state = match result {
                    Ok(uri) => CategoryState::Succeeded(uri),
                    Err(err) => CategoryState::Failed(error_message(&err)),
                };
                *session.states.get_mut(category) = state.clone();
                if bulk {
                    session.progress.completed =
                        (session.progress.completed + 1).min(session.progress.total);
                }
                Applied::Stored(CategoryUpdate {
                    category,
                    state,
                    progress: session.progress,
                    bulk,
                })
            }
        };

        let mut payload = EventPayload::new();
        payload.insert("epoch".to_string(), json!(epoch));
        payload.insert("category".to_string(), json!(category));
        match &applied {
            Applied::Stale => {
                self.emit("stale_completion_discarded", payload);
            }
            Applied::Stored(update) => {
                payload.insert("state".to_string(), json!(update.state.label()));
                payload.insert("bulk".to_string(), json!(bulk));
                payload.insert("progress_pct".to_string(), json!(update.progress.percent()));
                if let Some(message) = update.state.error() {
                    payload.insert("error".to_string(), json!(message));
                }
                let event_type = if update.state.image().is_some() {
                    "category_succeeded"
                } else {
                    "category_failed"
                };
                self.emit(event_type, payload);
                if let Some(observer) = &self.observer {
                    observer(update);
                }
            }
        }
        applied
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("megapost: failed to record {event_type} event: {err:#}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        // State is replaced wholesale on every write, so a poisoned guard is still consistent.
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn error_message(err: &GenerationError) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        UNKNOWN_ERROR.to_string()
    } else {
        message
    }
}
