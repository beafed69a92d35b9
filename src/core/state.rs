use std::sync::Arc;

use crate::core::config::Settings;
use crate::repositories::gradings::GradingRepository;
use crate::services::storage::LocalFileStorage;
use crate::tasks::batch::BatchTaskTracker;
use crate::tasks::dispatcher::GradingDispatcher;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    gradings: Arc<dyn GradingRepository>,
    storage: LocalFileStorage,
    dispatcher: GradingDispatcher,
    tasks: BatchTaskTracker,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        gradings: Arc<dyn GradingRepository>,
        storage: LocalFileStorage,
        dispatcher: GradingDispatcher,
        tasks: BatchTaskTracker,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, gradings, storage, dispatcher, tasks }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn gradings(&self) -> &dyn GradingRepository {
        self.inner.gradings.as_ref()
    }

    pub(crate) fn storage(&self) -> &LocalFileStorage {
        &self.inner.storage
    }

    pub(crate) fn dispatcher(&self) -> &GradingDispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn tasks(&self) -> &BatchTaskTracker {
        &self.inner.tasks
    }
}
